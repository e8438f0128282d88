//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use crate::room::{AuthorityPolicy, GameMode, RoomOptions, SimulationMode};

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Allowed client origins for CORS; empty allows any
    pub client_origins: Vec<String>,
    /// Public base URL used when handing out WebSocket URLs
    pub public_base_url: Option<String>,

    /// Points needed to win
    pub max_score: u32,
    pub game_mode: GameMode,
    /// Drop ball and score pushes from non-hosts
    pub enforce_host_authority: bool,
    /// Run ball physics in the room instead of on the host
    pub server_simulation: bool,
    /// Close rooms that stay empty this long
    pub room_empty_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            log_level: "info".to_string(),
            client_origins: Vec::new(),
            public_base_url: None,
            max_score: 5,
            game_mode: GameMode::Classic,
            enforce_host_authority: false,
            server_simulation: false,
            room_empty_timeout: Duration::from_secs(60),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from any key lookup
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = match get("PORT") {
            Some(port) => format!("0.0.0.0:{}", port),
            None => get("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        };

        let max_score = match get("MAX_SCORE") {
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(n) if n >= 1 => n,
                _ => return Err(ConfigError::Invalid("MAX_SCORE", raw)),
            },
            None => 5,
        };

        let room_empty_timeout = match get("ROOM_EMPTY_TIMEOUT_SECS") {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs >= 1 => Duration::from_secs(secs),
                _ => return Err(ConfigError::Invalid("ROOM_EMPTY_TIMEOUT_SECS", raw)),
            },
            None => Duration::from_secs(60),
        };

        let game_mode = match get("GAME_MODE").as_deref().map(str::trim) {
            None | Some("") | Some("classic") => GameMode::Classic,
            Some("timed") => GameMode::Timed,
            Some(other) => return Err(ConfigError::Invalid("GAME_MODE", other.to_string())),
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),

            client_origins: get("CLIENT_ORIGIN")
                .map(|origins| {
                    origins
                        .split(',')
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            public_base_url: get("PUBLIC_BASE_URL").filter(|url| !url.trim().is_empty()),

            max_score,
            game_mode,
            enforce_host_authority: parse_flag(&get, "ENFORCE_HOST_AUTHORITY")?,
            server_simulation: parse_flag(&get, "SERVER_SIMULATION")?,
            room_empty_timeout,
        })
    }
}

fn parse_flag(get: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<bool, ConfigError> {
    match get(key) {
        None => Ok(false),
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "" | "0" | "false" | "no" | "off" => Ok(false),
            "1" | "true" | "yes" | "on" => Ok(true),
            _ => Err(ConfigError::Invalid(key, raw)),
        },
    }
}

impl From<&Config> for RoomOptions {
    fn from(config: &Config) -> Self {
        Self {
            max_score: config.max_score,
            game_mode: config.game_mode,
            authority: if config.enforce_host_authority {
                AuthorityPolicy::VerifyHost
            } else {
                AuthorityPolicy::TrustClient
            },
            simulation: if config.server_simulation {
                SimulationMode::Server
            } else {
                SimulationMode::Host
            },
            empty_timeout: config.room_empty_timeout,
            ..RoomOptions::default()
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1:?}")]
    Invalid(&'static str, String),

    #[error("Invalid server address format")]
    InvalidAddress,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = Config::from_lookup(lookup(&[])).expect("defaults parse");
        assert_eq!(config.server_addr.port(), 8080);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.max_score, 5);
        assert_eq!(config.game_mode, GameMode::Classic);
        assert!(config.client_origins.is_empty());
        assert!(!config.enforce_host_authority);
    }

    #[test]
    fn port_wins_over_server_addr() {
        let config = Config::from_lookup(lookup(&[
            ("PORT", "9001"),
            ("SERVER_ADDR", "127.0.0.1:7000"),
        ]))
        .expect("parses");
        assert_eq!(config.server_addr.port(), 9001);
    }

    #[test]
    fn room_options_follow_flags() {
        let config = Config::from_lookup(lookup(&[
            ("MAX_SCORE", "11"),
            ("GAME_MODE", "timed"),
            ("ENFORCE_HOST_AUTHORITY", "true"),
            ("SERVER_SIMULATION", "1"),
            ("ROOM_EMPTY_TIMEOUT_SECS", "15"),
            ("CLIENT_ORIGIN", "http://a.test, http://b.test"),
        ]))
        .expect("parses");

        assert_eq!(config.client_origins, vec!["http://a.test", "http://b.test"]);

        let options = RoomOptions::from(&config);
        assert_eq!(options.max_players, 2);
        assert_eq!(options.max_score, 11);
        assert_eq!(options.game_mode, GameMode::Timed);
        assert_eq!(options.authority, AuthorityPolicy::VerifyHost);
        assert_eq!(options.simulation, SimulationMode::Server);
        assert_eq!(options.empty_timeout, Duration::from_secs(15));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            Config::from_lookup(lookup(&[("MAX_SCORE", "0")])),
            Err(ConfigError::Invalid("MAX_SCORE", _))
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[("GAME_MODE", "arcade")])),
            Err(ConfigError::Invalid("GAME_MODE", _))
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[("ROOM_EMPTY_TIMEOUT_SECS", "0")])),
            Err(ConfigError::Invalid("ROOM_EMPTY_TIMEOUT_SECS", _))
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[("SERVER_ADDR", "nope")])),
            Err(ConfigError::InvalidAddress)
        ));
    }
}
