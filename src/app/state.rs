//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::room::{RoomOptions, RoomRegistry};
use crate::util::rate_limit::{create_limiter, Limiter, ROOM_CREATE_RATE_LIMIT};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub rooms: Arc<RoomRegistry>,
    /// Throttles `POST /rooms` and `/ws?create=true`
    pub room_create_limiter: Arc<Limiter>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);

        // Initialize room registry with options from config
        let rooms = Arc::new(RoomRegistry::new(RoomOptions::from(config.as_ref())));

        Self {
            config,
            rooms,
            room_create_limiter: create_limiter(ROOM_CREATE_RATE_LIMIT),
        }
    }

    /// WebSocket URL a client should use to join `room_id`
    pub fn ws_url(&self, room_id: uuid::Uuid) -> String {
        match &self.config.public_base_url {
            Some(base) => {
                let base = base.trim_end_matches('/');
                let base = base
                    .strip_prefix("https://")
                    .map(|rest| format!("wss://{}", rest))
                    .or_else(|| base.strip_prefix("http://").map(|rest| format!("ws://{}", rest)))
                    .unwrap_or_else(|| base.to_string());
                format!("{}/ws?room={}", base, room_id)
            }
            None => format!("ws://{}/ws?room={}", self.config.server_addr, room_id),
        }
    }
}
