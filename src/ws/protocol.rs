//! WebSocket protocol message definitions
//! These are the wire types for client-room communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::simulation::{BallSnapshot, PaddleSnapshot};
use crate::game::{MatchStatus, PaddleDirection, Vector3};
use crate::room::ParticipantId;

/// Messages sent from client to room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Paddle intent changed
    PlayerInput {
        player_id: ParticipantId,
        direction: PaddleDirection,
        /// Sender clock, advisory only
        timestamp: u64,
    },

    /// Locally simulated paddle position
    PaddlePosition {
        player_id: ParticipantId,
        position: f32,
        timestamp: u64,
    },

    /// Host's ball (host only)
    BallState {
        position: Vector3,
        velocity: Vector3,
        timestamp: u64,
    },

    /// Host's scores (host only)
    ScoreUpdate {
        player1_score: u32,
        player2_score: u32,
        timestamp: u64,
    },

    /// Match controls (host only)
    StartGame,
    PauseGame,
    ResetGame,

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },

    /// Leave the room
    LeaveRoom,
}

/// Messages sent from room to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Seat assignment, sent only to the joining session
    Welcome {
        room_id: Uuid,
        participant_id: ParticipantId,
        player_number: u8,
        is_host: bool,
        server_time: u64,
    },

    /// Full authoritative snapshot
    State {
        state: MatchState,
    },

    PlayerJoined {
        participant: ParticipantInfo,
    },

    PlayerLeft {
        participant_id: ParticipantId,
        player_number: u8,
        reason: String,
    },

    /// Host authority moved to another participant
    HostChanged {
        host_id: ParticipantId,
    },

    MatchStarted {
        timestamp: u64,
    },

    MatchPaused {
        timestamp: u64,
    },

    MatchEnded {
        /// Player number of the winner
        winner: Option<u8>,
        player1_score: u32,
        player2_score: u32,
    },

    MatchReset {
        timestamp: u64,
    },

    /// Scores changed
    ScoreUpdate {
        player1_score: u32,
        player2_score: u32,
        timestamp: u64,
    },

    /// Error message
    Error {
        code: String,
        message: String,
    },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

/// Participant as seen by clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub id: ParticipantId,
    pub player_number: u8,
    /// Current paddle z
    pub paddle_position: f32,
    pub is_host: bool,
    pub input_direction: PaddleDirection,
    pub last_input_time: u64,
}

/// Authoritative match state snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchState {
    /// Monotonic snapshot counter
    pub seq: u64,
    pub player1_score: u32,
    pub player2_score: u32,
    pub status: MatchStatus,
    pub ball: BallSnapshot,
    pub paddles: PaddleSnapshot,
    /// Participants in join order
    pub players: Vec<ParticipantInfo>,
    pub host_id: Option<ParticipantId>,
    /// Last authoritative mutation, Unix ms
    pub last_update: u64,
}

impl MatchState {
    pub fn participant(&self, id: &ParticipantId) -> Option<&ParticipantInfo> {
        self.players.iter().find(|p| &p.id == id)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }
}

impl ClientMsg {
    /// Messages only the host may send
    pub fn is_host_only(&self) -> bool {
        matches!(
            self,
            ClientMsg::BallState { .. }
                | ClientMsg::ScoreUpdate { .. }
                | ClientMsg::StartGame
                | ClientMsg::PauseGame
                | ClientMsg::ResetGame
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages_use_snake_case_tags() {
        let msg = ClientMsg::PlayerInput {
            player_id: ParticipantId::from("a"),
            direction: PaddleDirection::Idle,
            timestamp: 10,
        };
        let json = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(json["type"], "player_input");
        assert_eq!(json["direction"], "none");
        assert_eq!(json["player_id"], "a");

        let start: ClientMsg = serde_json::from_str(r#"{"type":"start_game"}"#).expect("parse");
        assert_eq!(start, ClientMsg::StartGame);
    }

    #[test]
    fn ball_state_parses_from_wire_shape() {
        let raw = r#"{"type":"ball_state","position":{"x":1.0,"y":0.0,"z":-2.0},"velocity":{"x":6.0,"y":0.0,"z":0.5},"timestamp":99}"#;
        let msg: ClientMsg = serde_json::from_str(raw).expect("parse");
        match msg {
            ClientMsg::BallState {
                position,
                velocity,
                timestamp,
            } => {
                assert_eq!(position, Vector3::new(1.0, 0.0, -2.0));
                assert_eq!(velocity.z, 0.5);
                assert_eq!(timestamp, 99);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn host_only_messages_are_flagged() {
        assert!(ClientMsg::ResetGame.is_host_only());
        assert!(!ClientMsg::Ping { t: 1 }.is_host_only());
        assert!(!ClientMsg::PaddlePosition {
            player_id: ParticipantId::from("a"),
            position: 1.0,
            timestamp: 0,
        }
        .is_host_only());
    }

    #[test]
    fn server_status_serializes_lowercase() {
        let msg = ServerMsg::MatchEnded {
            winner: Some(1),
            player1_score: 5,
            player2_score: 2,
        };
        let json = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(json["type"], "match_ended");
        assert_eq!(serde_json::to_value(MatchStatus::Paused).expect("serialize"), "paused");
    }
}
