//! Client session: sends local intents to a room and dispatches the room's
//! authoritative state back to the game

mod sync;
pub mod transport;

pub use sync::SyncClient;
pub use transport::Endpoint;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::room::ParticipantId;
use crate::ws::protocol::{MatchState, ParticipantInfo, ServerMsg};

/// Client errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Rejected by room: {message}")]
    Rejected { code: String, message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Client has been disposed")]
    Disposed,

    #[error("No earlier room to rejoin")]
    NothingToRejoin,
}

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// A connection status change, with detail for errors and disconnects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionUpdate {
    pub status: ConnectionStatus,
    pub message: Option<String>,
}

/// What a successful create or join returns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub room_id: Uuid,
    pub participant_id: ParticipantId,
    pub player_number: u8,
    pub is_host: bool,
}

/// Everything the client observes, for `SyncClient::subscribe`
#[derive(Debug, Clone)]
pub enum ClientEvent {
    StateChanged(MatchState),
    PlayerJoined(ParticipantInfo),
    PlayerLeft(ParticipantId),
    ConnectionStatusChanged(ConnectionUpdate),
    MatchStarted,
    ScoreUpdated {
        player1_score: u32,
        player2_score: u32,
    },
    /// Room messages without a dedicated event
    Message(ServerMsg),
}
