//! WebSocket transport: wire protocol and session handler

pub mod handler;
pub mod protocol;

pub use handler::ws_handler;
pub use protocol::{ClientMsg, MatchState, ParticipantInfo, ServerMsg};
