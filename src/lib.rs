//! Pong Netplay - authoritative two-player Pong rooms
//!
//! - `game`: ball and paddle physics, the match simulation
//! - `room`: the authoritative room, its actor task and registry
//! - `ws`, `http`: the server surface
//! - `client`: the sync client a game process drives

pub mod app;
pub mod client;
pub mod config;
pub mod game;
pub mod http;
pub mod room;
pub mod util;
pub mod ws;

pub use client::{ClientError, ClientEvent, ConnectionStatus, SessionInfo, SyncClient};
pub use config::Config;
pub use game::{MatchSimulation, MatchStatus, PaddleDirection, Side, Vector3};
pub use room::{AuthoritativeRoom, ParticipantId, RoomError, RoomOptions, RoomRegistry};
pub use ws::{ClientMsg, MatchState, ServerMsg};
