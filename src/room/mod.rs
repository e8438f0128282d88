//! Authoritative rooms: state, actor task and registry

pub mod authoritative;
pub mod participant;
pub mod registry;
pub mod task;

pub use authoritative::{
    AuthoritativeRoom, AuthorityPolicy, GameMode, RoomError, RoomOptions, SimulationMode,
};
pub use participant::{ParticipantId, Seat};
pub use registry::RoomRegistry;
pub use task::{Joined, Outbound, PlayerInput, RoomCommand, RoomHandle, RoomTask};
