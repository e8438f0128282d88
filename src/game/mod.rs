//! Game simulation modules

pub mod physics;
pub mod simulation;
pub mod snapshot;
pub mod vector;

pub use physics::{Ball, Paddle};
pub use simulation::{MatchSimulation, MatchStatus, TickOutcome};
pub use vector::Vector3;

use serde::{Deserialize, Serialize};

/// Arena side; player 1 plays left, player 2 plays right
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

/// Paddle movement intent from a participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaddleDirection {
    Up,
    Down,
    /// No key held
    #[default]
    #[serde(rename = "none")]
    Idle,
}
