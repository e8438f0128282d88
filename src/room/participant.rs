//! Participants and seat assignment

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::{PaddleDirection, Side};

/// Opaque session identity of a participant
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Fresh random session id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ParticipantId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<Uuid> for ParticipantId {
    fn from(value: Uuid) -> Self {
        Self(value.to_string())
    }
}

/// Seat granted by a successful join
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Seat {
    pub player_number: u8,
    pub is_host: bool,
}

/// Participant record (authoritative, room-owned)
#[derive(Debug, Clone)]
pub struct Participant {
    pub id: ParticipantId,
    pub player_number: u8,
    pub input_direction: PaddleDirection,
    pub is_host: bool,
    /// Unix ms of the last stored intent
    pub last_input_time: u64,
}

impl Participant {
    pub fn new(id: ParticipantId, player_number: u8, is_host: bool, now: u64) -> Self {
        Self {
            id,
            player_number,
            input_direction: PaddleDirection::Idle,
            is_host,
            last_input_time: now,
        }
    }

    /// Paddle this participant drives
    pub fn side(&self) -> Side {
        if self.player_number == 1 {
            Side::Left
        } else {
            Side::Right
        }
    }
}

/// Player-number slots. A slot stays bound to the id that first claimed it
/// until the room resets, so a departed player's number is never handed to
/// someone else mid-match.
#[derive(Debug, Clone, Default)]
pub struct SeatTable {
    owners: Vec<Option<ParticipantId>>,
}

impl SeatTable {
    pub fn new(seats: usize) -> Self {
        Self {
            owners: vec![None; seats],
        }
    }

    /// Slot for `id`: its previous slot if it held one, else the first
    /// never-claimed slot. Returns the 1-based player number.
    pub fn claim(&mut self, id: &ParticipantId) -> Option<u8> {
        let index = self
            .owners
            .iter()
            .position(|owner| owner.as_ref() == Some(id))
            .or_else(|| self.owners.iter().position(Option::is_none))?;

        self.owners[index] = Some(id.clone());
        Some(index as u8 + 1)
    }

    /// Slots a newcomer could claim
    pub fn open(&self) -> usize {
        self.owners.iter().filter(|owner| owner.is_none()).count()
    }

    /// Release every slot whose owner is not in `present`
    pub fn retain_present<'a>(&mut self, present: impl Iterator<Item = &'a ParticipantId> + Clone) {
        for owner in self.owners.iter_mut() {
            let keep = owner
                .as_ref()
                .map(|id| present.clone().any(|p| p == id))
                .unwrap_or(false);
            if !keep {
                *owner = None;
            }
        }
    }
}
