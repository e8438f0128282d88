//! Snapshot building for network transmission

use crate::room::ParticipantId;
use crate::ws::protocol::{MatchState, ParticipantInfo};

use super::MatchSimulation;

/// Builds sequenced snapshots and suppresses unchanged repeats
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    /// Sequence number of the last published snapshot
    seq: u64,
    /// Last published snapshot, for change detection
    last_sent: Option<MatchState>,
    stats: SnapshotStats,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assemble a snapshot copy. Does not advance the sequence.
    pub fn build(
        &self,
        sim: &MatchSimulation,
        players: Vec<ParticipantInfo>,
        host_id: Option<ParticipantId>,
        last_update: u64,
    ) -> MatchState {
        let sim = sim.snapshot();
        MatchState {
            seq: self.seq,
            player1_score: sim.player1_score,
            player2_score: sim.player2_score,
            status: sim.status,
            ball: sim.ball,
            paddles: sim.paddles,
            players,
            host_id,
            last_update,
        }
    }

    /// Stamp and return the snapshot if it differs from the last one sent
    pub fn publish(&mut self, mut state: MatchState) -> Option<MatchState> {
        if let Some(last) = &self.last_sent {
            state.seq = last.seq;
            if *last == state {
                return None;
            }
        }

        self.seq += 1;
        state.seq = self.seq;
        self.stats.record(state.players.len());
        self.last_sent = Some(state.clone());
        Some(state)
    }

    pub fn stats(&self) -> &SnapshotStats {
        &self.stats
    }
}

/// Snapshot counters for debugging
#[derive(Debug, Default, Clone)]
pub struct SnapshotStats {
    pub total_snapshots: u64,
    pub avg_players_per_snapshot: f32,
}

impl SnapshotStats {
    pub fn record(&mut self, player_count: usize) {
        self.total_snapshots += 1;

        // Running average
        let n = self.total_snapshots as f32;
        self.avg_players_per_snapshot =
            self.avg_players_per_snapshot * ((n - 1.0) / n) + (player_count as f32 / n);
    }
}
