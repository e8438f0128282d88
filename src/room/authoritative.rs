//! The authoritative room: canonical state for one match

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::game::snapshot::{SnapshotBuilder, SnapshotStats};
use crate::game::{MatchSimulation, MatchStatus, PaddleDirection, Side, TickOutcome, Vector3};
use crate::util::time::{delta_secs, Clock, SystemClock};
use crate::ws::protocol::{MatchState, ParticipantInfo};

use super::participant::{Participant, ParticipantId, Seat, SeatTable};

/// Players per room
pub const MAX_PLAYERS: usize = 2;

/// Opaque game mode tag, carried but not interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    #[default]
    Classic,
    Timed,
}

/// Who the room believes for ball and score pushes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthorityPolicy {
    /// Apply pushes from any participant; the client only sends them when it
    /// thinks it is host
    #[default]
    TrustClient,
    /// Drop pushes unless the sender is the room's host
    VerifyHost,
}

/// Where ball physics runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SimulationMode {
    /// The host process simulates the ball and pushes results; the room only
    /// integrates paddles
    #[default]
    Host,
    /// The room ticks ball physics itself and ignores pushes
    Server,
}

/// Per-room options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomOptions {
    pub max_players: usize,
    pub max_score: u32,
    pub game_mode: GameMode,
    pub authority: AuthorityPolicy,
    pub simulation: SimulationMode,
    /// A room nobody has joined closes after this long
    pub empty_timeout: Duration,
}

impl Default for RoomOptions {
    fn default() -> Self {
        Self {
            max_players: MAX_PLAYERS,
            max_score: 5,
            game_mode: GameMode::Classic,
            authority: AuthorityPolicy::TrustClient,
            simulation: SimulationMode::Host,
            empty_timeout: Duration::from_secs(60),
        }
    }
}

/// Room errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    #[error("Room is full")]
    RoomFull,

    #[error("Participant already in room")]
    AlreadyJoined,

    #[error("All player numbers are claimed until the room resets")]
    SeatsClaimed,

    #[error("Room not found")]
    NotFound,

    #[error("Room is closed")]
    Closed,
}

impl RoomError {
    /// Stable code for the wire `error` message
    pub fn code(&self) -> &'static str {
        match self {
            RoomError::RoomFull => "room_full",
            RoomError::AlreadyJoined => "already_joined",
            RoomError::SeatsClaimed => "seats_claimed",
            RoomError::NotFound => "room_not_found",
            RoomError::Closed => "room_closed",
        }
    }
}

/// Result of a departure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub participant_id: ParticipantId,
    pub player_number: u8,
    /// Participant promoted to host, if the host left
    pub new_host: Option<ParticipantId>,
    /// The departure paused a running match
    pub paused: bool,
}

/// Result of a score push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreApplied {
    pub changed: bool,
    pub ended: bool,
}

/// Canonical state for one match. Owned by exactly one room task; everything
/// it hands out is a copy.
pub struct AuthoritativeRoom {
    id: Uuid,
    options: RoomOptions,
    clock: Arc<dyn Clock>,
    sim: MatchSimulation,
    /// Join order
    participants: Vec<Participant>,
    seats: SeatTable,
    host_id: Option<ParticipantId>,
    /// Last authoritative mutation, Unix ms
    last_update: u64,
    /// Time the paddles were last integrated
    last_tick: u64,
    snapshots: SnapshotBuilder,
}

impl AuthoritativeRoom {
    pub fn new(id: Uuid, options: RoomOptions) -> Self {
        Self::with_clock(id, options, Arc::new(SystemClock))
    }

    pub fn with_clock(id: Uuid, options: RoomOptions, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_millis();
        Self {
            id,
            sim: MatchSimulation::new(options.max_score),
            seats: SeatTable::new(options.max_players),
            options,
            clock,
            participants: Vec::new(),
            host_id: None,
            last_update: now,
            last_tick: now,
            snapshots: SnapshotBuilder::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn options(&self) -> &RoomOptions {
        &self.options
    }

    pub fn status(&self) -> MatchStatus {
        self.sim.status()
    }

    pub fn scores(&self) -> (u32, u32) {
        self.sim.scores()
    }

    pub fn winner(&self) -> Option<u8> {
        self.sim.winner()
    }

    /// Add a participant. The first becomes player 1 and host; a full room
    /// starts playing automatically.
    pub fn add_participant(&mut self, id: ParticipantId) -> Result<Seat, RoomError> {
        if self.participants.iter().any(|p| p.id == id) {
            return Err(RoomError::AlreadyJoined);
        }
        if self.participants.len() >= self.options.max_players {
            return Err(RoomError::RoomFull);
        }
        let player_number = self.seats.claim(&id).ok_or(RoomError::SeatsClaimed)?;

        let is_host = self.participants.is_empty();
        let now = self.clock.now_millis();
        self.participants
            .push(Participant::new(id.clone(), player_number, is_host, now));
        if is_host {
            self.host_id = Some(id.clone());
        }

        info!(
            room_id = %self.id,
            participant_id = %id,
            player_number,
            is_host,
            "Participant joined"
        );

        if self.is_full() {
            self.start_game();
        }

        Ok(Seat {
            player_number,
            is_host,
        })
    }

    /// Remove a participant. Unknown ids are a no-op.
    pub fn remove_participant(&mut self, id: &ParticipantId) -> Option<Departure> {
        let index = self.participants.iter().position(|p| &p.id == id)?;
        let departed = self.participants.remove(index);

        let mut new_host = None;
        if departed.is_host {
            match self.participants.first_mut() {
                Some(next) => {
                    next.is_host = true;
                    self.host_id = Some(next.id.clone());
                    new_host = Some(next.id.clone());
                    info!(room_id = %self.id, host_id = %next.id, "Host migrated");
                }
                None => self.host_id = None,
            }
        }

        let paused = self.sim.pause();

        info!(
            room_id = %self.id,
            participant_id = %id,
            remaining = self.participants.len(),
            paused,
            "Participant left"
        );

        Some(Departure {
            participant_id: departed.id,
            player_number: departed.player_number,
            new_host,
            paused,
        })
    }

    /// Buffer a paddle intent for the tick loop
    pub fn apply_input(&mut self, id: &ParticipantId, direction: PaddleDirection) -> bool {
        let now = self.clock.now_millis();
        match self.participants.iter_mut().find(|p| &p.id == id) {
            Some(participant) => {
                participant.input_direction = direction;
                participant.last_input_time = now;
                true
            }
            None => false,
        }
    }

    /// Take a client's reported paddle position verbatim (clamped)
    pub fn apply_paddle_position(&mut self, id: &ParticipantId, z: f32) -> bool {
        if !z.is_finite() {
            debug!(room_id = %self.id, participant_id = %id, "Ignoring non-finite paddle position");
            return false;
        }
        let Some(side) = self.side_of(id) else {
            return false;
        };
        self.sim.set_paddle_position(side, z);
        true
    }

    /// Host's ball push. Sender authority is checked by the caller.
    pub fn apply_ball_state(&mut self, position: Vector3, velocity: Vector3) -> bool {
        if !position.is_finite() || !velocity.is_finite() {
            debug!(room_id = %self.id, "Ignoring non-finite ball state");
            return false;
        }
        self.sim.set_ball_state(position, velocity);
        self.last_update = self.clock.now_millis();
        true
    }

    /// Host's score push. Sender authority is checked by the caller.
    pub fn apply_score(&mut self, player1: u32, player2: u32) -> ScoreApplied {
        let before = self.sim.scores();
        let ended = self.sim.set_scores(player1, player2);
        self.last_update = self.clock.now_millis();
        if ended {
            info!(room_id = %self.id, player1, player2, "Match ended");
        }
        ScoreApplied {
            changed: before != self.sim.scores(),
            ended,
        }
    }

    /// waiting/paused -> playing, only with a full room
    pub fn start_game(&mut self) -> bool {
        if !self.is_full() || !self.sim.start() {
            return false;
        }
        // the paused interval is not integrated
        let now = self.clock.now_millis();
        self.last_tick = now;
        self.last_update = now;
        info!(room_id = %self.id, "Match playing");
        true
    }

    pub fn pause_game(&mut self) -> bool {
        let paused = self.sim.pause();
        if paused {
            info!(room_id = %self.id, "Match paused");
        }
        paused
    }

    pub fn end_game(&mut self) -> bool {
        self.sim.end()
    }

    /// Zero scores, re-serve, re-center paddles and return to waiting
    pub fn reset_game(&mut self) {
        self.sim.reset();
        for participant in self.participants.iter_mut() {
            participant.input_direction = PaddleDirection::Idle;
        }
        self.seats
            .retain_present(self.participants.iter().map(|p| &p.id));
        let now = self.clock.now_millis();
        self.last_update = now;
        self.last_tick = now;
        info!(room_id = %self.id, "Match reset");
    }

    /// One loop step: integrate paddles from buffered intents over the
    /// wall-clock delta; in server mode also advance the ball.
    pub fn tick(&mut self) -> TickOutcome {
        if self.sim.status() != MatchStatus::Playing {
            return TickOutcome::Idle;
        }

        let now = self.clock.now_millis();
        let dt = delta_secs(self.last_tick, now);
        self.last_tick = now;

        for participant in &self.participants {
            self.sim
                .move_paddle(participant.side(), participant.input_direction, dt);
        }

        match self.options.simulation {
            SimulationMode::Host => TickOutcome::Rally { hit: None },
            SimulationMode::Server => {
                let outcome = self.sim.tick(dt);
                if !matches!(outcome, TickOutcome::Rally { hit: None }) {
                    self.last_update = now;
                }
                outcome
            }
        }
    }

    pub fn state(&self) -> MatchState {
        self.snapshots.build(
            &self.sim,
            self.participant_infos(),
            self.host_id.clone(),
            self.last_update,
        )
    }

    /// Next snapshot to broadcast, if anything changed since the last one
    pub fn publish_snapshot(&mut self) -> Option<MatchState> {
        let state = self.state();
        self.snapshots.publish(state)
    }

    pub fn snapshot_stats(&self) -> &SnapshotStats {
        self.snapshots.stats()
    }

    pub fn player_count(&self) -> usize {
        self.participants.len()
    }

    pub fn is_full(&self) -> bool {
        self.participants.len() >= self.options.max_players
    }

    /// Player numbers a new participant could still get. Seats held for
    /// departed players are not counted.
    pub fn open_seats(&self) -> usize {
        self.seats.open()
    }

    pub fn host_id(&self) -> Option<&ParticipantId> {
        self.host_id.as_ref()
    }

    pub fn is_host(&self, id: &ParticipantId) -> bool {
        self.host_id.as_ref() == Some(id)
    }

    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.participants.iter().any(|p| &p.id == id)
    }

    pub fn participant(&self, id: &ParticipantId) -> Option<ParticipantInfo> {
        self.participants
            .iter()
            .find(|p| &p.id == id)
            .map(|p| self.info(p))
    }

    fn side_of(&self, id: &ParticipantId) -> Option<Side> {
        self.participants
            .iter()
            .find(|p| &p.id == id)
            .map(Participant::side)
    }

    fn info(&self, participant: &Participant) -> ParticipantInfo {
        ParticipantInfo {
            id: participant.id.clone(),
            player_number: participant.player_number,
            paddle_position: self.sim.paddle(participant.side()).z(),
            is_host: participant.is_host,
            input_direction: participant.input_direction,
            last_input_time: participant.last_input_time,
        }
    }

    fn participant_infos(&self) -> Vec<ParticipantInfo> {
        self.participants.iter().map(|p| self.info(p)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::time::ManualClock;

    fn room_with(options: RoomOptions) -> (AuthoritativeRoom, ManualClock) {
        let clock = ManualClock::new(1_000);
        let room = AuthoritativeRoom::with_clock(Uuid::new_v4(), options, Arc::new(clock.clone()));
        (room, clock)
    }

    fn room() -> (AuthoritativeRoom, ManualClock) {
        room_with(RoomOptions::default())
    }

    fn full_room() -> (AuthoritativeRoom, ManualClock) {
        let (mut room, clock) = room();
        room.add_participant("a".into()).expect("a joins");
        room.add_participant("b".into()).expect("b joins");
        (room, clock)
    }

    #[test]
    fn initial_state_is_waiting_with_centered_ball() {
        let (room, _) = room();
        let state = room.state();
        assert_eq!(state.player1_score, 0);
        assert_eq!(state.player2_score, 0);
        assert_eq!(state.status, MatchStatus::Waiting);
        assert!(state.players.is_empty());
        assert_eq!(state.ball.position, Vector3::ZERO);
        assert_eq!(state.ball.velocity.x.abs(), 6.0);
        assert_eq!(room.host_id(), None);
    }

    #[test]
    fn join_order_assigns_numbers_host_and_starts_play() {
        let (mut room, _) = room();

        let a = room.add_participant("a".into()).expect("a joins");
        assert_eq!(a, Seat { player_number: 1, is_host: true });
        assert_eq!(room.host_id(), Some(&ParticipantId::from("a")));
        assert_eq!(room.status(), MatchStatus::Waiting);
        assert!(!room.is_full());

        let b = room.add_participant("b".into()).expect("b joins");
        assert_eq!(b, Seat { player_number: 2, is_host: false });
        assert_eq!(room.status(), MatchStatus::Playing);
        assert!(room.is_full());

        let c = room.add_participant("c".into());
        assert_eq!(c, Err(RoomError::RoomFull));
        assert_eq!(c.unwrap_err().to_string(), "Room is full");
        assert_eq!(room.player_count(), 2);
    }

    #[test]
    fn duplicate_join_is_rejected() {
        let (mut room, _) = room();
        room.add_participant("a".into()).expect("a joins");
        assert_eq!(room.add_participant("a".into()), Err(RoomError::AlreadyJoined));
        assert_eq!(room.player_count(), 1);
    }

    #[test]
    fn host_departure_promotes_remaining_and_pauses() {
        let (mut room, _) = full_room();

        let departure = room.remove_participant(&"a".into()).expect("a was present");
        assert_eq!(departure.new_host, Some(ParticipantId::from("b")));
        assert!(departure.paused);

        let state = room.state();
        assert_eq!(state.players.len(), 1);
        assert!(state.players[0].is_host);
        assert_eq!(room.host_id(), Some(&ParticipantId::from("b")));
        assert_eq!(room.status(), MatchStatus::Paused);
    }

    #[test]
    fn non_host_departure_keeps_host() {
        let (mut room, _) = full_room();
        let departure = room.remove_participant(&"b".into()).expect("b was present");
        assert_eq!(departure.new_host, None);
        assert_eq!(room.host_id(), Some(&ParticipantId::from("a")));
    }

    #[test]
    fn removing_unknown_participant_is_noop() {
        let (mut room, _) = full_room();
        assert!(room.remove_participant(&"zed".into()).is_none());
        assert_eq!(room.player_count(), 2);
        assert_eq!(room.status(), MatchStatus::Playing);
    }

    #[test]
    fn last_departure_clears_host() {
        let (mut room, _) = room();
        room.add_participant("a".into()).expect("a joins");
        room.remove_participant(&"a".into());
        assert_eq!(room.host_id(), None);
        assert_eq!(room.player_count(), 0);
    }

    #[test]
    fn rejoin_reclaims_seat_and_resumes() {
        let (mut room, _) = full_room();
        room.remove_participant(&"a".into());

        assert_eq!(room.add_participant("c".into()), Err(RoomError::SeatsClaimed));

        let seat = room.add_participant("a".into()).expect("a rejoins");
        assert_eq!(seat.player_number, 1);
        // b inherited host while a was gone
        assert!(!seat.is_host);
        assert_eq!(room.status(), MatchStatus::Playing);
    }

    #[test]
    fn reset_frees_seats_of_departed_players() {
        let (mut room, _) = full_room();
        room.remove_participant(&"a".into());
        room.reset_game();
        let seat = room.add_participant("c".into()).expect("c takes the freed seat");
        assert_eq!(seat.player_number, 1);
    }

    #[test]
    fn input_is_buffered_not_applied() {
        let (mut room, clock) = full_room();
        clock.advance(5);
        assert!(room.apply_input(&"a".into(), PaddleDirection::Up));

        let a = room.participant(&"a".into()).expect("a present");
        assert_eq!(a.input_direction, PaddleDirection::Up);
        assert_eq!(a.last_input_time, 1_005);
        assert_eq!(a.paddle_position, 0.0);

        assert!(!room.apply_input(&"ghost".into(), PaddleDirection::Down));
    }

    #[test]
    fn tick_integrates_paddles_over_wall_clock_delta() {
        let (mut room, clock) = full_room();
        room.apply_input(&"a".into(), PaddleDirection::Up);
        room.apply_input(&"b".into(), PaddleDirection::Down);

        clock.advance(250);
        room.tick();

        let state = room.state();
        assert_eq!(state.paddles.left.z, 2.0);
        assert_eq!(state.paddles.right.z, -2.0);
        // ball untouched in host mode
        assert_eq!(state.ball.position, Vector3::ZERO);
    }

    #[test]
    fn tick_is_noop_while_not_playing() {
        let (mut room, clock) = full_room();
        room.apply_input(&"a".into(), PaddleDirection::Up);
        room.pause_game();
        let before = room.state();

        clock.advance(1_000);
        assert_eq!(room.tick(), TickOutcome::Idle);
        assert_eq!(room.state(), before);
    }

    #[test]
    fn resume_does_not_integrate_paused_interval() {
        let (mut room, clock) = full_room();
        room.apply_input(&"a".into(), PaddleDirection::Up);
        room.pause_game();

        clock.advance(10_000);
        assert!(room.start_game());
        clock.advance(125);
        room.tick();
        assert_eq!(room.state().paddles.left.z, 1.0);
    }

    #[test]
    fn paddle_position_is_clamped() {
        let (mut room, _) = full_room();
        assert!(room.apply_paddle_position(&"a".into(), 2.5));
        assert_eq!(room.participant(&"a".into()).map(|p| p.paddle_position), Some(2.5));

        room.apply_paddle_position(&"a".into(), 10.0);
        assert_eq!(room.participant(&"a".into()).map(|p| p.paddle_position), Some(4.0));

        assert!(!room.apply_paddle_position(&"a".into(), f32::NAN));
        assert!(!room.apply_paddle_position(&"ghost".into(), 1.0));
    }

    #[test]
    fn ball_state_is_stored_and_stamped() {
        let (mut room, clock) = full_room();
        clock.advance(40);
        assert!(room.apply_ball_state(Vector3::new(1.0, 0.0, 2.0), Vector3::new(-6.0, 0.0, 1.0)));
        let state = room.state();
        assert_eq!(state.ball.position, Vector3::new(1.0, 0.0, 2.0));
        assert_eq!(state.ball.velocity, Vector3::new(-6.0, 0.0, 1.0));
        assert_eq!(state.last_update, 1_040);

        assert!(!room.apply_ball_state(Vector3::new(f32::INFINITY, 0.0, 0.0), Vector3::ZERO));
    }

    #[test]
    fn winning_score_ends_match() {
        let (mut room, _) = full_room();
        let partial = room.apply_score(3, 2);
        assert_eq!(partial, ScoreApplied { changed: true, ended: false });
        assert_eq!(room.status(), MatchStatus::Playing);
        assert_eq!(room.state().ball.position, Vector3::ZERO);

        let winning = room.apply_score(5, 2);
        assert!(winning.ended);
        assert_eq!(room.status(), MatchStatus::Ended);
        assert!(!room.start_game());
    }

    #[test]
    fn winning_score_pushed_while_waiting_is_final() {
        let (mut room, clock) = room_with(RoomOptions {
            simulation: SimulationMode::Server,
            ..RoomOptions::default()
        });
        room.add_participant("a".into()).expect("a joins");

        let applied = room.apply_score(5, 2);
        assert!(applied.ended);
        assert_eq!(room.status(), MatchStatus::Ended);

        room.add_participant("b".into()).expect("b joins");
        assert_eq!(room.status(), MatchStatus::Ended);

        room.apply_ball_state(Vector3::new(7.4, 0.0, 0.0), Vector3::new(6.0, 0.0, 0.0));
        clock.advance(100);
        assert_eq!(room.tick(), TickOutcome::Idle);
        assert_eq!(room.scores(), (5, 2));
    }

    #[test]
    fn open_seats_skip_reserved_numbers() {
        let (mut room, _) = full_room();
        assert_eq!(room.open_seats(), 0);
        room.remove_participant(&"b".into());
        assert_eq!(room.open_seats(), 0);
        room.reset_game();
        assert_eq!(room.open_seats(), 1);
    }

    #[test]
    fn scores_never_exceed_max() {
        let (mut room, _) = full_room();
        room.apply_score(12, 0);
        assert_eq!(room.scores(), (5, 0));
    }

    #[test]
    fn pause_twice_changes_nothing_more() {
        let (mut room, _) = full_room();
        assert!(room.pause_game());
        let once = room.state();
        assert!(!room.pause_game());
        assert_eq!(room.state(), once);
    }

    #[test]
    fn start_requires_full_room() {
        let (mut room, _) = room();
        room.add_participant("a".into()).expect("a joins");
        assert!(!room.start_game());
        assert_eq!(room.status(), MatchStatus::Waiting);
    }

    #[test]
    fn reset_returns_to_waiting_with_zero_scores() {
        let (mut room, _) = full_room();
        room.apply_score(3, 2);
        room.apply_paddle_position(&"b".into(), -3.0);
        room.reset_game();

        let state = room.state();
        assert_eq!(state.player1_score, 0);
        assert_eq!(state.player2_score, 0);
        assert_eq!(state.status, MatchStatus::Waiting);
        assert_eq!(state.paddles.right.z, 0.0);
        assert_eq!(state.players.len(), 2);
    }

    #[test]
    fn server_mode_ticks_ball_physics() {
        let (mut room, clock) = room_with(RoomOptions {
            simulation: SimulationMode::Server,
            ..RoomOptions::default()
        });
        room.add_participant("a".into()).expect("a joins");
        room.add_participant("b".into()).expect("b joins");
        room.apply_ball_state(Vector3::new(7.4, 0.0, -3.0), Vector3::new(6.0, 0.0, 0.0));

        clock.advance(100);
        let outcome = room.tick();
        assert_eq!(outcome, TickOutcome::Point { conceded: Side::Right });
        assert_eq!(room.scores(), (1, 0));
    }

    #[test]
    fn snapshots_publish_only_on_change() {
        let (mut room, clock) = full_room();
        assert!(room.publish_snapshot().is_some());
        clock.advance(16);
        room.tick();
        assert!(room.publish_snapshot().is_none());

        room.apply_paddle_position(&"a".into(), 1.0);
        let next = room.publish_snapshot().expect("paddle moved");
        assert_eq!(next.seq, 2);
    }
}
