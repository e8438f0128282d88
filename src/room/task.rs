//! Room actor: one tokio task per room, owning its `AuthoritativeRoom`

use std::future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::game::{MatchStatus, TickOutcome};
use crate::util::time::{tick_period, unix_millis};
use crate::ws::protocol::{ClientMsg, MatchState, ServerMsg};

use super::authoritative::{AuthoritativeRoom, AuthorityPolicy, RoomError, SimulationMode};
use super::participant::{ParticipantId, Seat};

/// Inbound frame from a session, tagged with who sent it
#[derive(Debug, Clone)]
pub struct PlayerInput {
    pub participant_id: ParticipantId,
    pub msg: ClientMsg,
    pub received_at: u64,
}

/// Successful join
#[derive(Debug, Clone)]
pub struct Joined {
    pub seat: Seat,
    pub state: MatchState,
}

/// Commands accepted by the room task
#[derive(Debug)]
pub enum RoomCommand {
    Join {
        participant_id: ParticipantId,
        reply: oneshot::Sender<Result<Joined, RoomError>>,
    },
    Input(PlayerInput),
    Leave {
        participant_id: ParticipantId,
        reason: String,
    },
    Snapshot {
        reply: oneshot::Sender<MatchState>,
    },
    Shutdown,
}

/// A server message on the room's event channel. `to: None` reaches every
/// session; otherwise only the named one.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub to: Option<ParticipantId>,
    pub msg: ServerMsg,
}

impl Outbound {
    pub fn all(msg: ServerMsg) -> Self {
        Self { to: None, msg }
    }

    pub fn to(participant_id: ParticipantId, msg: ServerMsg) -> Self {
        Self {
            to: Some(participant_id),
            msg,
        }
    }

    pub fn is_for(&self, participant_id: &ParticipantId) -> bool {
        self.to.as_ref().map_or(true, |to| to == participant_id)
    }
}

/// Handle to a running room
#[derive(Clone)]
pub struct RoomHandle {
    pub id: Uuid,
    command_tx: mpsc::Sender<RoomCommand>,
    events_tx: broadcast::Sender<Outbound>,
    player_count: Arc<AtomicUsize>,
    open_seats: Arc<AtomicUsize>,
}

impl RoomHandle {
    /// Claim a seat. Subscribe first to see every event that follows.
    pub async fn join(&self, participant_id: ParticipantId) -> Result<Joined, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(RoomCommand::Join {
                participant_id,
                reply,
            })
            .await
            .map_err(|_| RoomError::Closed)?;
        rx.await.map_err(|_| RoomError::Closed)?
    }

    pub async fn send(&self, input: PlayerInput) -> Result<(), RoomError> {
        self.command_tx
            .send(RoomCommand::Input(input))
            .await
            .map_err(|_| RoomError::Closed)
    }

    pub async fn leave(&self, participant_id: ParticipantId, reason: impl Into<String>) {
        let _ = self
            .command_tx
            .send(RoomCommand::Leave {
                participant_id,
                reason: reason.into(),
            })
            .await;
    }

    pub async fn snapshot(&self) -> Result<MatchState, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(RoomCommand::Snapshot { reply })
            .await
            .map_err(|_| RoomError::Closed)?;
        rx.await.map_err(|_| RoomError::Closed)
    }

    pub async fn shutdown(&self) {
        let _ = self.command_tx.send(RoomCommand::Shutdown).await;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Outbound> {
        self.events_tx.subscribe()
    }

    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed)
    }

    /// Seats a newcomer could take; seats held for departed players excluded
    pub fn open_seats(&self) -> usize {
        self.open_seats.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.command_tx.is_closed()
    }
}

/// The 60 Hz tick. Only exists while the match is playing.
#[derive(Default)]
struct TickLoop {
    interval: Option<Interval>,
}

impl TickLoop {
    fn start(&mut self) {
        if self.interval.is_none() {
            let period = tick_period();
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            self.interval = Some(interval);
        }
    }

    fn stop(&mut self) {
        self.interval = None;
    }

    /// Resolves on the next tick; never resolves while stopped
    async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => future::pending::<()>().await,
        }
    }
}

/// Resolves once an empty room's deadline passes; never while occupied
async fn empty_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => future::pending::<()>().await,
    }
}

enum Wake {
    Command(RoomCommand),
    Tick,
    EmptyTimeout,
    Closed,
}

#[derive(PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// The room task
pub struct RoomTask {
    room: AuthoritativeRoom,
    command_rx: mpsc::Receiver<RoomCommand>,
    events_tx: broadcast::Sender<Outbound>,
    player_count: Arc<AtomicUsize>,
    open_seats: Arc<AtomicUsize>,
    ticker: TickLoop,
    /// Set while nobody is in the room
    empty_until: Option<Instant>,
}

impl RoomTask {
    pub fn new(room: AuthoritativeRoom) -> (Self, RoomHandle) {
        let (command_tx, command_rx) = mpsc::channel(256);
        let (events_tx, _) = broadcast::channel(256);
        let player_count = Arc::new(AtomicUsize::new(0));
        let open_seats = Arc::new(AtomicUsize::new(room.open_seats()));

        let handle = RoomHandle {
            id: room.id(),
            command_tx,
            events_tx: events_tx.clone(),
            player_count: player_count.clone(),
            open_seats: open_seats.clone(),
        };

        let task = Self {
            room,
            command_rx,
            events_tx,
            player_count,
            open_seats,
            ticker: TickLoop::default(),
            empty_until: None,
        };

        (task, handle)
    }

    /// Serve commands and ticks until the last participant leaves, nobody
    /// joins within the empty timeout, or the room is shut down
    pub async fn run(mut self) {
        info!(room_id = %self.room.id(), "Room opened");
        self.sync_empty_deadline();

        loop {
            let wake = tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(command) => Wake::Command(command),
                    None => Wake::Closed,
                },
                _ = self.ticker.tick() => Wake::Tick,
                _ = empty_deadline(self.empty_until) => Wake::EmptyTimeout,
            };

            let flow = match wake {
                Wake::Command(RoomCommand::Shutdown) | Wake::Closed => Flow::Close,
                Wake::EmptyTimeout => {
                    info!(room_id = %self.room.id(), "Room stayed empty, closing");
                    Flow::Close
                }
                Wake::Command(command) => self.handle_command(command),
                Wake::Tick => {
                    self.on_tick();
                    Flow::Continue
                }
            };

            if flow == Flow::Close {
                break;
            }

            self.sync_ticker();
            self.sync_empty_deadline();
            self.broadcast_state();
        }

        self.ticker.stop();
        let stats = self.room.snapshot_stats();
        info!(
            room_id = %self.room.id(),
            snapshots_sent = stats.total_snapshots,
            avg_players = stats.avg_players_per_snapshot,
            "Room closed"
        );
    }

    fn handle_command(&mut self, command: RoomCommand) -> Flow {
        match command {
            RoomCommand::Join {
                participant_id,
                reply,
            } => {
                let result = self.handle_join(participant_id);
                let _ = reply.send(result);
                Flow::Continue
            }
            RoomCommand::Input(input) => self.handle_input(input),
            RoomCommand::Leave {
                participant_id,
                reason,
            } => self.handle_leave(&participant_id, reason),
            RoomCommand::Snapshot { reply } => {
                let _ = reply.send(self.room.state());
                Flow::Continue
            }
            RoomCommand::Shutdown => Flow::Close,
        }
    }

    fn handle_join(&mut self, participant_id: ParticipantId) -> Result<Joined, RoomError> {
        let was = self.room.status();
        let seat = match self.room.add_participant(participant_id.clone()) {
            Ok(seat) => seat,
            Err(e) => {
                warn!(
                    room_id = %self.room.id(),
                    participant_id = %participant_id,
                    error = %e,
                    "Join rejected"
                );
                return Err(e);
            }
        };
        self.update_player_count();

        if let Some(participant) = self.room.participant(&participant_id) {
            self.emit(Outbound::all(ServerMsg::PlayerJoined { participant }));
        }
        self.emit_status_change(was);

        Ok(Joined {
            seat,
            state: self.room.state(),
        })
    }

    fn handle_input(&mut self, input: PlayerInput) -> Flow {
        let PlayerInput {
            participant_id: sender,
            msg,
            ..
        } = input;

        if let ClientMsg::Ping { t } = msg {
            self.emit(Outbound::to(sender, ServerMsg::Pong { t }));
            return Flow::Continue;
        }

        if !self.room.contains(&sender) {
            debug!(room_id = %self.room.id(), participant_id = %sender, "Message from non-participant dropped");
            return Flow::Continue;
        }

        if matches!(
            msg,
            ClientMsg::StartGame | ClientMsg::PauseGame | ClientMsg::ResetGame
        ) && !self.room.is_host(&sender)
        {
            debug!(room_id = %self.room.id(), participant_id = %sender, "Match control from non-host dropped");
            return Flow::Continue;
        }

        let was = self.room.status();
        match msg {
            ClientMsg::PlayerInput { direction, .. } => {
                self.room.apply_input(&sender, direction);
            }
            ClientMsg::PaddlePosition { position, .. } => {
                self.room.apply_paddle_position(&sender, position);
            }
            ClientMsg::BallState {
                position, velocity, ..
            } => {
                if self.accepts_push(&sender) {
                    self.room.apply_ball_state(position, velocity);
                }
            }
            ClientMsg::ScoreUpdate {
                player1_score,
                player2_score,
                ..
            } => {
                if self.accepts_push(&sender) {
                    let applied = self.room.apply_score(player1_score, player2_score);
                    if applied.changed {
                        self.emit_scores();
                    }
                }
            }
            ClientMsg::StartGame => {
                self.room.start_game();
            }
            ClientMsg::PauseGame => {
                self.room.pause_game();
            }
            ClientMsg::ResetGame => {
                self.room.reset_game();
                self.update_player_count();
                self.emit(Outbound::all(ServerMsg::MatchReset {
                    timestamp: unix_millis(),
                }));
            }
            ClientMsg::LeaveRoom => return self.handle_leave(&sender, "left".to_string()),
            ClientMsg::Ping { .. } => {}
        }
        self.emit_status_change(was);

        Flow::Continue
    }

    /// Whether a ball or score push from `sender` is believed
    fn accepts_push(&self, sender: &ParticipantId) -> bool {
        let options = self.room.options();
        if options.simulation == SimulationMode::Server {
            debug!(room_id = %self.room.id(), "Push ignored, room simulates the ball");
            return false;
        }
        match options.authority {
            AuthorityPolicy::TrustClient => true,
            AuthorityPolicy::VerifyHost => {
                let host = self.room.is_host(sender);
                if !host {
                    debug!(room_id = %self.room.id(), participant_id = %sender, "Push from non-host dropped");
                }
                host
            }
        }
    }

    fn handle_leave(&mut self, participant_id: &ParticipantId, reason: String) -> Flow {
        let Some(departure) = self.room.remove_participant(participant_id) else {
            return Flow::Continue;
        };
        self.update_player_count();

        self.emit(Outbound::all(ServerMsg::PlayerLeft {
            participant_id: departure.participant_id,
            player_number: departure.player_number,
            reason,
        }));
        if let Some(host_id) = departure.new_host {
            self.emit(Outbound::all(ServerMsg::HostChanged { host_id }));
        }
        if departure.paused {
            self.emit(Outbound::all(ServerMsg::MatchPaused {
                timestamp: unix_millis(),
            }));
        }

        if self.room.player_count() == 0 {
            info!(room_id = %self.room.id(), "Last participant left");
            return Flow::Close;
        }
        Flow::Continue
    }

    fn on_tick(&mut self) {
        match self.room.tick() {
            TickOutcome::Point { .. } => self.emit_scores(),
            TickOutcome::MatchOver { winner } => {
                self.emit_scores();
                info!(room_id = %self.room.id(), winner, "Match won");
                self.emit_status_change(MatchStatus::Playing);
            }
            TickOutcome::Idle | TickOutcome::Rally { .. } => {}
        }
    }

    fn emit_scores(&self) {
        let (player1_score, player2_score) = self.room.scores();
        self.emit(Outbound::all(ServerMsg::ScoreUpdate {
            player1_score,
            player2_score,
            timestamp: unix_millis(),
        }));
    }

    fn emit_status_change(&self, was: MatchStatus) {
        let now = self.room.status();
        if now == was {
            return;
        }
        let timestamp = unix_millis();
        let msg = match now {
            MatchStatus::Playing => ServerMsg::MatchStarted { timestamp },
            MatchStatus::Paused => ServerMsg::MatchPaused { timestamp },
            MatchStatus::Ended => {
                let (player1_score, player2_score) = self.room.scores();
                ServerMsg::MatchEnded {
                    winner: self.room.winner(),
                    player1_score,
                    player2_score,
                }
            }
            // reset announces itself
            MatchStatus::Waiting => return,
        };
        self.emit(Outbound::all(msg));
    }

    fn sync_ticker(&mut self) {
        if self.room.status() == MatchStatus::Playing {
            self.ticker.start();
        } else {
            self.ticker.stop();
        }
    }

    fn sync_empty_deadline(&mut self) {
        if self.room.player_count() > 0 {
            self.empty_until = None;
        } else if self.empty_until.is_none() {
            self.empty_until = Some(Instant::now() + self.room.options().empty_timeout);
        }
    }

    fn broadcast_state(&mut self) {
        if let Some(state) = self.room.publish_snapshot() {
            self.emit(Outbound::all(ServerMsg::State { state }));
        }
    }

    fn update_player_count(&self) {
        self.player_count
            .store(self.room.player_count(), Ordering::Relaxed);
        self.open_seats
            .store(self.room.open_seats(), Ordering::Relaxed);
    }

    fn emit(&self, outbound: Outbound) {
        // no subscribers is fine
        let _ = self.events_tx.send(outbound);
    }
}
