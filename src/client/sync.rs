//! The sync client

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::game::{PaddleDirection, Vector3};
use crate::room::{ParticipantId, RoomRegistry};
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, MatchState, ParticipantInfo, ServerMsg};

use super::transport::{Connection, Endpoint, RoomTarget};
use super::{ClientError, ClientEvent, ConnectionStatus, ConnectionUpdate, SessionInfo};

/// A rejoin can race the room still processing our previous departure
const REJOIN_ATTEMPTS: u32 = 5;
const REJOIN_BACKOFF: Duration = Duration::from_millis(100);

/// One slot per category; registering replaces the previous listener
#[derive(Default)]
struct Listeners {
    state_changed: Option<Arc<dyn Fn(&MatchState) + Send + Sync>>,
    player_joined: Option<Arc<dyn Fn(&ParticipantInfo) + Send + Sync>>,
    player_left: Option<Arc<dyn Fn(&ParticipantId) + Send + Sync>>,
    connection_status: Option<Arc<dyn Fn(&ConnectionUpdate) + Send + Sync>>,
    match_started: Option<Arc<dyn Fn() + Send + Sync>>,
    score_updated: Option<Arc<dyn Fn(u32, u32) + Send + Sync>>,
}

/// Local view of the seat this client holds
#[derive(Debug, Default)]
struct SeatView {
    player_id: Option<ParticipantId>,
    player_number: u8,
    is_host: bool,
    room_id: Option<Uuid>,
    /// Room of the latest session, kept after leaving for `rejoin`
    last_room_id: Option<Uuid>,
    status: ConnectionStatus,
    latency_ms: Option<u64>,
}

/// State shared with the dispatch task
struct Shared {
    seat: RwLock<SeatView>,
    listeners: Mutex<Listeners>,
    events_tx: broadcast::Sender<ClientEvent>,
    disposed: AtomicBool,
}

struct Session {
    outbound: mpsc::UnboundedSender<ClientMsg>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
    dispatch: JoinHandle<()>,
}

/// Client session with a room.
///
/// Sends are fire-and-forget and never block. Room messages are dispatched
/// on a background task to the registered listeners and to every
/// `subscribe` receiver.
/// Host-only sends are dropped locally unless this session is the host.
pub struct SyncClient {
    endpoint: Mutex<Endpoint>,
    shared: Arc<Shared>,
    session: Mutex<Option<Session>>,
}

impl SyncClient {
    /// Client for a room server, e.g. `ws://localhost:8080`
    pub fn new(server_url: impl Into<String>) -> Self {
        Self::with_endpoint(Endpoint::Remote {
            base_url: server_url.into(),
        })
    }

    /// Client for rooms hosted in this process
    pub fn local(registry: Arc<RoomRegistry>) -> Self {
        Self::with_endpoint(Endpoint::Local(registry))
    }

    pub fn with_endpoint(endpoint: Endpoint) -> Self {
        let (events_tx, _) = broadcast::channel(256);
        Self {
            endpoint: Mutex::new(endpoint),
            shared: Arc::new(Shared {
                seat: RwLock::new(SeatView::default()),
                listeners: Mutex::new(Listeners::default()),
                events_tx,
                disposed: AtomicBool::new(false),
            }),
            session: Mutex::new(None),
        }
    }

    /// Create a room and take seat 1 as host
    pub async fn create_room(&self) -> Result<SessionInfo, ClientError> {
        self.connect(RoomTarget::Create).await
    }

    /// Join a known room by id
    pub async fn join_room(&self, room_id: Uuid) -> Result<SessionInfo, ClientError> {
        self.connect(RoomTarget::Join(room_id)).await
    }

    /// Join the first room with a free seat on the server at `host:port`
    pub async fn join_by_address(&self, host: &str, port: u16) -> Result<SessionInfo, ClientError> {
        *self.endpoint.lock() = Endpoint::Remote {
            base_url: format!("ws://{}:{}", host, port),
        };
        self.connect(RoomTarget::Any).await
    }

    /// Reconnect to the latest room under the same session id. The room
    /// keeps that player number reserved, so a paused match resumes with
    /// this client in its old seat.
    pub async fn rejoin(&self) -> Result<SessionInfo, ClientError> {
        let (room_id, participant_id) = {
            let seat = self.shared.seat.read();
            match (seat.last_room_id, seat.player_id.clone()) {
                (Some(room_id), Some(participant_id)) => (room_id, participant_id),
                _ => return Err(ClientError::NothingToRejoin),
            }
        };
        let target = RoomTarget::Rejoin {
            room_id,
            participant_id,
        };

        let mut attempt = 1;
        loop {
            match self.connect(target.clone()).await {
                Err(ClientError::Rejected { ref code, .. })
                    if code == "already_joined" && attempt < REJOIN_ATTEMPTS =>
                {
                    debug!(attempt, "Previous session still seated, retrying rejoin");
                    attempt += 1;
                    tokio::time::sleep(REJOIN_BACKOFF).await;
                }
                result => return result,
            }
        }
    }

    async fn connect(&self, target: RoomTarget) -> Result<SessionInfo, ClientError> {
        if self.shared.is_disposed() {
            return Err(ClientError::Disposed);
        }

        self.leave_room();
        self.shared.set_status(ConnectionStatus::Connecting, None);

        let endpoint = self.endpoint.lock().clone();
        let connection = match endpoint.connect(target).await {
            Ok(connection) => connection,
            Err(e) => {
                warn!(error = %e, "Failed to enter room");
                self.shared
                    .set_status(ConnectionStatus::Error, Some(e.to_string()));
                return Err(e);
            }
        };

        let Connection {
            room_id,
            participant_id,
            player_number,
            is_host,
            outbound,
            inbound,
            writer,
            reader,
        } = connection;

        // disposed while connecting
        if self.shared.is_disposed() {
            writer.abort();
            reader.abort();
            return Err(ClientError::Disposed);
        }

        {
            let mut seat = self.shared.seat.write();
            seat.player_id = Some(participant_id.clone());
            seat.player_number = player_number;
            seat.is_host = is_host;
            seat.room_id = Some(room_id);
            seat.last_room_id = Some(room_id);
            seat.latency_ms = None;
        }
        self.shared.set_status(ConnectionStatus::Connected, None);

        let dispatch = tokio::spawn(Shared::dispatch_loop(self.shared.clone(), inbound));
        *self.session.lock() = Some(Session {
            outbound,
            writer,
            reader,
            dispatch,
        });

        info!(
            room_id = %room_id,
            participant_id = %participant_id,
            player_number,
            is_host,
            "Entered room"
        );

        Ok(SessionInfo {
            room_id,
            participant_id,
            player_number,
            is_host,
        })
    }

    /// Report the local paddle intent
    pub fn send_input(&self, direction: PaddleDirection) {
        let Some(player_id) = self.player_id() else {
            return;
        };
        self.send(ClientMsg::PlayerInput {
            player_id,
            direction,
            timestamp: unix_millis(),
        });
    }

    /// Report the locally simulated paddle position
    pub fn send_paddle_position(&self, position: f32) {
        let Some(player_id) = self.player_id() else {
            return;
        };
        self.send(ClientMsg::PaddlePosition {
            player_id,
            position,
            timestamp: unix_millis(),
        });
    }

    pub fn send_ball_state(&self, position: Vector3, velocity: Vector3) {
        self.send_as_host(ClientMsg::BallState {
            position,
            velocity,
            timestamp: unix_millis(),
        });
    }

    pub fn send_score_update(&self, player1_score: u32, player2_score: u32) {
        self.send_as_host(ClientMsg::ScoreUpdate {
            player1_score,
            player2_score,
            timestamp: unix_millis(),
        });
    }

    pub fn start_game(&self) {
        self.send_as_host(ClientMsg::StartGame);
    }

    pub fn pause_game(&self) {
        self.send_as_host(ClientMsg::PauseGame);
    }

    pub fn reset_game(&self) {
        self.send_as_host(ClientMsg::ResetGame);
    }

    /// Measure round-trip time; the result shows up in `latency_ms`
    pub fn ping(&self) {
        self.send(ClientMsg::Ping { t: unix_millis() });
    }

    fn send_as_host(&self, msg: ClientMsg) {
        if !self.is_host() {
            debug!(?msg, "Host-only message dropped, not host");
            return;
        }
        self.send(msg);
    }

    fn send(&self, msg: ClientMsg) {
        if let Some(session) = self.session.lock().as_ref() {
            // a closed session swallows sends
            let _ = session.outbound.send(msg);
        }
    }

    /// Leave the current room. Safe to call repeatedly.
    pub fn leave_room(&self) {
        let Some(session) = self.session.lock().take() else {
            return;
        };

        session.dispatch.abort();
        let _ = session.outbound.send(ClientMsg::LeaveRoom);
        // dropping the sender lets the writer flush the leave and finish
        drop(session.outbound);
        drop(session.writer);
        session.reader.abort();

        {
            let mut seat = self.shared.seat.write();
            seat.is_host = false;
            seat.player_number = 0;
            seat.room_id = None;
        }
        if self.shared.seat.read().status != ConnectionStatus::Disconnected {
            self.shared.set_status(ConnectionStatus::Disconnected, None);
        }
    }

    /// Leave and drop all listeners. Later connects fail with `Disposed` and
    /// sends are no-ops.
    pub fn dispose(&self) {
        self.leave_room();
        self.shared.disposed.store(true, Ordering::SeqCst);
        *self.shared.listeners.lock() = Listeners::default();
    }

    // ------------------------------------------------------------------
    // Listeners
    // ------------------------------------------------------------------

    pub fn on_state_change(&self, listener: impl Fn(&MatchState) + Send + Sync + 'static) {
        self.shared.listeners.lock().state_changed = Some(Arc::new(listener));
    }

    pub fn on_player_joined(&self, listener: impl Fn(&ParticipantInfo) + Send + Sync + 'static) {
        self.shared.listeners.lock().player_joined = Some(Arc::new(listener));
    }

    pub fn on_player_left(&self, listener: impl Fn(&ParticipantId) + Send + Sync + 'static) {
        self.shared.listeners.lock().player_left = Some(Arc::new(listener));
    }

    pub fn on_connection_status_change(
        &self,
        listener: impl Fn(&ConnectionUpdate) + Send + Sync + 'static,
    ) {
        self.shared.listeners.lock().connection_status = Some(Arc::new(listener));
    }

    pub fn on_match_started(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.shared.listeners.lock().match_started = Some(Arc::new(listener));
    }

    pub fn on_score_update(&self, listener: impl Fn(u32, u32) + Send + Sync + 'static) {
        self.shared.listeners.lock().score_updated = Some(Arc::new(listener));
    }

    /// Every event, for any number of consumers
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.shared.events_tx.subscribe()
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn player_id(&self) -> Option<ParticipantId> {
        self.shared.seat.read().player_id.clone()
    }

    /// 1 or 2 while seated, 0 otherwise
    pub fn player_number(&self) -> u8 {
        self.shared.seat.read().player_number
    }

    pub fn is_host(&self) -> bool {
        self.shared.seat.read().is_host
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.shared.seat.read().status
    }

    pub fn room_id(&self) -> Option<Uuid> {
        self.shared.seat.read().room_id
    }

    pub fn is_connected(&self) -> bool {
        self.connection_status() == ConnectionStatus::Connected && self.session.lock().is_some()
    }

    /// Last measured round trip
    pub fn latency_ms(&self) -> Option<u64> {
        self.shared.seat.read().latency_ms
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        self.leave_room();
    }
}

impl Shared {
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    async fn dispatch_loop(shared: Arc<Shared>, mut inbound: mpsc::UnboundedReceiver<ServerMsg>) {
        while let Some(msg) = inbound.recv().await {
            shared.dispatch(msg);
        }
        debug!("Room connection closed");
        shared.set_status(
            ConnectionStatus::Disconnected,
            Some("connection closed".to_string()),
        );
    }

    fn dispatch(&self, msg: ServerMsg) {
        match msg {
            ServerMsg::State { state } => {
                self.adopt_seat(&state);
                let listener = self.listeners.lock().state_changed.clone();
                if let Some(listener) = listener {
                    listener(&state);
                }
                self.emit(ClientEvent::StateChanged(state));
            }
            ServerMsg::PlayerJoined { participant } => {
                {
                    let mut seat = self.seat.write();
                    if seat.player_id.as_ref() == Some(&participant.id) {
                        seat.player_number = participant.player_number;
                        seat.is_host = participant.is_host;
                    }
                }
                let listener = self.listeners.lock().player_joined.clone();
                if let Some(listener) = listener {
                    listener(&participant);
                }
                self.emit(ClientEvent::PlayerJoined(participant));
            }
            ServerMsg::PlayerLeft { participant_id, .. } => {
                let listener = self.listeners.lock().player_left.clone();
                if let Some(listener) = listener {
                    listener(&participant_id);
                }
                self.emit(ClientEvent::PlayerLeft(participant_id));
            }
            ServerMsg::HostChanged { ref host_id } => {
                {
                    let mut seat = self.seat.write();
                    seat.is_host = seat.player_id.as_ref() == Some(host_id);
                }
                self.emit(ClientEvent::Message(msg));
            }
            ServerMsg::MatchStarted { .. } => {
                let listener = self.listeners.lock().match_started.clone();
                if let Some(listener) = listener {
                    listener();
                }
                self.emit(ClientEvent::MatchStarted);
            }
            ServerMsg::ScoreUpdate {
                player1_score,
                player2_score,
                ..
            } => {
                let listener = self.listeners.lock().score_updated.clone();
                if let Some(listener) = listener {
                    listener(player1_score, player2_score);
                }
                self.emit(ClientEvent::ScoreUpdated {
                    player1_score,
                    player2_score,
                });
            }
            ServerMsg::Pong { t } => {
                self.seat.write().latency_ms = Some(unix_millis().saturating_sub(t));
                self.emit(ClientEvent::Message(msg));
            }
            ServerMsg::Error {
                ref code,
                ref message,
            } => {
                warn!(code = %code, message = %message, "Room reported an error");
                self.set_status(ConnectionStatus::Error, Some(message.clone()));
                self.emit(ClientEvent::Message(msg));
            }
            other => self.emit(ClientEvent::Message(other)),
        }
    }

    /// Follow the room's view of our seat; host migration lands here
    fn adopt_seat(&self, state: &MatchState) {
        let mut seat = self.seat.write();
        let Some(id) = seat.player_id.clone() else {
            return;
        };
        if let Some(me) = state.participant(&id) {
            seat.player_number = me.player_number;
            seat.is_host = me.is_host;
        }
    }

    fn set_status(&self, status: ConnectionStatus, message: Option<String>) {
        self.seat.write().status = status;
        let update = ConnectionUpdate { status, message };
        let listener = self.listeners.lock().connection_status.clone();
        if let Some(listener) = listener {
            listener(&update);
        }
        self.emit(ClientEvent::ConnectionStatusChanged(update));
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events_tx.send(event);
    }
}
