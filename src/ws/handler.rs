//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::http::AppError;
use crate::room::{Outbound, ParticipantId, PlayerInput, RoomHandle};
use crate::util::rate_limit::SessionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Query parameters for WebSocket connection
#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    /// Join this room
    pub room: Option<Uuid>,
    /// Create a fresh room and join it
    #[serde(default)]
    pub create: bool,
    /// Session id to resume; a fresh one is generated otherwise
    pub participant: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    let room = resolve_room(&state, &query)?;

    let participant_id = query
        .participant
        .filter(|p| !p.trim().is_empty())
        .map(ParticipantId::from)
        .unwrap_or_else(ParticipantId::generate);

    info!(room_id = %room.id, participant_id = %participant_id, "WebSocket upgrade");
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, room, participant_id)))
}

/// Pick the room a connection goes to: explicit id, a new room, or the first
/// room with a free seat
fn resolve_room(state: &AppState, query: &WsQuery) -> Result<RoomHandle, AppError> {
    if query.create {
        if state.room_create_limiter.check().is_err() {
            return Err(AppError::TooManyRequests);
        }
        return Ok(state.rooms.create_room());
    }

    match query.room {
        Some(id) => state
            .rooms
            .get(&id)
            .ok_or_else(|| AppError::NotFound(format!("Room {} not found", id))),
        None => match state.rooms.find_available_room() {
            Some(room) => Ok(room),
            None => {
                if state.room_create_limiter.check().is_err() {
                    return Err(AppError::TooManyRequests);
                }
                Ok(state.rooms.create_room())
            }
        },
    }
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, room: RoomHandle, participant_id: ParticipantId) {
    info!(room_id = %room.id, participant_id = %participant_id, "New WebSocket connection");

    let (mut ws_sink, ws_stream) = socket.split();

    // Subscribe before joining so nothing the join triggers is missed
    let events = room.subscribe();

    let joined = match room.join(participant_id.clone()).await {
        Ok(joined) => joined,
        Err(e) => {
            warn!(room_id = %room.id, participant_id = %participant_id, error = %e, "Join failed");
            let msg = ServerMsg::Error {
                code: e.code().to_string(),
                message: e.to_string(),
            };
            let _ = send_msg(&mut ws_sink, &msg).await;
            let _ = ws_sink.close().await;
            return;
        }
    };

    let welcome = ServerMsg::Welcome {
        room_id: room.id,
        participant_id: participant_id.clone(),
        player_number: joined.seat.player_number,
        is_host: joined.seat.is_host,
        server_time: unix_millis(),
    };

    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(participant_id = %participant_id, error = %e, "Failed to send welcome");
        room.leave(participant_id, "disconnected").await;
        return;
    }

    run_session(&participant_id, &room, ws_sink, ws_stream, events).await;

    // Cleanup on disconnect; a no-op if the client already left
    room.leave(participant_id.clone(), "disconnected").await;

    info!(room_id = %room.id, participant_id = %participant_id, "WebSocket connection closed");
}

/// Run the WebSocket session with read/write split
async fn run_session(
    participant_id: &ParticipantId,
    room: &RoomHandle,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut ws_stream: SplitStream<WebSocket>,
    mut events: broadcast::Receiver<Outbound>,
) {
    let rate_limiter = SessionRateLimiter::new();

    // Spawn writer task: room events -> WebSocket
    let writer_id = participant_id.clone();
    let writer_handle = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if !event.is_for(&writer_id) {
                        continue;
                    }
                    if let Err(e) = send_msg(&mut ws_sink, &event.msg).await {
                        debug!(participant_id = %writer_id, error = %e, "WebSocket send failed");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(
                        participant_id = %writer_id,
                        lagged_count = n,
                        "Client lagged, skipping {} events", n
                    );
                    // Continue - the next state snapshot is complete
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(participant_id = %writer_id, "Room event channel closed");
                    let _ = ws_sink.close().await;
                    break;
                }
            }
        }
    });

    // Reader loop: WebSocket -> room task
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_input() {
                    warn!(participant_id = %participant_id, "Rate limited input message");
                    continue;
                }

                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(client_msg) => {
                        let leaving = client_msg == ClientMsg::LeaveRoom;
                        let input = PlayerInput {
                            participant_id: participant_id.clone(),
                            msg: client_msg,
                            received_at: unix_millis(),
                        };

                        if room.send(input).await.is_err() {
                            debug!(participant_id = %participant_id, "Room closed");
                            break;
                        }
                        if leaving {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(participant_id = %participant_id, error = %e, "Failed to parse client message");
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(participant_id = %participant_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(participant_id = %participant_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(participant_id = %participant_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    writer_handle.abort();
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut SplitSink<WebSocket, Message>, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
