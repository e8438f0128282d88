//! Connections from a client to a room: over WebSocket, or in-process

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::room::{ParticipantId, PlayerInput, RoomHandle, RoomRegistry};
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

use super::ClientError;

/// How long to wait for the room's welcome after connecting
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Where a client's rooms live
#[derive(Clone)]
pub enum Endpoint {
    /// A room server, e.g. `ws://localhost:8080`
    Remote { base_url: String },
    /// Rooms in this process
    Local(Arc<RoomRegistry>),
}

/// Which room to enter
#[derive(Debug, Clone)]
pub enum RoomTarget {
    Create,
    Join(Uuid),
    /// First room with a free seat
    Any,
    /// Back into a room under the same session id, reclaiming its seat
    Rejoin {
        room_id: Uuid,
        participant_id: ParticipantId,
    },
}

/// An established room session
pub struct Connection {
    pub room_id: Uuid,
    pub participant_id: ParticipantId,
    pub player_number: u8,
    pub is_host: bool,
    pub outbound: mpsc::UnboundedSender<ClientMsg>,
    pub inbound: mpsc::UnboundedReceiver<ServerMsg>,
    /// Flushes `outbound`; finishes on its own once the sender is dropped
    pub writer: JoinHandle<()>,
    /// Feeds `inbound`
    pub reader: JoinHandle<()>,
}

impl Endpoint {
    pub async fn connect(&self, target: RoomTarget) -> Result<Connection, ClientError> {
        match self {
            Endpoint::Remote { base_url } => connect_remote(base_url, target).await,
            Endpoint::Local(registry) => connect_local(registry, target).await,
        }
    }
}

fn ws_url(base_url: &str, target: &RoomTarget) -> String {
    let base = base_url.trim_end_matches('/');
    let base = base.strip_suffix("/ws").unwrap_or(base);
    match target {
        RoomTarget::Create => format!("{}/ws?create=true", base),
        RoomTarget::Join(id) => format!("{}/ws?room={}", base, id),
        RoomTarget::Any => format!("{}/ws", base),
        RoomTarget::Rejoin {
            room_id,
            participant_id,
        } => format!("{}/ws?room={}&participant={}", base, room_id, participant_id),
    }
}

async fn connect_remote(base_url: &str, target: RoomTarget) -> Result<Connection, ClientError> {
    let url = ws_url(base_url, &target);
    debug!(url = %url, "Connecting to room server");

    let (socket, _) = connect_async(url.as_str())
        .await
        .map_err(|e| ClientError::Connection(e.to_string()))?;
    let (mut sink, mut stream) = socket.split();

    // The first frame is either a welcome or the reason for refusal
    let handshake = timeout(HANDSHAKE_TIMEOUT, async {
        while let Some(frame) = stream.next().await {
            let text = match frame {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => return Err(ClientError::Connection(e.to_string())),
            };
            match serde_json::from_str::<ServerMsg>(&text) {
                Ok(ServerMsg::Welcome {
                    room_id,
                    participant_id,
                    player_number,
                    is_host,
                    ..
                }) => return Ok((room_id, participant_id, player_number, is_host)),
                Ok(ServerMsg::Error { code, message }) => {
                    return Err(ClientError::Rejected { code, message })
                }
                Ok(other) => {
                    return Err(ClientError::Protocol(format!(
                        "expected welcome, got {:?}",
                        other
                    )))
                }
                Err(e) => return Err(ClientError::Protocol(e.to_string())),
            }
        }
        Err(ClientError::Connection(
            "connection closed before welcome".to_string(),
        ))
    })
    .await
    .map_err(|_| ClientError::Connection("timed out waiting for welcome".to_string()))??;

    let (room_id, participant_id, player_number, is_host) = handshake;
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<ClientMsg>();
    let (inbound_tx, inbound) = mpsc::unbounded_channel();

    // Writer: local sends -> socket. Ends once the sender is dropped and
    // everything queued has been flushed.
    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    warn!(error = %e, "Failed to encode client message");
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(json)).await {
                debug!(error = %e, "WebSocket send failed");
                break;
            }
        }
        let _ = sink.close().await;
    });

    // Reader: socket -> dispatch
    let reader = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => match serde_json::from_str::<ServerMsg>(&text) {
                    Ok(msg) => {
                        if inbound_tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "Failed to parse server message"),
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!(error = %e, "WebSocket error");
                    break;
                }
            }
        }
    });

    Ok(Connection {
        room_id,
        participant_id,
        player_number,
        is_host,
        outbound,
        inbound,
        writer,
        reader,
    })
}

async fn connect_local(
    registry: &Arc<RoomRegistry>,
    target: RoomTarget,
) -> Result<Connection, ClientError> {
    let find = |id: Uuid| {
        registry.get(&id).ok_or_else(|| ClientError::Rejected {
            code: "room_not_found".to_string(),
            message: format!("Room {} not found", id),
        })
    };
    let (room, participant_id): (RoomHandle, ParticipantId) = match target {
        RoomTarget::Create => (registry.create_room(), ParticipantId::generate()),
        RoomTarget::Join(id) => (find(id)?, ParticipantId::generate()),
        RoomTarget::Any => (
            registry
                .find_available_room()
                .unwrap_or_else(|| registry.create_room()),
            ParticipantId::generate(),
        ),
        RoomTarget::Rejoin {
            room_id,
            participant_id,
        } => (find(room_id)?, participant_id),
    };

    let mut events = room.subscribe();
    let joined = room
        .join(participant_id.clone())
        .await
        .map_err(|e| ClientError::Rejected {
            code: e.code().to_string(),
            message: e.to_string(),
        })?;

    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<ClientMsg>();
    let (inbound_tx, inbound) = mpsc::unbounded_channel();

    let writer_room = room.clone();
    let writer_id = participant_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            let input = PlayerInput {
                participant_id: writer_id.clone(),
                msg,
                received_at: unix_millis(),
            };
            if writer_room.send(input).await.is_err() {
                break;
            }
        }
    });

    let reader_id = participant_id.clone();
    let reader = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if event.is_for(&reader_id) && inbound_tx.send(event.msg).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(participant_id = %reader_id, lagged_count = n, "Client lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    Ok(Connection {
        room_id: room.id,
        participant_id,
        player_number: joined.seat.player_number,
        is_host: joined.seat.is_host,
        outbound,
        inbound,
        writer,
        reader,
    })
}
