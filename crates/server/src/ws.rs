//! WebSocket handler for the realtime namespaces.

use std::collections::HashMap;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::Response,
};
use bms_shared::{protocol, ClientFrame, Namespace, ServerFrame};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::routes::{bearer_token, parse_namespace, Problem};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct HandshakeQuery {
    /// Browsers cannot set headers on a WebSocket handshake.
    token: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
    Query(query): Query<HandshakeQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, Problem> {
    let namespace = parse_namespace(&namespace)?;
    let token = bearer_token(&headers).or(query.token).unwrap_or_default();
    if !state.config.accepts(&token) {
        tracing::warn!("Rejected {} handshake: bad or missing token", namespace);
        return Err(Problem::unauthorized("missing or invalid bearer token"));
    }

    tracing::info!("WebSocket connection accepted on /{}", namespace);
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, namespace, state)))
}

/// Handle an authenticated WebSocket connection
async fn handle_socket(socket: WebSocket, namespace: Namespace, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (forward_tx, mut forward_rx) = mpsc::unbounded_channel::<ServerFrame>();
    let mut memberships: HashMap<String, JoinHandle<()>> = HashMap::new();

    // Task to forward frames to the WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(frame) = forward_rx.recv().await {
            let json = match protocol::encode(&frame) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!("Serialize failed: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // Main receive loop
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match protocol::decode::<ClientFrame>(text.as_str()) {
                Ok(frame) => {
                    handle_client_frame(frame, namespace, &mut memberships, &forward_tx, &state).await
                }
                Err(e) => {
                    let _ = forward_tx.send(ServerFrame::Error {
                        code: "BAD_FRAME".to_string(),
                        message: e.to_string(),
                    });
                }
            },
            Ok(Message::Close(_)) => break,
            Err(_) => break,
            _ => {}
        }
    }

    // Cleanup
    for (room, handle) in memberships {
        leave(&state, namespace, &room, handle).await;
    }
    send_task.abort();

    tracing::info!("WebSocket connection on /{} closed", namespace);
}

async fn handle_client_frame(
    frame: ClientFrame,
    namespace: Namespace,
    memberships: &mut HashMap<String, JoinHandle<()>>,
    forward_tx: &mpsc::UnboundedSender<ServerFrame>,
    state: &AppState,
) {
    match frame {
        ClientFrame::JoinRoom { room } => {
            if memberships.contains_key(&room) {
                return;
            }
            tracing::debug!("Socket on /{} joining room {}", namespace, room);

            let mut events = state.hub.subscribe(namespace, &room).await;
            let forward = forward_tx.clone();
            let room_for_task = room.clone();
            let handle = tokio::spawn(async move {
                loop {
                    match events.recv().await {
                        Ok(event) => {
                            if forward.send(ServerFrame::Event(event)).is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!("Room {} lagged, skipped {} event(s)", room_for_task, skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
            memberships.insert(room, handle);
        }

        ClientFrame::LeaveRoom { room } => {
            tracing::debug!("Socket on /{} leaving room {}", namespace, room);
            if let Some(handle) = memberships.remove(&room) {
                leave(state, namespace, &room, handle).await;
            }
        }

        ClientFrame::Ping => {
            let _ = forward_tx.send(ServerFrame::Pong);
        }

        ClientFrame::GetRooms { request_id } => {
            let mut rooms: Vec<String> = memberships.keys().cloned().collect();
            rooms.sort();
            let _ = forward_tx.send(ServerFrame::Rooms {
                request_id: Some(request_id),
                rooms,
            });
        }
    }
}

/// Stop forwarding a room and drop its channel if this was the last socket.
async fn leave(state: &AppState, namespace: Namespace, room: &str, handle: JoinHandle<()>) {
    handle.abort();
    // The receiver is dropped once the aborted task has finished.
    let _ = handle.await;
    if state.hub.release(namespace, room).await {
        tracing::debug!("Released empty room {} on /{}", room, namespace);
    }
}
