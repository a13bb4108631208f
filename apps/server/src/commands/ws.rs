//! WebSocket handler: pushes capture events and frames, accepts control commands.
//!
//! Server → client:
//!   text   → `ServerEvent` JSON (status, audit, command failures)
//!   binary → `FramePacket` (0x01 + seq(8 BE) + captured_at ms(8 BE) + JPEG)
//!
//! Client → server:
//!   text   → `ControlCommand` JSON, e.g. `{"action":"start"}`

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use rtspcast_protocol::{ControlCommand, ServerEvent};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::AppState;

/// GET /ws
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

/// Handle a single WebSocket connection.
pub async fn handle_ws(socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4().to_string();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut events = state.hub.subscribe_events();
    let mut frames = state.hub.subscribe_frames();
    // Per-connection replies from commands running in the background
    let (reply_tx, mut reply_rx) = mpsc::channel::<ServerEvent>(8);

    info!(connection = %connection_id, "WebSocket client connected");

    let initial = ServerEvent::Status(state.controller.service().get_status());
    if let Some(text) = encode_event(&initial) {
        if ws_tx.send(Message::Text(text.into())).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
            result = events.recv() => {
                match result {
                    Ok(text) => {
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(connection = %connection_id, "WebSocket client lagged, missed {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            result = frames.recv() => {
                match result {
                    Ok(packet) => {
                        if ws_tx.send(Message::Binary(packet)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!(connection = %connection_id, "Skipped {} frames for slow client", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            Some(reply) = reply_rx.recv() => {
                if let Some(text) = encode_event(&reply) {
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        dispatch_command(&state, &connection_id, text.as_str(), reply_tx.clone());
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(connection = %connection_id, "WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!(connection = %connection_id, "WebSocket client disconnected");
}

/// Parse a command and run it off the socket loop so a slow start never stalls delivery.
/// Only failures are replied to; successes show up as broadcast status events.
fn dispatch_command(
    state: &AppState,
    connection_id: &str,
    text: &str,
    reply_tx: mpsc::Sender<ServerEvent>,
) {
    let mut command: ControlCommand = match serde_json::from_str(text) {
        Ok(command) => command,
        Err(e) => {
            warn!(connection = %connection_id, "Invalid control command: {}", e);
            let _ = reply_tx.try_send(ServerEvent::CommandFailed {
                action: None,
                message: format!("invalid command: {e}"),
            });
            return;
        }
    };
    if command.client_id.is_none() {
        command.client_id = Some(connection_id.to_string());
    }

    let controller = state.controller.clone();
    tokio::spawn(async move {
        let action = command.action;
        if let Err(e) = controller.handle(command).await {
            let _ = reply_tx
                .send(ServerEvent::CommandFailed {
                    action: Some(action),
                    message: e.to_string(),
                })
                .await;
        }
    });
}

fn encode_event(event: &ServerEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!("Failed to encode event: {}", e);
            None
        }
    }
}
