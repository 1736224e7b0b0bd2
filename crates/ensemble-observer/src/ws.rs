//! `WebSocket` handler for real-time consolidated state streaming.
//!
//! Clients connect to `GET /ws/snapshots` and receive the full
//! consolidated state as a JSON array, once on connect and again whenever
//! it changes. A slow client may skip intermediate states and resume from
//! the newest one; it never receives them out of order.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use ensemble_types::ConsolidatedSnapshots;
use tracing::{debug, warn};

use crate::state::AppState;

/// Upgrade an HTTP request to a `WebSocket` connection and begin
/// streaming consolidated snapshots.
///
/// # Route
///
/// `GET /ws/snapshots`
pub async fn ws_snapshots(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_ws(socket, state))
}

/// Serialize the state into a text frame, logging failures.
fn encode(snapshots: &ConsolidatedSnapshots) -> Option<Message> {
    match serde_json::to_string(snapshots.as_slice()) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            warn!("Failed to serialize consolidated snapshots: {e}");
            None
        }
    }
}

/// Handle the `WebSocket` lifecycle: send the current state, then forward
/// every change until either side goes away.
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
    debug!("WebSocket client connected");

    let mut rx = state.subscribe();
    let initial = rx.borrow_and_update().clone();
    if let Some(msg) = encode(&initial) {
        if socket.send(msg).await.is_err() {
            debug!("WebSocket client disconnected (initial send failed)");
            return;
        }
    }

    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    debug!("Snapshot channel closed, shutting down WebSocket");
                    return;
                }
                let latest = rx.borrow_and_update().clone();
                let Some(msg) = encode(&latest) else {
                    continue;
                };
                if socket.send(msg).await.is_err() {
                    debug!("WebSocket client disconnected (send failed)");
                    return;
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("WebSocket client disconnected");
                        return;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            debug!("WebSocket client disconnected (pong failed)");
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        debug!("WebSocket error: {e}");
                        return;
                    }
                    _ => {
                        // Clients are read-only; ignore anything else they send.
                    }
                }
            }
        }
    }
}
