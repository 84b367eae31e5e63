//! `GET /ws/events` — the hook event stream.
//!
//! Subscribers receive one JSON object per handled hook:
//! `{"event": ..., "response": ...}`. Delivery is best-effort; a slow
//! consumer that lags the broadcast channel is dropped rather than
//! allowed to apply backpressure to the dispatch path.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use crate::state::DaemonContext;

/// Upgrade and stream.
pub async fn events(
    State(context): State<DaemonContext>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| stream_events(socket, context))
}

async fn stream_events(mut socket: WebSocket, context: DaemonContext) {
    let Some(dispatcher) = &context.dispatcher else {
        let _ = socket
            .send(Message::Text(
                json!({"error": "hook dispatcher not initialized"})
                    .to_string()
                    .into(),
            ))
            .await;
        return;
    };
    let mut receiver = dispatcher.broadcaster().subscribe();

    loop {
        match receiver.recv().await {
            Ok(notice) => {
                let payload = json!({
                    "event": notice.0,
                    "response": notice.1,
                });
                if socket
                    .send(Message::Text(payload.to_string().into()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "websocket subscriber lagged; continuing");
            }
            Err(RecvError::Closed) => break,
        }
    }
    debug!("event stream subscriber disconnected");
}
