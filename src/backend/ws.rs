//! Live download events over WebSocket

use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use serde_json::json;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::SharedState;
use crate::downloader::DownloadEvent;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(client_id): Path<String>,
    State(state): State<SharedState>,
) -> Response {
    let events = state.notifier.subscribe();
    debug!(subscribers = state.notifier.subscriber_count(), "Subscribed to download events");
    let shutdown = state.shutdown.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, client_id, events, shutdown))
}

async fn handle_socket(
    mut socket: WebSocket,
    client_id: String,
    mut events: broadcast::Receiver<DownloadEvent>,
    shutdown: CancellationToken,
) {
    info!(%client_id, "WebSocket client connected");
    let hello = json!({ "message": "ws connect" }).to_string();
    if socket.send(Message::Text(hello.into())).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
            event = events.recv() => match event {
                Ok(event) => {
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(error = %e, "Failed to encode download event");
                            continue;
                        }
                    };
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(%client_id, missed, "WebSocket client lagging, events dropped");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                // Clients have nothing to tell us.
                Some(Ok(_)) => {}
            },
        }
    }

    debug!(%client_id, "WebSocket client disconnected");
}
