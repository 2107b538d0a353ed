//! WebSocket viewers.
//!
//! A viewer sends `{"type": "subscribe", "channel": "logs:<project>"}` to
//! join a channel and gets `Joined <channel>` back. From then on every
//! payload forwarded to that channel arrives as a text frame, unchanged.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use serde::Deserialize;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tokio_stream::StreamMap;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, info, warn};

use crate::AppState;
use crate::hub::RelayHub;

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.hub))
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsCommand {
    Subscribe { channel: String },
    Unsubscribe { channel: String },
}

async fn handle_socket(mut socket: WebSocket, hub: Arc<RelayHub>) {
    info!("viewer connected");
    let mut channels: StreamMap<String, BroadcastStream<String>> = StreamMap::new();

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!(error = %e, "viewer socket error");
                        break;
                    }
                };
                let reply = match serde_json::from_str::<WsCommand>(text.as_str()) {
                    Ok(WsCommand::Subscribe { channel }) => {
                        info!(channel = %channel, "viewer joined");
                        let receiver = hub.subscribe(&channel);
                        channels.insert(channel.clone(), BroadcastStream::new(receiver));
                        format!("Joined {}", channel)
                    }
                    Ok(WsCommand::Unsubscribe { channel }) => {
                        info!(channel = %channel, "viewer left");
                        channels.remove(&channel);
                        format!("Left {}", channel)
                    }
                    Err(e) => {
                        debug!(error = %e, "ignoring malformed viewer command");
                        continue;
                    }
                };
                if socket.send(Message::Text(reply.into())).await.is_err() {
                    break;
                }
            }
            Some((channel, item)) = channels.next(), if !channels.is_empty() => {
                let payload = match item {
                    Ok(payload) => payload,
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(channel = %channel, skipped, "viewer fell behind, skipping ahead");
                        continue;
                    }
                };
                if socket.send(Message::Text(payload.into())).await.is_err() {
                    break;
                }
            }
        }
    }

    info!("viewer disconnected");
}
