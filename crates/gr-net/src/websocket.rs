//! ---
//! gr_section: "03-networking"
//! gr_subsection: "module"
//! gr_type: "source"
//! gr_scope: "code"
//! gr_description: "WebSocket control channel: inbound dispatch and outbound fan-out."
//! gr_version: "v0.1.0"
//! gr_owner: "tbd"
//! ---
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::control::ClientId;
use crate::server::ServerState;

pub(crate) async fn upgrade_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
) -> Response {
    let client = state.next_client_id();
    ws.max_message_size(state.max_frame_bytes)
        .on_upgrade(move |socket| client_loop(socket, client, state))
}

async fn client_loop(mut socket: WebSocket, client: ClientId, state: Arc<ServerState>) {
    let mut subscription = state.broadcaster.subscribe();
    let mut shutdown = state.shutdown.clone();
    info!(client, "websocket client connected");
    state.handler.on_connect(client);

    loop {
        tokio::select! {
            frame = subscription.recv() => {
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(client, skipped, "websocket client lagged behind; dropping frames");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if socket.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            }
            message = socket.recv() => {
                let Some(Ok(message)) = message else {
                    break;
                };

                match message {
                    Message::Text(text) => {
                        debug!(client, frame = %text, "inbound frame");
                        state.handler.on_text(client, &text);
                    }
                    Message::Binary(payload) => {
                        debug!(client, len = payload.len(), "binary frame ignored");
                    }
                    Message::Ping(payload) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Message::Pong(_) => {}
                    Message::Close(_) => break,
                }
            }
            _ = shutdown.changed() => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
        }
    }

    state.handler.on_disconnect(client);
    info!(client, "websocket client disconnected");
}
