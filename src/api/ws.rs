// ABOUTME: Websocket endpoint bridging peers onto the event broadcaster
// ABOUTME: Handles subscribe/unsubscribe control frames and liveness pongs

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};

use crate::api::AppState;
use crate::events::{ClientMessage, MessageType, WsMessage};

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (conn_id, mut outbound) = state.broadcaster.register();
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            queued = outbound.recv() => {
                let Some(message) = queued else { break };
                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(connection_id = %conn_id, error = %e, "unserializable frame dropped");
                        continue;
                    }
                };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }

            incoming = stream.next() => {
                let Some(Ok(message)) = incoming else { break };
                match message {
                    Message::Text(text) => {
                        handle_client_frame(&state, conn_id, text.as_str()).await;
                    }
                    // Transport-level pongs count as liveness too.
                    Message::Pong(_) => state.broadcaster.record_pong(conn_id),
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    state.broadcaster.unregister(conn_id);
}

async fn handle_client_frame(state: &AppState, conn_id: uuid::Uuid, text: &str) {
    let parsed: std::result::Result<ClientMessage, _> = serde_json::from_str(text);
    match parsed {
        Ok(ClientMessage::Subscribe { task_id }) => {
            tracing::debug!(connection_id = %conn_id, task_id, "subscribe");
            state.broadcaster.subscribe(conn_id, &task_id);
        }
        Ok(ClientMessage::Unsubscribe { task_id }) => {
            tracing::debug!(connection_id = %conn_id, task_id, "unsubscribe");
            state.broadcaster.unsubscribe(conn_id, &task_id);
        }
        Ok(ClientMessage::Ping) => {
            // A client-initiated ping doubles as proof of life.
            state.broadcaster.record_pong(conn_id);
            state.broadcaster.reply(conn_id, WsMessage::pong());
        }
        Ok(ClientMessage::Pong) => state.broadcaster.record_pong(conn_id),
        Err(e) => {
            tracing::debug!(connection_id = %conn_id, error = %e, "unparseable client frame");
            state.broadcaster.reply(
                conn_id,
                WsMessage::new(
                    MessageType::Error,
                    None,
                    serde_json::json!({ "message": format!("invalid frame: {e}") }),
                ),
            );
        }
    }
}
