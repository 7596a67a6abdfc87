// ABOUTME: Minimal Chrome DevTools Protocol client over a websocket
// ABOUTME: Sends id-tagged commands and matches responses, skipping event frames

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::engine::error::{EngineError, Result};

/// One command/response connection to a single page target.
///
/// Calls are serialized: the dispatcher issues one command at a time,
/// so a plain incrementing id and an in-order read loop are enough.
/// Protocol events arriving between responses are skipped.
pub struct CdpConnection {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    next_id: u64,
}

impl CdpConnection {
    /// Connect to a page target's debugger websocket URL.
    pub async fn connect(ws_url: &str) -> Result<Self> {
        let (ws, _) = connect_async(ws_url)
            .await
            .map_err(|e| EngineError::BrowserConnectionLost {
                reason: format!("websocket connect to {ws_url} failed: {e}"),
            })?;
        Ok(Self { ws, next_id: 0 })
    }

    /// Issue a command and wait for its response.
    pub async fn call(&mut self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        self.next_id += 1;
        let id = self.next_id;
        let frame = json!({ "id": id, "method": method, "params": params });

        self.ws
            .send(Message::Text(frame.to_string().into()))
            .await
            .map_err(|e| EngineError::BrowserConnectionLost {
                reason: format!("send {method} failed: {e}"),
            })?;

        tokio::time::timeout(timeout, self.read_response(id, method))
            .await
            .map_err(|_| EngineError::ActionTimeout {
                action: method.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })?
    }

    async fn read_response(&mut self, id: u64, method: &str) -> Result<Value> {
        while let Some(message) = self.ws.next().await {
            let message = message.map_err(|e| EngineError::BrowserConnectionLost {
                reason: format!("read failed: {e}"),
            })?;

            let text = match message {
                Message::Text(text) => text,
                Message::Close(_) => {
                    return Err(EngineError::BrowserConnectionLost {
                        reason: "debugger closed the connection".to_string(),
                    })
                }
                _ => continue,
            };

            let value: Value = match serde_json::from_str(text.as_str()) {
                Ok(value) => value,
                Err(_) => continue,
            };

            if value.get("id").and_then(Value::as_u64) != Some(id) {
                // Event frame or a response to something else; skip.
                continue;
            }

            if let Some(error) = value.get("error") {
                let message = error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown protocol error");
                return Err(EngineError::ActionFailed {
                    action: method.to_string(),
                    reason: message.to_string(),
                });
            }

            return Ok(value.get("result").cloned().unwrap_or(Value::Null));
        }

        Err(EngineError::BrowserConnectionLost {
            reason: "connection ended before response arrived".to_string(),
        })
    }

    pub async fn close(&mut self) -> Result<()> {
        // Best effort; the browser process teardown follows anyway.
        let _ = self.ws.close(None).await;
        Ok(())
    }
}

/// A page target as reported by the browser's `/json/list` endpoint.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct PageTarget {
    pub id: String,
    #[serde(rename = "type")]
    pub target_type: String,
    #[serde(default)]
    pub url: String,
    #[serde(rename = "webSocketDebuggerUrl", default)]
    pub ws_url: Option<String>,
}

/// List page targets via the browser's HTTP debug endpoint.
pub async fn list_pages(client: &reqwest::Client, port: u16) -> Result<Vec<PageTarget>> {
    let targets: Vec<PageTarget> = client
        .get(format!("http://127.0.0.1:{port}/json/list"))
        .send()
        .await
        .map_err(|e| EngineError::BrowserConnectionLost {
            reason: format!("debug endpoint unreachable: {e}"),
        })?
        .json()
        .await
        .map_err(|e| EngineError::BrowserConnectionLost {
            reason: format!("debug endpoint returned invalid json: {e}"),
        })?;

    Ok(targets
        .into_iter()
        .filter(|t| t.target_type == "page")
        .collect())
}

/// Open a new tab, optionally at a URL, and return its target.
pub async fn open_page(
    client: &reqwest::Client,
    port: u16,
    url: Option<&str>,
) -> Result<PageTarget> {
    let endpoint = match url {
        Some(url) => format!("http://127.0.0.1:{port}/json/new?{url}"),
        None => format!("http://127.0.0.1:{port}/json/new"),
    };

    client
        .put(endpoint)
        .send()
        .await
        .map_err(|e| EngineError::BrowserConnectionLost {
            reason: format!("failed to open tab: {e}"),
        })?
        .json()
        .await
        .map_err(|e| EngineError::BrowserConnectionLost {
            reason: format!("open tab returned invalid json: {e}"),
        })
}

/// Close a tab by target id.
pub async fn close_page(client: &reqwest::Client, port: u16, target_id: &str) -> Result<()> {
    client
        .get(format!("http://127.0.0.1:{port}/json/close/{target_id}"))
        .send()
        .await
        .map_err(|e| EngineError::BrowserConnectionLost {
            reason: format!("failed to close tab: {e}"),
        })?;
    Ok(())
}
