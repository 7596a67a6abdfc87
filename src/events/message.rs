// ABOUTME: Wire types for the realtime event channel
// ABOUTME: Every frame is a typed envelope carrying a payload and task id

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Frame types flowing server to client.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    TaskStatus,
    TaskProgress,
    TaskLog,
    TaskScreenshot,
    TaskResult,
    TaskError,
    Ping,
    Pong,
    Subscribed,
    Unsubscribed,
    Error,
}

/// The envelope every websocket frame is wrapped in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl WsMessage {
    pub fn new(kind: MessageType, task_id: Option<String>, payload: Value) -> Self {
        Self {
            kind,
            payload,
            task_id,
            timestamp: Utc::now(),
        }
    }

    pub fn status(
        task_id: &str,
        status: &str,
        progress: u8,
        current_action: usize,
        message: &str,
    ) -> Self {
        Self::new(
            MessageType::TaskStatus,
            Some(task_id.to_string()),
            json!({
                "status": status,
                "progress": progress,
                "current_action": current_action,
                "message": message,
            }),
        )
    }

    pub fn progress(
        task_id: &str,
        action_index: usize,
        total_actions: usize,
        progress: u8,
        action_name: &str,
    ) -> Self {
        Self::new(
            MessageType::TaskProgress,
            Some(task_id.to_string()),
            json!({
                "action_index": action_index,
                "total_actions": total_actions,
                "progress": progress,
                "action_name": action_name,
                "details": Value::Null,
            }),
        )
    }

    pub fn logs(task_id: &str, entries: &[LogEntry]) -> Self {
        Self::new(
            MessageType::TaskLog,
            Some(task_id.to_string()),
            json!({ "logs": entries }),
        )
    }

    pub fn screenshot(task_id: &str, base64_image: &str, action_index: usize) -> Self {
        Self::new(
            MessageType::TaskScreenshot,
            Some(task_id.to_string()),
            json!({
                "screenshot": base64_image,
                "action_index": action_index,
                "timestamp": Utc::now(),
            }),
        )
    }

    pub fn result(task_id: &str, result: Value) -> Self {
        Self::new(
            MessageType::TaskResult,
            Some(task_id.to_string()),
            json!({ "result": result }),
        )
    }

    pub fn error(task_id: &str, detail: Value) -> Self {
        let details = detail.get("details").cloned().unwrap_or(Value::Null);
        Self::new(
            MessageType::TaskError,
            Some(task_id.to_string()),
            json!({ "error": detail, "details": details }),
        )
    }

    pub fn ping() -> Self {
        Self::new(MessageType::Ping, None, Value::Null)
    }

    pub fn pong() -> Self {
        Self::new(MessageType::Pong, None, Value::Null)
    }
}

/// Frames a client may send.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Subscribe to one task's events, or all events with `task_id: "all"`.
    Subscribe { task_id: String },
    Unsubscribe { task_id: String },
    Ping,
    Pong,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// One line of task execution output, shown live in the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_name: Option<String>,
    #[serde(default)]
    pub details: Value,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>, action_name: Option<String>) -> Self {
        Self {
            level,
            message: message.into(),
            action_name,
            details: Value::Null,
            timestamp: Utc::now(),
        }
    }

    pub fn info(message: impl Into<String>, action_name: Option<String>) -> Self {
        Self::new(LogLevel::Info, message, action_name)
    }

    pub fn success(message: impl Into<String>, action_name: Option<String>) -> Self {
        Self::new(LogLevel::Success, message, action_name)
    }

    pub fn warning(message: impl Into<String>, action_name: Option<String>) -> Self {
        Self::new(LogLevel::Warning, message, action_name)
    }

    pub fn error(message: impl Into<String>, action_name: Option<String>) -> Self {
        Self::new(LogLevel::Error, message, action_name)
    }

    /// Routine entries wait in the batch; problems flush now.
    pub fn bypasses_batching(&self) -> bool {
        matches!(self.level, LogLevel::Warning | LogLevel::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_wire_shape() {
        let msg = WsMessage::progress("task-1", 2, 5, 45, "click element");
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["type"], "task_progress");
        assert_eq!(value["task_id"], "task-1");
        assert_eq!(value["payload"]["progress"], 45);
        assert_eq!(value["payload"]["action_index"], 2);
        assert_eq!(value["payload"]["total_actions"], 5);
        assert_eq!(value["payload"]["action_name"], "click element");
        assert!(value.get("timestamp").is_some());
    }

    #[test]
    fn test_status_payload_fields() {
        let msg = WsMessage::status("task-1", "running", 10, 1, "navigate to page");
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["payload"]["status"], "running");
        assert_eq!(value["payload"]["current_action"], 1);
        assert_eq!(value["payload"]["message"], "navigate to page");
    }

    #[test]
    fn test_control_frames_omit_task_id() {
        let value = serde_json::to_value(WsMessage::ping()).unwrap();
        assert_eq!(value["type"], "ping");
        assert!(value.get("task_id").is_none());
    }

    #[test]
    fn test_client_message_parsing() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"subscribe","task_id":"all"}"#).unwrap();
        match msg {
            ClientMessage::Subscribe { task_id } => assert_eq!(task_id, "all"),
            other => panic!("unexpected: {other:?}"),
        }

        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"task_log"}"#).is_err());
    }

    #[test]
    fn test_batching_bypass_levels() {
        assert!(!LogEntry::info("x", None).bypasses_batching());
        assert!(!LogEntry::success("x", None).bypasses_batching());
        assert!(LogEntry::warning("x", None).bypasses_batching());
        assert!(LogEntry::error("x", None).bypasses_batching());
    }
}
