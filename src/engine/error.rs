// ABOUTME: Error types and taxonomy for the task execution engine
// ABOUTME: Classifies raised faults into coded, user-facing error details

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("browser failed to start: {reason}")]
    BrowserStart { reason: String },

    #[error("browser executable not found: {path}")]
    BrowserNotFound { path: String },

    #[error("browser connection lost: {reason}")]
    BrowserConnectionLost { reason: String },

    #[error("browser process exited unexpectedly")]
    BrowserProcessExited,

    #[error("page failed to load: {url} - {reason}")]
    PageLoadFailed { url: String, reason: String },

    #[error("page load timed out: {url} after {timeout_ms}ms")]
    PageLoadTimeout { url: String, timeout_ms: u64 },

    #[error("navigation error: {reason}")]
    Navigation { reason: String },

    #[error("element not found: {selector}")]
    ElementNotFound { selector: String },

    #[error("element not visible: {selector}")]
    ElementNotVisible { selector: String },

    #[error("action timed out: {action} after {timeout_ms}ms")]
    ActionTimeout { action: String, timeout_ms: u64 },

    #[error("action failed: {action} - {reason}")]
    ActionFailed { action: String, reason: String },

    #[error("unsupported action: {action}")]
    UnsupportedAction { action: String },

    #[error("screenshot failed: {reason}")]
    ScreenshotFailed { reason: String },

    #[error("extraction failed: {reason}")]
    ExtractFailed { reason: String },

    #[error("task not found: {task_id}")]
    TaskNotFound { task_id: String },

    #[error("task cancelled")]
    TaskCancelled,

    #[error("invalid task transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("configuration error: {reason}")]
    Config { reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("system error: {reason}")]
    System { reason: String },
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Fixed taxonomy code attached to every classified fault.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    #[serde(rename = "ERR_BRWSR_001")]
    BrowserStartFailed,
    #[serde(rename = "ERR_BRWSR_002")]
    BrowserNotFound,
    #[serde(rename = "ERR_BRWSR_003")]
    BrowserConnectionLost,
    #[serde(rename = "ERR_BRWSR_004")]
    BrowserProcessExited,
    #[serde(rename = "ERR_PAGE_001")]
    PageLoadFailed,
    #[serde(rename = "ERR_PAGE_002")]
    PageLoadTimeout,
    #[serde(rename = "ERR_PAGE_003")]
    PageNavigation,
    #[serde(rename = "ERR_ELEM_001")]
    ElementNotFound,
    #[serde(rename = "ERR_ELEM_002")]
    ElementNotVisible,
    #[serde(rename = "ERR_ACT_001")]
    ActionTimeout,
    #[serde(rename = "ERR_ACT_002")]
    ActionFailed,
    #[serde(rename = "ERR_ACT_003")]
    ActionUnsupported,
    #[serde(rename = "ERR_SCREEN_001")]
    ScreenshotFailed,
    #[serde(rename = "ERR_EXT_002")]
    ExtractFailed,
    #[serde(rename = "ERR_TASK_001")]
    TaskNotFound,
    #[serde(rename = "ERR_TASK_002")]
    TaskCancelled,
    #[serde(rename = "ERR_TASK_004")]
    TaskFailed,
    #[serde(rename = "ERR_SYS_001")]
    SystemConfig,
    #[serde(rename = "ERR_SYS_999")]
    SystemUnknown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::BrowserStartFailed => "ERR_BRWSR_001",
            ErrorCode::BrowserNotFound => "ERR_BRWSR_002",
            ErrorCode::BrowserConnectionLost => "ERR_BRWSR_003",
            ErrorCode::BrowserProcessExited => "ERR_BRWSR_004",
            ErrorCode::PageLoadFailed => "ERR_PAGE_001",
            ErrorCode::PageLoadTimeout => "ERR_PAGE_002",
            ErrorCode::PageNavigation => "ERR_PAGE_003",
            ErrorCode::ElementNotFound => "ERR_ELEM_001",
            ErrorCode::ElementNotVisible => "ERR_ELEM_002",
            ErrorCode::ActionTimeout => "ERR_ACT_001",
            ErrorCode::ActionFailed => "ERR_ACT_002",
            ErrorCode::ActionUnsupported => "ERR_ACT_003",
            ErrorCode::ScreenshotFailed => "ERR_SCREEN_001",
            ErrorCode::ExtractFailed => "ERR_EXT_002",
            ErrorCode::TaskNotFound => "ERR_TASK_001",
            ErrorCode::TaskCancelled => "ERR_TASK_002",
            ErrorCode::TaskFailed => "ERR_TASK_004",
            ErrorCode::SystemConfig => "ERR_SYS_001",
            ErrorCode::SystemUnknown => "ERR_SYS_999",
        }
    }

    /// Whether the dispatcher may attempt one bounded local recovery.
    ///
    /// Browser- and system-level faults are never retried locally; the
    /// retry controller decides about a whole-task retry instead.
    pub fn locally_recoverable(&self) -> bool {
        matches!(
            self,
            ErrorCode::ElementNotFound
                | ErrorCode::ElementNotVisible
                | ErrorCode::PageLoadTimeout
                | ErrorCode::PageNavigation
        )
    }

    fn user_message(&self) -> &'static str {
        match self {
            ErrorCode::BrowserStartFailed => "Browser failed to start",
            ErrorCode::BrowserNotFound => "Browser executable not found",
            ErrorCode::BrowserConnectionLost => "Browser connection lost",
            ErrorCode::BrowserProcessExited => "Browser process exited",
            ErrorCode::PageLoadFailed => "Page failed to load",
            ErrorCode::PageLoadTimeout => "Page load timed out",
            ErrorCode::PageNavigation => "Page navigation failed",
            ErrorCode::ElementNotFound => "Element not found",
            ErrorCode::ElementNotVisible => "Element not visible",
            ErrorCode::ActionTimeout => "Action timed out",
            ErrorCode::ActionFailed => "Action failed",
            ErrorCode::ActionUnsupported => "Unsupported action",
            ErrorCode::ScreenshotFailed => "Screenshot capture failed",
            ErrorCode::ExtractFailed => "Data extraction failed",
            ErrorCode::TaskNotFound => "Task not found",
            ErrorCode::TaskCancelled => "Task was cancelled",
            ErrorCode::TaskFailed => "Task execution failed",
            ErrorCode::SystemConfig => "Configuration error",
            ErrorCode::SystemUnknown => "Unexpected error",
        }
    }

    fn suggestion(&self) -> &'static str {
        match self {
            ErrorCode::BrowserStartFailed => {
                "Check the browser executable path in the configuration, or start the browser manually with a debug port to verify it works"
            }
            ErrorCode::BrowserNotFound => {
                "Set browser.executable_path in config.yaml (or WEBPILOT_BROWSER_PATH) to an installed Chrome/Chromium binary"
            }
            ErrorCode::BrowserConnectionLost | ErrorCode::BrowserProcessExited => {
                "Retry the task; if it keeps happening, check host memory and whether another process kills the browser"
            }
            ErrorCode::PageLoadFailed | ErrorCode::PageNavigation => {
                "Check that the URL is reachable from this host and the network is up"
            }
            ErrorCode::PageLoadTimeout => {
                "Increase browser.page_timeout or verify the page loads in a normal browser"
            }
            ErrorCode::ElementNotFound => {
                "Check the selector, confirm the element is not inside an iframe, or add a wait before this action"
            }
            ErrorCode::ElementNotVisible => {
                "Scroll the element into view or wait for it to finish rendering before interacting"
            }
            ErrorCode::ActionTimeout => {
                "Increase browser.action_timeout or split the step into smaller actions"
            }
            ErrorCode::ActionFailed => "Check the action parameters and the current page state",
            ErrorCode::ActionUnsupported => {
                "Check the action type; see GET /api/actions for the supported kinds"
            }
            ErrorCode::ScreenshotFailed => {
                "Confirm the page finished loading; element screenshots need the selector to match"
            }
            ErrorCode::ExtractFailed => {
                "Check the extraction selectors against the live page markup"
            }
            ErrorCode::TaskNotFound => "Check the task id, or create the task again",
            ErrorCode::TaskCancelled => "The task was cancelled on request; retry to run it again",
            ErrorCode::TaskFailed => "Inspect the task log for the failing action, then retry",
            ErrorCode::SystemConfig => "Fix the configuration file and restart the service",
            ErrorCode::SystemUnknown => "Check the service log for the underlying fault",
        }
    }
}

/// User-facing error record carried by failed tasks and error events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    pub reason: String,
    pub suggestion: String,
    #[serde(default)]
    pub details: Value,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_index: Option<usize>,
}

/// Map a raised fault onto the fixed taxonomy.
pub fn error_code(err: &EngineError) -> ErrorCode {
    match err {
        EngineError::BrowserStart { .. } => ErrorCode::BrowserStartFailed,
        EngineError::BrowserNotFound { .. } => ErrorCode::BrowserNotFound,
        EngineError::BrowserConnectionLost { .. } => ErrorCode::BrowserConnectionLost,
        EngineError::BrowserProcessExited => ErrorCode::BrowserProcessExited,
        EngineError::PageLoadFailed { .. } => ErrorCode::PageLoadFailed,
        EngineError::PageLoadTimeout { .. } => ErrorCode::PageLoadTimeout,
        EngineError::Navigation { .. } => ErrorCode::PageNavigation,
        EngineError::ElementNotFound { .. } => ErrorCode::ElementNotFound,
        EngineError::ElementNotVisible { .. } => ErrorCode::ElementNotVisible,
        EngineError::ActionTimeout { .. } => ErrorCode::ActionTimeout,
        EngineError::ActionFailed { .. } => ErrorCode::ActionFailed,
        EngineError::UnsupportedAction { .. } => ErrorCode::ActionUnsupported,
        EngineError::ScreenshotFailed { .. } => ErrorCode::ScreenshotFailed,
        EngineError::ExtractFailed { .. } => ErrorCode::ExtractFailed,
        EngineError::TaskNotFound { .. } => ErrorCode::TaskNotFound,
        EngineError::TaskCancelled => ErrorCode::TaskCancelled,
        EngineError::InvalidTransition { .. } => ErrorCode::TaskFailed,
        EngineError::Config { .. } => ErrorCode::SystemConfig,
        EngineError::Io(_) => ErrorCode::SystemUnknown,
        EngineError::System { .. } => ErrorCode::SystemUnknown,
    }
}

/// Convert a raised fault into the user-facing error record.
///
/// The original cause is preserved verbatim under `details.cause`;
/// `action_index` must be supplied whenever the fault occurred mid-action.
pub fn classify(
    err: &EngineError,
    task_id: Option<&str>,
    action_index: Option<usize>,
) -> ErrorDetail {
    let code = error_code(err);

    let mut details = json!({ "cause": err.to_string() });
    match err {
        EngineError::ElementNotFound { selector } | EngineError::ElementNotVisible { selector } => {
            details["selector"] = json!(selector);
        }
        EngineError::PageLoadTimeout { url, timeout_ms } => {
            details["url"] = json!(url);
            details["timeout_ms"] = json!(timeout_ms);
        }
        EngineError::ActionTimeout { action, timeout_ms } => {
            details["action"] = json!(action);
            details["timeout_ms"] = json!(timeout_ms);
        }
        EngineError::BrowserNotFound { path } => {
            details["path"] = json!(path);
        }
        _ => {}
    }

    ErrorDetail {
        code: code.as_str().to_string(),
        message: code.user_message().to_string(),
        reason: err.to_string(),
        suggestion: code.suggestion().to_string(),
        details,
        timestamp: Utc::now(),
        task_id: task_id.map(str::to_string),
        action_index,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_element_not_found() {
        let err = EngineError::ElementNotFound {
            selector: "#missing".to_string(),
        };
        let detail = classify(&err, Some("task-1"), Some(1));

        assert_eq!(detail.code, "ERR_ELEM_001");
        assert_eq!(detail.task_id.as_deref(), Some("task-1"));
        assert_eq!(detail.action_index, Some(1));
        assert_eq!(detail.details["selector"], "#missing");
        assert!(detail.reason.contains("#missing"));
        assert!(!detail.suggestion.is_empty());
    }

    #[test]
    fn test_classify_preserves_cause() {
        let err = EngineError::BrowserStart {
            reason: "port already bound".to_string(),
        };
        let detail = classify(&err, None, None);

        assert_eq!(detail.code, "ERR_BRWSR_001");
        assert!(detail.details["cause"]
            .as_str()
            .unwrap()
            .contains("port already bound"));
    }

    #[test]
    fn test_browser_faults_are_not_locally_recoverable() {
        assert!(!error_code(&EngineError::BrowserProcessExited).locally_recoverable());
        assert!(!error_code(&EngineError::System {
            reason: "oom".into()
        })
        .locally_recoverable());
        assert!(error_code(&EngineError::ElementNotFound {
            selector: "#x".into()
        })
        .locally_recoverable());
        assert!(error_code(&EngineError::PageLoadTimeout {
            url: "http://x".into(),
            timeout_ms: 1
        })
        .locally_recoverable());
    }

    #[test]
    fn test_code_prefixes() {
        assert!(error_code(&EngineError::ScreenshotFailed {
            reason: "no page".into()
        })
        .as_str()
        .starts_with("ERR_SCREEN"));
        assert!(error_code(&EngineError::ExtractFailed {
            reason: "bad selector".into()
        })
        .as_str()
        .starts_with("ERR_EXT"));
        assert!(error_code(&EngineError::TaskCancelled)
            .as_str()
            .starts_with("ERR_TASK"));
    }
}
