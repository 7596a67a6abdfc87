// ABOUTME: Declarative action model for browser automation tasks
// ABOUTME: Defines the closed tagged union of action kinds and their outcomes

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One declarative step inside a task's ordered action list.
///
/// The designer-facing control actions (`loop`/`condition`/`break`) are
/// flattened before a task is submitted, so only concrete browser
/// operations appear here. Dispatch is an exhaustive match, never a
/// runtime lookup by type string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Goto {
        url: String,
        #[serde(default)]
        timeout: Option<u64>,
    },
    Click {
        #[serde(default)]
        selector: String,
        #[serde(default)]
        selector_type: SelectorType,
        #[serde(default)]
        timeout: Option<u64>,
        /// Resolve the click point by template matching instead of a selector.
        #[serde(default)]
        by_image: bool,
        #[serde(default)]
        template_path: Option<String>,
        /// Minimum match confidence for `by_image`, 0.0..=1.0.
        #[serde(default)]
        confidence: Option<f32>,
        /// Pixel offset applied to the matched center point.
        #[serde(default)]
        offset: Option<(i32, i32)>,
    },
    Input {
        selector: String,
        #[serde(default)]
        selector_type: SelectorType,
        #[serde(default)]
        value: String,
        #[serde(default = "default_true")]
        clear: bool,
        #[serde(default)]
        press_enter: bool,
    },
    Wait {
        /// Milliseconds to pause.
        #[serde(default = "default_wait_ms")]
        timeout: u64,
    },
    WaitElement {
        selector: String,
        #[serde(default)]
        selector_type: SelectorType,
        #[serde(default)]
        state: WaitState,
        #[serde(default)]
        timeout: Option<u64>,
    },
    Scroll {
        #[serde(default)]
        direction: ScrollDirection,
        #[serde(default = "default_scroll_amount")]
        amount: i64,
    },
    Screenshot {
        #[serde(default)]
        full_page: bool,
        #[serde(default)]
        selector: Option<String>,
    },
    Extract {
        #[serde(default)]
        selectors: Vec<ExtractRule>,
    },
    Press {
        #[serde(default)]
        keys: Vec<String>,
    },
    Hover {
        selector: String,
        #[serde(default)]
        selector_type: SelectorType,
        #[serde(default)]
        timeout: Option<u64>,
    },
    Upload {
        selector: String,
        #[serde(default)]
        selector_type: SelectorType,
        #[serde(default)]
        file_paths: Vec<String>,
    },
    Evaluate {
        script: String,
    },
    SwitchFrame {
        /// Selector of the target iframe; `None` returns to the main frame.
        #[serde(default)]
        selector: Option<String>,
    },
    SwitchTab {
        index: usize,
    },
    NewTab {
        #[serde(default)]
        url: Option<String>,
    },
    CloseTab,
    Drag {
        from_selector: String,
        to_selector: String,
        #[serde(default)]
        timeout: Option<u64>,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectorType {
    #[default]
    Css,
    Xpath,
    Id,
    Class,
    Name,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum WaitState {
    #[default]
    Present,
    Absent,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScrollDirection {
    #[default]
    Down,
    Up,
    Top,
    Bottom,
}

/// One field of an `extract` action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractRule {
    pub name: String,
    pub selector: String,
    #[serde(default)]
    pub selector_type: SelectorType,
    #[serde(default)]
    pub extract_type: ExtractType,
    /// Attribute name when `extract_type` is `attribute`.
    #[serde(default = "default_attribute")]
    pub attribute: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExtractType {
    #[default]
    Text,
    Html,
    Attribute,
}

/// Result of dispatching a single action.
#[derive(Debug, Clone, Default)]
pub struct ActionOutcome {
    /// Structured data produced by the action (extract, evaluate).
    pub data: Option<Value>,
    /// Base64 screenshot produced by an explicit screenshot action.
    pub screenshot: Option<String>,
}

impl ActionOutcome {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_data(data: Value) -> Self {
        Self {
            data: Some(data),
            screenshot: None,
        }
    }

    pub fn with_screenshot(screenshot: String) -> Self {
        Self {
            data: None,
            screenshot: Some(screenshot),
        }
    }
}

impl Action {
    /// Stable kind tag, matching the wire representation.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Goto { .. } => "goto",
            Action::Click { .. } => "click",
            Action::Input { .. } => "input",
            Action::Wait { .. } => "wait",
            Action::WaitElement { .. } => "wait_element",
            Action::Scroll { .. } => "scroll",
            Action::Screenshot { .. } => "screenshot",
            Action::Extract { .. } => "extract",
            Action::Press { .. } => "press",
            Action::Hover { .. } => "hover",
            Action::Upload { .. } => "upload",
            Action::Evaluate { .. } => "evaluate",
            Action::SwitchFrame { .. } => "switch_frame",
            Action::SwitchTab { .. } => "switch_tab",
            Action::NewTab { .. } => "new_tab",
            Action::CloseTab => "close_tab",
            Action::Drag { .. } => "drag",
        }
    }

    /// Human-readable name used in progress and log messages.
    pub fn display_name(&self) -> &'static str {
        match self {
            Action::Goto { .. } => "navigate to page",
            Action::Click { .. } => "click element",
            Action::Input { .. } => "type text",
            Action::Wait { .. } => "wait",
            Action::WaitElement { .. } => "wait for element",
            Action::Scroll { .. } => "scroll page",
            Action::Screenshot { .. } => "take screenshot",
            Action::Extract { .. } => "extract data",
            Action::Press { .. } => "press keys",
            Action::Hover { .. } => "hover element",
            Action::Upload { .. } => "upload files",
            Action::Evaluate { .. } => "run script",
            Action::SwitchFrame { .. } => "switch frame",
            Action::SwitchTab { .. } => "switch tab",
            Action::NewTab { .. } => "open new tab",
            Action::CloseTab => "close tab",
            Action::Drag { .. } => "drag element",
        }
    }

    /// All action kind tags, in wire order.
    pub fn available_kinds() -> Vec<&'static str> {
        vec![
            "goto",
            "click",
            "input",
            "wait",
            "wait_element",
            "scroll",
            "screenshot",
            "extract",
            "press",
            "hover",
            "upload",
            "evaluate",
            "switch_frame",
            "switch_tab",
            "new_tab",
            "close_tab",
            "drag",
        ]
    }

    /// Extractor kind tags exposed through the actions listing endpoint.
    pub fn available_extractors() -> Vec<&'static str> {
        vec!["text", "html", "attribute"]
    }
}

/// Normalize a designer-supplied selector to a form the drivers accept.
///
/// `id`/`class`/`name` selectors become CSS; `xpath` passes through and is
/// recognized downstream by its leading slash.
pub fn convert_selector(selector: &str, selector_type: SelectorType) -> String {
    if selector.is_empty() {
        return String::new();
    }

    match selector_type {
        SelectorType::Css | SelectorType::Xpath => selector.to_string(),
        SelectorType::Id => {
            if selector.starts_with('#') {
                selector.to_string()
            } else {
                format!("#{selector}")
            }
        }
        SelectorType::Class => {
            if selector.starts_with('.') {
                selector.to_string()
            } else {
                let classes: Vec<&str> = selector.split_whitespace().collect();
                if classes.is_empty() {
                    format!(".{selector}")
                } else {
                    classes
                        .iter()
                        .map(|c| format!(".{c}"))
                        .collect::<Vec<_>>()
                        .join("")
                }
            }
        }
        SelectorType::Name => format!("[name=\"{selector}\"]"),
    }
}

fn default_true() -> bool {
    true
}

fn default_wait_ms() -> u64 {
    1000
}

fn default_scroll_amount() -> i64 {
    500
}

fn default_attribute() -> String {
    "href".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_round_trip_tagging() {
        let json = r##"{"type":"click","selector":"#login","timeout":5000}"##;
        let action: Action = serde_json::from_str(json).unwrap();

        match &action {
            Action::Click {
                selector, timeout, ..
            } => {
                assert_eq!(selector, "#login");
                assert_eq!(*timeout, Some(5000));
            }
            other => panic!("unexpected variant: {other:?}"),
        }

        assert_eq!(action.kind(), "click");
    }

    #[test]
    fn test_goto_requires_url() {
        let result = serde_json::from_str::<Action>(r#"{"type":"goto"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_input_defaults() {
        let action: Action =
            serde_json::from_str(r##"{"type":"input","selector":"#q","value":"rust"}"##).unwrap();

        match action {
            Action::Input {
                clear, press_enter, ..
            } => {
                assert!(clear);
                assert!(!press_enter);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_action_type_rejected() {
        let result = serde_json::from_str::<Action>(r#"{"type":"teleport"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_convert_selector() {
        assert_eq!(convert_selector("login", SelectorType::Id), "#login");
        assert_eq!(convert_selector("#login", SelectorType::Id), "#login");
        assert_eq!(
            convert_selector("btn primary", SelectorType::Class),
            ".btn.primary"
        );
        assert_eq!(
            convert_selector("email", SelectorType::Name),
            "[name=\"email\"]"
        );
        assert_eq!(
            convert_selector("//div[@id='x']", SelectorType::Xpath),
            "//div[@id='x']"
        );
    }

    #[test]
    fn test_available_kinds_cover_every_variant() {
        assert_eq!(Action::available_kinds().len(), 17);
    }
}
