// ABOUTME: Driver trait abstracting over real CDP-backed and simulated browsers
// ABOUTME: Every page-level operation the dispatcher needs lives behind this seam

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::actions::{ExtractRule, ScrollDirection, WaitState};
use crate::engine::error::Result;

/// Page-level browser operations.
///
/// The executor never branches on execution mode; it drives whichever
/// implementation the session manager handed out. Implementations are
/// stateful (current tab, current frame) so methods take `&mut self`.
#[async_trait]
pub trait Driver: Send {
    /// Navigate the current tab and wait for the load event.
    async fn goto(&mut self, url: &str, timeout: Duration) -> Result<()>;

    /// Click the first element matching `selector`.
    async fn click(&mut self, selector: &str, timeout: Duration) -> Result<()>;

    /// Click at viewport coordinates. Used by image-based clicking.
    async fn click_at(&mut self, x: f64, y: f64) -> Result<()>;

    /// Type `value` into the matched input, optionally clearing it first
    /// and pressing Enter afterwards.
    async fn fill(
        &mut self,
        selector: &str,
        value: &str,
        clear: bool,
        press_enter: bool,
        timeout: Duration,
    ) -> Result<()>;

    /// Press a key combination, e.g. `["Control", "a"]`.
    async fn press(&mut self, keys: &[String]) -> Result<()>;

    async fn hover(&mut self, selector: &str, timeout: Duration) -> Result<()>;

    async fn scroll(&mut self, direction: ScrollDirection, amount: i64) -> Result<()>;

    /// Wait until a selector reaches the requested state.
    async fn wait_for_selector(
        &mut self,
        selector: &str,
        state: WaitState,
        timeout: Duration,
    ) -> Result<()>;

    /// Evaluate a script in the page and return its JSON result.
    async fn evaluate(&mut self, script: &str) -> Result<Value>;

    /// Run the extraction rules against the current page; returns an
    /// object keyed by rule name, each value an array of matches.
    async fn extract(&mut self, rules: &[ExtractRule]) -> Result<Value>;

    async fn upload(&mut self, selector: &str, file_paths: &[String]) -> Result<()>;

    /// Capture a screenshot of the viewport, the full page, or a single
    /// element. Returns base64-encoded image bytes.
    async fn screenshot(&mut self, full_page: bool, selector: Option<&str>) -> Result<String>;

    /// Scope subsequent selector-based operations to an iframe, or back
    /// to the main document when `selector` is `None`.
    async fn switch_frame(&mut self, selector: Option<&str>) -> Result<()>;

    async fn switch_tab(&mut self, index: usize) -> Result<()>;

    async fn new_tab(&mut self, url: Option<&str>) -> Result<()>;

    async fn close_tab(&mut self) -> Result<()>;

    async fn drag(&mut self, from_selector: &str, to_selector: &str, timeout: Duration)
        -> Result<()>;

    /// Tear down the underlying browser. Idempotent.
    async fn close(&mut self) -> Result<()>;

    fn is_simulated(&self) -> bool {
        false
    }
}
