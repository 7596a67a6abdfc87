// ABOUTME: CDP-backed driver executing actions against a live Chrome instance
// ABOUTME: Selector work runs through Runtime.evaluate, input through Input events

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};
use std::time::Duration;

use crate::actions::{ExtractRule, ExtractType, ScrollDirection, WaitState};
use crate::browser::cdp::{self, CdpConnection, PageTarget};
use crate::browser::driver::Driver;
use crate::cli::config::BrowserConfig;
use crate::engine::error::{EngineError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Driver bound to one Chrome process over its remote debugging port.
///
/// One command connection is kept open to the active tab; switching tabs
/// reconnects to the new target. Frame scoping is done by rewriting the
/// document expression used in evaluated scripts.
pub struct RealDriver {
    port: u16,
    client: reqwest::Client,
    conn: CdpConnection,
    tabs: Vec<PageTarget>,
    current_tab: usize,
    frame_selector: Option<String>,
    screenshot_quality: u8,
    screenshot_max_width: u32,
}

impl RealDriver {
    /// Connect to the first page target of an already-running browser.
    pub async fn connect(port: u16, config: &BrowserConfig) -> Result<Self> {
        let client = reqwest::Client::new();
        let tabs = cdp::list_pages(&client, port).await?;
        let first = tabs.first().ok_or_else(|| EngineError::BrowserStart {
            reason: format!("browser on port {port} exposes no page targets"),
        })?;
        let ws_url = first
            .ws_url
            .clone()
            .ok_or_else(|| EngineError::BrowserStart {
                reason: "page target has no debugger websocket".to_string(),
            })?;
        let conn = CdpConnection::connect(&ws_url).await?;

        Ok(Self {
            port,
            client,
            conn,
            tabs,
            current_tab: 0,
            frame_selector: None,
            screenshot_quality: config.screenshot_quality,
            screenshot_max_width: config.screenshot_max_width,
        })
    }

    /// Document expression honoring the current frame scope.
    fn doc_expr(&self) -> String {
        match &self.frame_selector {
            Some(sel) => format!(
                "(document.querySelector({}) ? document.querySelector({}).contentDocument : document)",
                json!(sel),
                json!(sel)
            ),
            None => "document".to_string(),
        }
    }

    /// JS expression resolving a selector to an element (or null).
    fn element_expr(&self, selector: &str) -> String {
        let doc = self.doc_expr();
        if selector.starts_with('/') || selector.starts_with("(/") {
            format!(
                "{doc}.evaluate({sel}, {doc}, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue",
                sel = json!(selector)
            )
        } else {
            format!("{doc}.querySelector({sel})", sel = json!(selector))
        }
    }

    async fn eval(&mut self, expression: &str, timeout: Duration) -> Result<Value> {
        let result = self
            .conn
            .call(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
                timeout,
            )
            .await?;

        if let Some(details) = result.get("exceptionDetails") {
            let text = details
                .get("exception")
                .and_then(|e| e.get("description"))
                .and_then(Value::as_str)
                .unwrap_or("script threw");
            return Err(EngineError::ActionFailed {
                action: "evaluate".to_string(),
                reason: text.to_string(),
            });
        }

        Ok(result
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Wait until the selector resolves, then return its viewport center.
    async fn element_center(&mut self, selector: &str, timeout: Duration) -> Result<(f64, f64)> {
        self.wait_for_selector(selector, WaitState::Present, timeout)
            .await?;

        let expr = format!(
            "(() => {{ const el = {el}; if (!el) return null; \
             el.scrollIntoView({{block: 'center', inline: 'center'}}); \
             const r = el.getBoundingClientRect(); \
             return {{x: r.x + r.width / 2, y: r.y + r.height / 2, w: r.width, h: r.height}}; }})()",
            el = self.element_expr(selector)
        );
        let rect = self.eval(&expr, timeout).await?;

        let (x, y, w, h) = match (
            rect.get("x").and_then(Value::as_f64),
            rect.get("y").and_then(Value::as_f64),
            rect.get("w").and_then(Value::as_f64),
            rect.get("h").and_then(Value::as_f64),
        ) {
            (Some(x), Some(y), Some(w), Some(h)) => (x, y, w, h),
            _ => {
                return Err(EngineError::ElementNotFound {
                    selector: selector.to_string(),
                })
            }
        };
        if w <= 0.0 || h <= 0.0 {
            return Err(EngineError::ElementNotVisible {
                selector: selector.to_string(),
            });
        }
        Ok((x, y))
    }

    async fn mouse_event(&mut self, event_type: &str, x: f64, y: f64, clicks: u32) -> Result<()> {
        self.conn
            .call(
                "Input.dispatchMouseEvent",
                json!({
                    "type": event_type,
                    "x": x,
                    "y": y,
                    "button": "left",
                    "clickCount": clicks,
                }),
                Duration::from_secs(5),
            )
            .await?;
        Ok(())
    }

    async fn key_event(&mut self, event_type: &str, key: &str, modifiers: u32) -> Result<()> {
        let text = if event_type == "keyDown" && key.chars().count() == 1 {
            Some(key.to_string())
        } else {
            None
        };
        self.conn
            .call(
                "Input.dispatchKeyEvent",
                json!({
                    "type": event_type,
                    "key": key,
                    "text": text,
                    "modifiers": modifiers,
                }),
                Duration::from_secs(5),
            )
            .await?;
        Ok(())
    }

    async fn connect_to_tab(&mut self, index: usize) -> Result<()> {
        let target = self
            .tabs
            .get(index)
            .ok_or_else(|| EngineError::ActionFailed {
                action: "switch_tab".to_string(),
                reason: format!("no tab at index {index} ({} open)", self.tabs.len()),
            })?;
        let ws_url = target
            .ws_url
            .clone()
            .ok_or_else(|| EngineError::BrowserConnectionLost {
                reason: "tab has no debugger websocket".to_string(),
            })?;

        let _ = self.conn.close().await;
        self.conn = CdpConnection::connect(&ws_url).await?;
        self.current_tab = index;
        self.frame_selector = None;
        self.conn
            .call("Page.bringToFront", json!({}), Duration::from_secs(5))
            .await?;
        Ok(())
    }

    async fn refresh_tabs(&mut self) -> Result<()> {
        self.tabs = cdp::list_pages(&self.client, self.port).await?;
        Ok(())
    }

    /// Downscale oversized screenshots before shipping them to clients.
    fn shrink_screenshot(&self, base64_img: &str) -> Result<String> {
        let bytes = STANDARD
            .decode(base64_img.as_bytes())
            .map_err(|e| EngineError::ScreenshotFailed {
                reason: format!("capture returned invalid base64: {e}"),
            })?;
        let img = image::load_from_memory(&bytes).map_err(|e| EngineError::ScreenshotFailed {
            reason: format!("capture returned undecodable image: {e}"),
        })?;

        if img.width() <= self.screenshot_max_width {
            return Ok(base64_img.to_string());
        }

        let scale = self.screenshot_max_width as f64 / img.width() as f64;
        let resized = img.resize(
            self.screenshot_max_width,
            (img.height() as f64 * scale) as u32,
            image::imageops::FilterType::Triangle,
        );
        let mut out = std::io::Cursor::new(Vec::new());
        resized
            .write_to(&mut out, image::ImageFormat::Jpeg)
            .map_err(|e| EngineError::ScreenshotFailed {
                reason: format!("re-encode failed: {e}"),
            })?;
        Ok(STANDARD.encode(out.into_inner()))
    }
}

#[async_trait]
impl Driver for RealDriver {
    async fn goto(&mut self, url: &str, timeout: Duration) -> Result<()> {
        let result = self
            .conn
            .call("Page.navigate", json!({ "url": url }), timeout)
            .await
            .map_err(|e| EngineError::PageLoadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        if let Some(error_text) = result.get("errorText").and_then(Value::as_str) {
            if !error_text.is_empty() {
                return Err(EngineError::PageLoadFailed {
                    url: url.to_string(),
                    reason: error_text.to_string(),
                });
            }
        }

        // Poll readyState instead of subscribing to load events.
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let state = self
                .eval("document.readyState", Duration::from_secs(5))
                .await?;
            if state.as_str() == Some("complete") {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(EngineError::PageLoadTimeout {
                    url: url.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn click(&mut self, selector: &str, timeout: Duration) -> Result<()> {
        let (x, y) = self.element_center(selector, timeout).await?;
        self.click_at(x, y).await
    }

    async fn click_at(&mut self, x: f64, y: f64) -> Result<()> {
        self.mouse_event("mouseMoved", x, y, 0).await?;
        self.mouse_event("mousePressed", x, y, 1).await?;
        self.mouse_event("mouseReleased", x, y, 1).await
    }

    async fn fill(
        &mut self,
        selector: &str,
        value: &str,
        clear: bool,
        press_enter: bool,
        timeout: Duration,
    ) -> Result<()> {
        let (x, y) = self.element_center(selector, timeout).await?;
        self.click_at(x, y).await?;

        if clear {
            let expr = format!(
                "(() => {{ const el = {el}; if (el) {{ el.value = ''; \
                 el.dispatchEvent(new Event('input', {{bubbles: true}})); }} }})()",
                el = self.element_expr(selector)
            );
            self.eval(&expr, timeout).await?;
        }

        self.conn
            .call("Input.insertText", json!({ "text": value }), timeout)
            .await?;

        // Fire change so framework-bound inputs notice the new value.
        let expr = format!(
            "(() => {{ const el = {el}; if (el) \
             el.dispatchEvent(new Event('change', {{bubbles: true}})); }})()",
            el = self.element_expr(selector)
        );
        self.eval(&expr, timeout).await?;

        if press_enter {
            self.key_event("keyDown", "Enter", 0).await?;
            self.key_event("keyUp", "Enter", 0).await?;
        }
        Ok(())
    }

    async fn press(&mut self, keys: &[String]) -> Result<()> {
        let mut modifiers = 0u32;
        let mut main_keys = Vec::new();
        for key in keys {
            match key.as_str() {
                "Alt" => modifiers |= 1,
                "Control" | "Ctrl" => modifiers |= 2,
                "Meta" | "Command" => modifiers |= 4,
                "Shift" => modifiers |= 8,
                other => main_keys.push(other.to_string()),
            }
        }
        for key in &main_keys {
            self.key_event("keyDown", key, modifiers).await?;
            self.key_event("keyUp", key, modifiers).await?;
        }
        Ok(())
    }

    async fn hover(&mut self, selector: &str, timeout: Duration) -> Result<()> {
        let (x, y) = self.element_center(selector, timeout).await?;
        self.mouse_event("mouseMoved", x, y, 0).await
    }

    async fn scroll(&mut self, direction: ScrollDirection, amount: i64) -> Result<()> {
        let expr = match direction {
            ScrollDirection::Down => format!("window.scrollBy(0, {amount})"),
            ScrollDirection::Up => format!("window.scrollBy(0, -{amount})"),
            ScrollDirection::Top => "window.scrollTo(0, 0)".to_string(),
            ScrollDirection::Bottom => {
                "window.scrollTo(0, document.body.scrollHeight)".to_string()
            }
        };
        self.eval(&expr, Duration::from_secs(5)).await?;
        Ok(())
    }

    async fn wait_for_selector(
        &mut self,
        selector: &str,
        state: WaitState,
        timeout: Duration,
    ) -> Result<()> {
        let expr = format!("({el}) !== null", el = self.element_expr(selector));
        let want_present = state == WaitState::Present;
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let present = self
                .eval(&expr, Duration::from_secs(5))
                .await?
                .as_bool()
                .unwrap_or(false);
            if present == want_present {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(EngineError::ElementNotFound {
                    selector: selector.to_string(),
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn evaluate(&mut self, script: &str) -> Result<Value> {
        self.eval(script, Duration::from_secs(30)).await
    }

    async fn extract(&mut self, rules: &[ExtractRule]) -> Result<Value> {
        let doc = self.doc_expr();
        let mut parts = Vec::new();
        for rule in rules {
            let getter = match rule.extract_type {
                ExtractType::Text => "el.textContent ? el.textContent.trim() : ''".to_string(),
                ExtractType::Html => "el.outerHTML".to_string(),
                ExtractType::Attribute => {
                    format!("el.getAttribute({attr})", attr = json!(rule.attribute))
                }
            };
            let collector = if rule.selector.starts_with('/') {
                format!(
                    "(() => {{ const out = []; \
                     const it = {doc}.evaluate({sel}, {doc}, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null); \
                     for (let i = 0; i < it.snapshotLength; i++) {{ const el = it.snapshotItem(i); out.push({getter}); }} \
                     return out; }})()",
                    sel = json!(rule.selector)
                )
            } else {
                format!(
                    "Array.from({doc}.querySelectorAll({sel})).map(el => {getter})",
                    sel = json!(rule.selector)
                )
            };
            parts.push(format!("{name}: {collector}", name = json!(rule.name)));
        }

        let expr = format!("({{ {} }})", parts.join(", "));
        self.eval(&expr, Duration::from_secs(30))
            .await
            .map_err(|e| EngineError::ExtractFailed {
                reason: e.to_string(),
            })
    }

    async fn upload(&mut self, selector: &str, file_paths: &[String]) -> Result<()> {
        let doc = self
            .conn
            .call("DOM.getDocument", json!({}), Duration::from_secs(5))
            .await?;
        let root_id = doc
            .get("root")
            .and_then(|r| r.get("nodeId"))
            .and_then(Value::as_u64)
            .ok_or_else(|| EngineError::ActionFailed {
                action: "upload".to_string(),
                reason: "could not resolve document root".to_string(),
            })?;

        let node = self
            .conn
            .call(
                "DOM.querySelector",
                json!({ "nodeId": root_id, "selector": selector }),
                Duration::from_secs(5),
            )
            .await?;
        let node_id = node.get("nodeId").and_then(Value::as_u64).unwrap_or(0);
        if node_id == 0 {
            return Err(EngineError::ElementNotFound {
                selector: selector.to_string(),
            });
        }

        self.conn
            .call(
                "DOM.setFileInputFiles",
                json!({ "files": file_paths, "nodeId": node_id }),
                Duration::from_secs(10),
            )
            .await?;
        Ok(())
    }

    async fn screenshot(&mut self, full_page: bool, selector: Option<&str>) -> Result<String> {
        let mut params = json!({
            "format": "jpeg",
            "quality": self.screenshot_quality,
        });

        if let Some(selector) = selector {
            let expr = format!(
                "(() => {{ const el = {el}; if (!el) return null; \
                 const r = el.getBoundingClientRect(); \
                 return {{x: r.x, y: r.y, w: r.width, h: r.height}}; }})()",
                el = self.element_expr(selector)
            );
            let rect = self.eval(&expr, Duration::from_secs(5)).await?;
            let (x, y, w, h) = match (
                rect.get("x").and_then(Value::as_f64),
                rect.get("y").and_then(Value::as_f64),
                rect.get("w").and_then(Value::as_f64),
                rect.get("h").and_then(Value::as_f64),
            ) {
                (Some(x), Some(y), Some(w), Some(h)) if w > 0.0 && h > 0.0 => (x, y, w, h),
                _ => {
                    return Err(EngineError::ScreenshotFailed {
                        reason: format!("element not capturable: {selector}"),
                    })
                }
            };
            params["clip"] = json!({ "x": x, "y": y, "width": w, "height": h, "scale": 1 });
        } else if full_page {
            let metrics = self
                .conn
                .call("Page.getLayoutMetrics", json!({}), Duration::from_secs(5))
                .await?;
            if let Some(size) = metrics.get("cssContentSize").or(metrics.get("contentSize")) {
                params["clip"] = json!({
                    "x": 0, "y": 0,
                    "width": size.get("width").cloned().unwrap_or(json!(0)),
                    "height": size.get("height").cloned().unwrap_or(json!(0)),
                    "scale": 1,
                });
                params["captureBeyondViewport"] = json!(true);
            }
        }

        let result = self
            .conn
            .call("Page.captureScreenshot", params, Duration::from_secs(30))
            .await?;
        let data = result
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::ScreenshotFailed {
                reason: "capture returned no data".to_string(),
            })?;

        self.shrink_screenshot(data)
    }

    async fn switch_frame(&mut self, selector: Option<&str>) -> Result<()> {
        if let Some(selector) = selector {
            let expr = format!(
                "({el}) !== null && ({el}).tagName === 'IFRAME'",
                el = self.element_expr(selector)
            );
            // Resolve against the main document, not the current frame.
            let saved = self.frame_selector.take();
            let ok = self
                .eval(&expr, Duration::from_secs(5))
                .await?
                .as_bool()
                .unwrap_or(false);
            if !ok {
                self.frame_selector = saved;
                return Err(EngineError::ElementNotFound {
                    selector: selector.to_string(),
                });
            }
            self.frame_selector = Some(selector.to_string());
        } else {
            self.frame_selector = None;
        }
        Ok(())
    }

    async fn switch_tab(&mut self, index: usize) -> Result<()> {
        self.refresh_tabs().await?;
        self.connect_to_tab(index).await
    }

    async fn new_tab(&mut self, url: Option<&str>) -> Result<()> {
        cdp::open_page(&self.client, self.port, url).await?;
        self.refresh_tabs().await?;
        let last = self.tabs.len().saturating_sub(1);
        self.connect_to_tab(last).await
    }

    async fn close_tab(&mut self) -> Result<()> {
        if self.tabs.len() <= 1 {
            return Err(EngineError::ActionFailed {
                action: "close_tab".to_string(),
                reason: "refusing to close the last tab".to_string(),
            });
        }
        let target_id = self.tabs[self.current_tab].id.clone();
        let _ = self.conn.close().await;
        cdp::close_page(&self.client, self.port, &target_id).await?;
        self.refresh_tabs().await?;
        let last = self.tabs.len().saturating_sub(1);
        self.connect_to_tab(last).await
    }

    async fn drag(
        &mut self,
        from_selector: &str,
        to_selector: &str,
        timeout: Duration,
    ) -> Result<()> {
        let (fx, fy) = self.element_center(from_selector, timeout).await?;
        let (tx, ty) = self.element_center(to_selector, timeout).await?;

        self.mouse_event("mouseMoved", fx, fy, 0).await?;
        self.mouse_event("mousePressed", fx, fy, 1).await?;
        // Intermediate moves so drop zones see dragover.
        let steps = 5;
        for i in 1..=steps {
            let t = i as f64 / steps as f64;
            let x = fx + (tx - fx) * t;
            let y = fy + (ty - fy) * t;
            self.mouse_event("mouseMoved", x, y, 0).await?;
        }
        self.mouse_event("mouseReleased", tx, ty, 1).await
    }

    async fn close(&mut self) -> Result<()> {
        self.conn.close().await
    }
}
