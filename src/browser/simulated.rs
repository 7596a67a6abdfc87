// ABOUTME: Simulated driver producing plausible outcomes without a browser
// ABOUTME: Lets the full pipeline run on machines with no Chrome installed

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use crate::actions::{ExtractRule, ScrollDirection, WaitState};
use crate::browser::driver::Driver;
use crate::cli::config::SimulationConfig;
use crate::engine::error::Result;

/// Base64 of a 1x1 white PNG, used as the stand-in screenshot.
const PLACEHOLDER_SCREENSHOT: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mP8z8BQDwAEhQGAhKmMIQAAAABJRU5ErkJggg==";

/// Driver that sleeps instead of talking to a browser.
///
/// Outcomes are deterministic: navigation and interaction succeed,
/// extraction returns placeholder rows, screenshots return a fixed
/// 1x1 image. Tab and frame switches update internal counters so the
/// same action sequences remain valid in both modes.
pub struct SimulatedDriver {
    action_delay: Duration,
    current_url: String,
    tab_count: usize,
    current_tab: usize,
}

impl SimulatedDriver {
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            action_delay: Duration::from_millis(config.action_delay),
            current_url: String::new(),
            tab_count: 1,
            current_tab: 0,
        }
    }

    async fn simulate_work(&self) {
        tokio::time::sleep(self.action_delay).await;
    }
}

#[async_trait]
impl Driver for SimulatedDriver {
    async fn goto(&mut self, url: &str, _timeout: Duration) -> Result<()> {
        self.simulate_work().await;
        self.current_url = url.to_string();
        tracing::debug!(url, "simulated navigation");
        Ok(())
    }

    async fn click(&mut self, selector: &str, _timeout: Duration) -> Result<()> {
        self.simulate_work().await;
        tracing::debug!(selector, "simulated click");
        Ok(())
    }

    async fn click_at(&mut self, x: f64, y: f64) -> Result<()> {
        self.simulate_work().await;
        tracing::debug!(x, y, "simulated coordinate click");
        Ok(())
    }

    async fn fill(
        &mut self,
        selector: &str,
        value: &str,
        _clear: bool,
        _press_enter: bool,
        _timeout: Duration,
    ) -> Result<()> {
        self.simulate_work().await;
        tracing::debug!(selector, chars = value.len(), "simulated input");
        Ok(())
    }

    async fn press(&mut self, _keys: &[String]) -> Result<()> {
        self.simulate_work().await;
        Ok(())
    }

    async fn hover(&mut self, _selector: &str, _timeout: Duration) -> Result<()> {
        self.simulate_work().await;
        Ok(())
    }

    async fn scroll(&mut self, _direction: ScrollDirection, _amount: i64) -> Result<()> {
        self.simulate_work().await;
        Ok(())
    }

    async fn wait_for_selector(
        &mut self,
        _selector: &str,
        _state: WaitState,
        _timeout: Duration,
    ) -> Result<()> {
        self.simulate_work().await;
        Ok(())
    }

    async fn evaluate(&mut self, _script: &str) -> Result<Value> {
        self.simulate_work().await;
        Ok(Value::Null)
    }

    async fn extract(&mut self, rules: &[ExtractRule]) -> Result<Value> {
        self.simulate_work().await;
        let mut out = serde_json::Map::new();
        for rule in rules {
            out.insert(
                rule.name.clone(),
                json!([format!("simulated value for {}", rule.selector)]),
            );
        }
        Ok(Value::Object(out))
    }

    async fn upload(&mut self, _selector: &str, file_paths: &[String]) -> Result<()> {
        self.simulate_work().await;
        tracing::debug!(count = file_paths.len(), "simulated upload");
        Ok(())
    }

    async fn screenshot(&mut self, _full_page: bool, _selector: Option<&str>) -> Result<String> {
        self.simulate_work().await;
        Ok(PLACEHOLDER_SCREENSHOT.to_string())
    }

    async fn switch_frame(&mut self, _selector: Option<&str>) -> Result<()> {
        self.simulate_work().await;
        Ok(())
    }

    async fn switch_tab(&mut self, index: usize) -> Result<()> {
        self.simulate_work().await;
        if index < self.tab_count {
            self.current_tab = index;
        }
        Ok(())
    }

    async fn new_tab(&mut self, url: Option<&str>) -> Result<()> {
        self.simulate_work().await;
        self.tab_count += 1;
        self.current_tab = self.tab_count - 1;
        if let Some(url) = url {
            self.current_url = url.to_string();
        }
        Ok(())
    }

    async fn close_tab(&mut self) -> Result<()> {
        self.simulate_work().await;
        if self.tab_count > 1 {
            self.tab_count -= 1;
            self.current_tab = self.current_tab.min(self.tab_count - 1);
        }
        Ok(())
    }

    async fn drag(
        &mut self,
        from_selector: &str,
        to_selector: &str,
        _timeout: Duration,
    ) -> Result<()> {
        self.simulate_work().await;
        tracing::debug!(from_selector, to_selector, "simulated drag");
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_simulated(&self) -> bool {
        true
    }
}
