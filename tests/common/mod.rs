// ABOUTME: Shared test fixtures: fast configs and a scripted driver
// ABOUTME: The scripted driver fails on cue so error paths are reachable

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use webpilot::actions::{ExtractRule, ScrollDirection, WaitState};
use webpilot::browser::Driver;
use webpilot::cli::config::Config;
use webpilot::engine::error::{EngineError, Result};

/// Config tuned for tests: simulation with zero artificial delays and a
/// short retry delay.
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.simulation.enabled = true;
    config.simulation.action_delay = 0;
    config.simulation.browser_start_delay = 0;
    config.task.retry_delay = 10;
    config.performance.disable_realtime_screenshot = true;
    config
}

/// Driver whose clicks fail a configured number of times before
/// succeeding. Everything else succeeds immediately.
pub struct ScriptedDriver {
    click_failures: Arc<AtomicUsize>,
    pub click_attempts: Arc<AtomicUsize>,
}

impl ScriptedDriver {
    pub fn failing_clicks(failures: usize) -> Self {
        Self {
            click_failures: Arc::new(AtomicUsize::new(failures)),
            click_attempts: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Driver for ScriptedDriver {
    async fn goto(&mut self, _url: &str, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn click(&mut self, selector: &str, _timeout: Duration) -> Result<()> {
        self.click_attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.click_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.click_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(EngineError::ElementNotFound {
                selector: selector.to_string(),
            });
        }
        Ok(())
    }

    async fn click_at(&mut self, _x: f64, _y: f64) -> Result<()> {
        Ok(())
    }

    async fn fill(
        &mut self,
        _selector: &str,
        _value: &str,
        _clear: bool,
        _press_enter: bool,
        _timeout: Duration,
    ) -> Result<()> {
        Ok(())
    }

    async fn press(&mut self, _keys: &[String]) -> Result<()> {
        Ok(())
    }

    async fn hover(&mut self, _selector: &str, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn scroll(&mut self, _direction: ScrollDirection, _amount: i64) -> Result<()> {
        Ok(())
    }

    async fn wait_for_selector(
        &mut self,
        _selector: &str,
        _state: WaitState,
        _timeout: Duration,
    ) -> Result<()> {
        Ok(())
    }

    async fn evaluate(&mut self, _script: &str) -> Result<Value> {
        Ok(Value::Null)
    }

    async fn extract(&mut self, _rules: &[ExtractRule]) -> Result<Value> {
        Ok(json!({}))
    }

    async fn upload(&mut self, _selector: &str, _file_paths: &[String]) -> Result<()> {
        Ok(())
    }

    async fn screenshot(&mut self, _full_page: bool, _selector: Option<&str>) -> Result<String> {
        Ok("c2NyZWVuc2hvdA==".to_string())
    }

    async fn switch_frame(&mut self, _selector: Option<&str>) -> Result<()> {
        Ok(())
    }

    async fn switch_tab(&mut self, _index: usize) -> Result<()> {
        Ok(())
    }

    async fn new_tab(&mut self, _url: Option<&str>) -> Result<()> {
        Ok(())
    }

    async fn close_tab(&mut self) -> Result<()> {
        Ok(())
    }

    async fn drag(
        &mut self,
        _from_selector: &str,
        _to_selector: &str,
        _timeout: Duration,
    ) -> Result<()> {
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
