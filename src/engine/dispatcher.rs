// ABOUTME: Translates declarative actions into driver calls
// ABOUTME: One exhaustive match; transient element errors get one local retry

use std::time::Duration;

use crate::actions::{convert_selector, Action, ActionOutcome};
use crate::browser::Driver;
use crate::browser::vision;
use crate::engine::error::{error_code, Result};

const LOCAL_RETRY_DELAY: Duration = Duration::from_millis(500);
const DEFAULT_MATCH_CONFIDENCE: f32 = 0.8;

/// Stateless action dispatcher bound to the configured timeouts.
#[derive(Debug, Clone, Copy)]
pub struct ActionDispatcher {
    page_timeout: Duration,
    action_timeout: Duration,
}

impl ActionDispatcher {
    pub fn new(page_timeout: Duration, action_timeout: Duration) -> Self {
        Self {
            page_timeout,
            action_timeout,
        }
    }

    /// Execute one action against the driver.
    ///
    /// Element-level faults (not found, not visible, slow page) are
    /// retried once after a short pause; everything else propagates so
    /// the task-level policy decides.
    pub async fn dispatch(
        &self,
        driver: &mut dyn Driver,
        action: &Action,
    ) -> Result<ActionOutcome> {
        match self.execute(driver, action).await {
            Ok(outcome) => Ok(outcome),
            Err(e) if error_code(&e).locally_recoverable() => {
                tracing::debug!(
                    action = action.kind(),
                    error = %e,
                    "transient action failure, retrying once"
                );
                tokio::time::sleep(LOCAL_RETRY_DELAY).await;
                self.execute(driver, action).await
            }
            Err(e) => Err(e),
        }
    }

    fn timeout(&self, override_ms: Option<u64>) -> Duration {
        override_ms
            .map(Duration::from_millis)
            .unwrap_or(self.action_timeout)
    }

    async fn execute(
        &self,
        driver: &mut dyn Driver,
        action: &Action,
    ) -> Result<ActionOutcome> {
        match action {
            Action::Goto { url, timeout } => {
                let timeout = timeout.map(Duration::from_millis).unwrap_or(self.page_timeout);
                driver.goto(url, timeout).await?;
                Ok(ActionOutcome::empty())
            }

            Action::Click {
                selector,
                selector_type,
                timeout,
                by_image,
                template_path,
                confidence,
                offset,
            } => {
                if *by_image {
                    self.click_by_image(
                        driver,
                        template_path.as_deref(),
                        confidence.unwrap_or(DEFAULT_MATCH_CONFIDENCE),
                        offset.unwrap_or((0, 0)),
                    )
                    .await?;
                } else {
                    let selector = convert_selector(selector, *selector_type);
                    driver.click(&selector, self.timeout(*timeout)).await?;
                }
                Ok(ActionOutcome::empty())
            }

            Action::Input {
                selector,
                selector_type,
                value,
                clear,
                press_enter,
            } => {
                let selector = convert_selector(selector, *selector_type);
                driver
                    .fill(&selector, value, *clear, *press_enter, self.action_timeout)
                    .await?;
                Ok(ActionOutcome::empty())
            }

            Action::Wait { timeout } => {
                tokio::time::sleep(Duration::from_millis(*timeout)).await;
                Ok(ActionOutcome::empty())
            }

            Action::WaitElement {
                selector,
                selector_type,
                state,
                timeout,
            } => {
                let selector = convert_selector(selector, *selector_type);
                driver
                    .wait_for_selector(&selector, *state, self.timeout(*timeout))
                    .await?;
                Ok(ActionOutcome::empty())
            }

            Action::Scroll { direction, amount } => {
                driver.scroll(*direction, *amount).await?;
                Ok(ActionOutcome::empty())
            }

            Action::Screenshot {
                full_page,
                selector,
            } => {
                let image = driver.screenshot(*full_page, selector.as_deref()).await?;
                Ok(ActionOutcome::with_screenshot(image))
            }

            Action::Extract { selectors } => {
                let data = driver.extract(selectors).await?;
                Ok(ActionOutcome::with_data(data))
            }

            Action::Press { keys } => {
                driver.press(keys).await?;
                Ok(ActionOutcome::empty())
            }

            Action::Hover {
                selector,
                selector_type,
                timeout,
            } => {
                let selector = convert_selector(selector, *selector_type);
                driver.hover(&selector, self.timeout(*timeout)).await?;
                Ok(ActionOutcome::empty())
            }

            Action::Upload {
                selector,
                selector_type,
                file_paths,
            } => {
                let selector = convert_selector(selector, *selector_type);
                driver.upload(&selector, file_paths).await?;
                Ok(ActionOutcome::empty())
            }

            Action::Evaluate { script } => {
                let value = driver.evaluate(script).await?;
                Ok(ActionOutcome::with_data(value))
            }

            Action::SwitchFrame { selector } => {
                driver.switch_frame(selector.as_deref()).await?;
                Ok(ActionOutcome::empty())
            }

            Action::SwitchTab { index } => {
                driver.switch_tab(*index).await?;
                Ok(ActionOutcome::empty())
            }

            Action::NewTab { url } => {
                driver.new_tab(url.as_deref()).await?;
                Ok(ActionOutcome::empty())
            }

            Action::CloseTab => {
                driver.close_tab().await?;
                Ok(ActionOutcome::empty())
            }

            Action::Drag {
                from_selector,
                to_selector,
                timeout,
            } => {
                driver
                    .drag(from_selector, to_selector, self.timeout(*timeout))
                    .await?;
                Ok(ActionOutcome::empty())
            }
        }
    }

    /// Locate a template on the live page and click its center.
    async fn click_by_image(
        &self,
        driver: &mut dyn Driver,
        template_path: Option<&str>,
        confidence: f32,
        offset: (i32, i32),
    ) -> Result<()> {
        let template_path =
            template_path.ok_or_else(|| crate::engine::error::EngineError::ActionFailed {
                action: "click".to_string(),
                reason: "by_image requires template_path".to_string(),
            })?;

        // Simulated pages have nothing to match against.
        if driver.is_simulated() {
            return driver.click_at(0.0, 0.0).await;
        }

        let template = vision::load_template(template_path)?;
        let screenshot = driver.screenshot(false, None).await?;
        let haystack = vision::decode_screenshot(&screenshot)?;

        let found = vision::find_template(&haystack, &template, confidence).ok_or_else(|| {
            crate::engine::error::EngineError::ElementNotFound {
                selector: format!("image:{template_path}"),
            }
        })?;

        tracing::debug!(
            template = template_path,
            x = found.x,
            y = found.y,
            confidence = found.confidence,
            "template matched"
        );
        driver
            .click_at(
                found.x as f64 + offset.0 as f64,
                found.y as f64 + offset.1 as f64,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::simulated::SimulatedDriver;
    use crate::cli::config::SimulationConfig;

    fn driver() -> SimulatedDriver {
        SimulatedDriver::new(&SimulationConfig {
            enabled: true,
            action_delay: 0,
            browser_start_delay: 0,
        })
    }

    fn dispatcher() -> ActionDispatcher {
        ActionDispatcher::new(Duration::from_secs(30), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_screenshot_action_returns_image() {
        let mut driver = driver();
        let outcome = dispatcher()
            .dispatch(
                &mut driver,
                &Action::Screenshot {
                    full_page: false,
                    selector: None,
                },
            )
            .await
            .unwrap();

        assert!(outcome.screenshot.is_some());
        assert!(outcome.data.is_none());
    }

    #[tokio::test]
    async fn test_extract_action_returns_data() {
        let mut driver = driver();
        let outcome = dispatcher()
            .dispatch(
                &mut driver,
                &Action::Extract {
                    selectors: vec![crate::actions::ExtractRule {
                        name: "title".into(),
                        selector: "h1".into(),
                        selector_type: Default::default(),
                        extract_type: Default::default(),
                        attribute: "href".into(),
                    }],
                },
            )
            .await
            .unwrap();

        let data = outcome.data.unwrap();
        assert!(data.get("title").is_some());
    }

    #[tokio::test]
    async fn test_image_click_requires_template_path() {
        let mut driver = driver();
        let result = dispatcher()
            .dispatch(
                &mut driver,
                &Action::Click {
                    selector: String::new(),
                    selector_type: Default::default(),
                    timeout: None,
                    by_image: true,
                    template_path: None,
                    confidence: None,
                    offset: None,
                },
            )
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_selector_conversion_applied_before_driver() {
        // The simulated driver accepts any selector; this exercises the
        // conversion path end to end without asserting on internals.
        let mut driver = driver();
        let outcome = dispatcher()
            .dispatch(
                &mut driver,
                &Action::Click {
                    selector: "login".into(),
                    selector_type: crate::actions::SelectorType::Id,
                    timeout: None,
                    by_image: false,
                    template_path: None,
                    confidence: None,
                    offset: None,
                },
            )
            .await;
        assert!(outcome.is_ok());
    }
}
