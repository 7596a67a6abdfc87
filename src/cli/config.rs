// ABOUTME: Configuration management for the webpilot service
// ABOUTME: Loads config.yaml and applies environment variable overrides at startup

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::engine::error::{EngineError, Result};

/// Service configuration, resolved once at startup and read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub browser: BrowserConfig,

    #[serde(default)]
    pub task: TaskConfig,

    #[serde(default)]
    pub websocket: WebSocketConfig,

    #[serde(default)]
    pub simulation: SimulationConfig,

    #[serde(default)]
    pub performance: PerformanceConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Path to the Chrome/Chromium binary; empty means "not configured".
    #[serde(default)]
    pub executable_path: String,
    #[serde(default = "default_port_min")]
    pub debug_port_min: u16,
    #[serde(default = "default_port_max")]
    pub debug_port_max: u16,
    #[serde(default)]
    pub headless: bool,
    /// Page navigation timeout, milliseconds.
    #[serde(default = "default_page_timeout")]
    pub page_timeout: u64,
    /// Per-action timeout, milliseconds.
    #[serde(default = "default_action_timeout")]
    pub action_timeout: u64,
    /// Seconds to wait for the debug endpoint after launching the process.
    #[serde(default = "default_start_timeout")]
    pub start_timeout: u64,
    #[serde(default = "default_screenshot_quality")]
    pub screenshot_quality: u8,
    #[serde(default = "default_screenshot_max_width")]
    pub screenshot_max_width: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before an automatic retry attempt, milliseconds.
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64,
    /// Worker pool size; bounds concurrently live browser processes.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    /// Server ping cadence, milliseconds.
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    /// How long to wait for a pong before presuming the peer dead, milliseconds.
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Base delay for client reconnect backoff, milliseconds.
    #[serde(default = "default_reconnect_delay_base")]
    pub reconnect_delay_base: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Artificial per-action delay, milliseconds.
    #[serde(default = "default_sim_action_delay")]
    pub action_delay: u64,
    /// Artificial browser start delay, milliseconds.
    #[serde(default = "default_sim_start_delay")]
    pub browser_start_delay: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    #[serde(default = "default_batch_log_size")]
    pub batch_log_size: usize,
    /// Batch flush interval, milliseconds.
    #[serde(default = "default_batch_log_interval")]
    pub batch_log_interval: u64,
    #[serde(default)]
    pub disable_realtime_screenshot: bool,
    /// Send a realtime screenshot every N actions.
    #[serde(default = "default_screenshot_interval")]
    pub screenshot_interval: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Config {
    /// Load configuration from a YAML file, then apply environment overrides.
    ///
    /// A missing file is not an error; defaults are used so the service can
    /// start in simulation mode with zero setup.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let raw = std::fs::read_to_string(p)?;
                serde_yaml::from_str(&raw).map_err(|e| EngineError::Config {
                    reason: format!("failed to parse {}: {e}", p.display()),
                })?
            }
            Some(p) => {
                tracing::warn!("config file not found: {}, using defaults", p.display());
                Config::default()
            }
            None => Config::default(),
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("WEBPILOT_BROWSER_PATH") {
            self.browser.executable_path = path;
        }
        if let Some(headless) = env_bool("WEBPILOT_HEADLESS") {
            self.browser.headless = headless;
        }
        if let Some(enabled) = env_bool("WEBPILOT_SIMULATION") {
            self.simulation.enabled = enabled;
        }
        if let Ok(port) = std::env::var("WEBPILOT_API_PORT") {
            if let Ok(port) = port.parse() {
                self.api.port = port;
            }
        }
        if let Ok(level) = std::env::var("WEBPILOT_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.browser.debug_port_min > self.browser.debug_port_max {
            return Err(EngineError::Config {
                reason: format!(
                    "debug_port_min ({}) must not exceed debug_port_max ({})",
                    self.browser.debug_port_min, self.browser.debug_port_max
                ),
            });
        }
        if self.task.max_concurrent == 0 {
            return Err(EngineError::Config {
                reason: "task.max_concurrent must be at least 1".to_string(),
            });
        }
        if self.performance.batch_log_size == 0 {
            return Err(EngineError::Config {
                reason: "performance.batch_log_size must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn page_timeout(&self) -> Duration {
        Duration::from_millis(self.browser.page_timeout)
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.browser.action_timeout)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.task.retry_delay)
    }
}

fn default_true() -> bool {
    true
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            executable_path: String::new(),
            debug_port_min: default_port_min(),
            debug_port_max: default_port_max(),
            headless: false,
            page_timeout: default_page_timeout(),
            action_timeout: default_action_timeout(),
            start_timeout: default_start_timeout(),
            screenshot_quality: default_screenshot_quality(),
            screenshot_max_width: default_screenshot_max_width(),
        }
    }
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay: default_retry_delay(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            ping_interval: default_ping_interval(),
            pong_timeout: default_pong_timeout(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_delay_base: default_reconnect_delay_base(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            action_delay: default_sim_action_delay(),
            browser_start_delay: default_sim_start_delay(),
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            batch_log_size: default_batch_log_size(),
            batch_log_interval: default_batch_log_interval(),
            disable_realtime_screenshot: false,
            screenshot_interval: default_screenshot_interval(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_api_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_port_min() -> u16 {
    9222
}
fn default_port_max() -> u16 {
    9299
}
fn default_page_timeout() -> u64 {
    30_000
}
fn default_action_timeout() -> u64 {
    5_000
}
fn default_start_timeout() -> u64 {
    10
}
fn default_screenshot_quality() -> u8 {
    70
}
fn default_screenshot_max_width() -> u32 {
    1280
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay() -> u64 {
    1_000
}
fn default_max_concurrent() -> usize {
    4
}
fn default_ping_interval() -> u64 {
    30_000
}
fn default_pong_timeout() -> u64 {
    10_000
}
fn default_max_reconnect_attempts() -> u32 {
    5
}
fn default_reconnect_delay_base() -> u64 {
    3_000
}
fn default_sim_action_delay() -> u64 {
    300
}
fn default_sim_start_delay() -> u64 {
    500
}
fn default_batch_log_size() -> usize {
    10
}
fn default_batch_log_interval() -> u64 {
    100
}
fn default_screenshot_interval() -> usize {
    1
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_api_port() -> u16 {
    8000
}
fn default_log_level() -> String {
    "info".to_string()
}
