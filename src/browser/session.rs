// ABOUTME: Browser session lifecycle: process launch, port allocation, teardown
// ABOUTME: Falls back to the simulated driver when a real browser cannot start

use rand::Rng;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::process::{Child, Command};
use uuid::Uuid;

use crate::browser::driver::Driver;
use crate::browser::real::RealDriver;
use crate::browser::simulated::SimulatedDriver;
use crate::cli::config::Config;
use crate::engine::error::{EngineError, Result};

const PORT_ALLOCATION_ATTEMPTS: u32 = 50;

/// One live browser (or simulated browser) owned by exactly one task.
pub struct BrowserSession {
    pub id: Uuid,
    pub driver: Box<dyn Driver>,
    port: Option<u16>,
    process: Option<Child>,
    profile_dir: Option<PathBuf>,
}

impl BrowserSession {
    /// Wrap an externally constructed driver. Used by tests to inject
    /// scripted drivers without touching processes or ports.
    pub fn with_driver(driver: Box<dyn Driver>) -> Self {
        Self {
            id: Uuid::new_v4(),
            driver,
            port: None,
            process: None,
            profile_dir: None,
        }
    }

    pub fn is_simulated(&self) -> bool {
        self.driver.is_simulated()
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }
}

/// Hands out sessions and guarantees no two concurrent tasks share a
/// debugging port. Ports return to the pool on release, including when
/// a task fails or is cancelled mid-flight.
pub struct SessionManager {
    config: Config,
    ports_in_use: Mutex<HashSet<u16>>,
    sessions_acquired: AtomicU64,
}

impl SessionManager {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            ports_in_use: Mutex::new(HashSet::new()),
            sessions_acquired: AtomicU64::new(0),
        }
    }

    pub fn sessions_acquired(&self) -> u64 {
        self.sessions_acquired.load(Ordering::Relaxed)
    }

    /// Acquire a session for one task. `headless` is the task's own
    /// setting, which overrides the configured default.
    ///
    /// A real browser is attempted when an executable is configured; any
    /// launch failure falls back to simulation when that is enabled,
    /// otherwise the error propagates and the task fails.
    pub async fn acquire(&self, headless: bool) -> Result<BrowserSession> {
        let session = if self.config.browser.executable_path.is_empty() {
            if !self.config.simulation.enabled {
                return Err(EngineError::BrowserStart {
                    reason: "no browser executable configured and simulation disabled"
                        .to_string(),
                });
            }
            self.acquire_simulated().await
        } else {
            match self.acquire_real(headless).await {
                Ok(session) => session,
                Err(e) if self.config.simulation.enabled => {
                    tracing::warn!(error = %e, "browser launch failed, falling back to simulation");
                    self.acquire_simulated().await
                }
                Err(e) => return Err(e),
            }
        };

        self.sessions_acquired.fetch_add(1, Ordering::Relaxed);
        Ok(session)
    }

    async fn acquire_simulated(&self) -> BrowserSession {
        tokio::time::sleep(Duration::from_millis(
            self.config.simulation.browser_start_delay,
        ))
        .await;
        BrowserSession::with_driver(Box::new(SimulatedDriver::new(&self.config.simulation)))
    }

    async fn acquire_real(&self, headless: bool) -> Result<BrowserSession> {
        let executable = &self.config.browser.executable_path;
        if !std::path::Path::new(executable).exists() {
            return Err(EngineError::BrowserNotFound {
                path: executable.clone(),
            });
        }

        let port = self.reserve_port()?;
        let profile_dir = std::env::temp_dir().join(format!("webpilot-profile-{port}"));

        match self.launch(executable, port, &profile_dir, headless).await {
            Ok((process, driver)) => Ok(BrowserSession {
                id: Uuid::new_v4(),
                driver: Box::new(driver),
                port: Some(port),
                process: Some(process),
                profile_dir: Some(profile_dir),
            }),
            Err(e) => {
                self.release_port(port);
                let _ = tokio::fs::remove_dir_all(&profile_dir).await;
                Err(e)
            }
        }
    }

    async fn launch(
        &self,
        executable: &str,
        port: u16,
        profile_dir: &PathBuf,
        headless: bool,
    ) -> Result<(Child, RealDriver)> {
        let mut cmd = Command::new(executable);
        cmd.arg(format!("--remote-debugging-port={port}"))
            .arg(format!("--user-data-dir={}", profile_dir.display()))
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-background-networking")
            .arg("about:blank")
            .kill_on_drop(true)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null());
        if headless {
            cmd.arg("--headless=new");
        }

        let mut process = cmd.spawn().map_err(|e| EngineError::BrowserStart {
            reason: format!("failed to spawn {executable}: {e}"),
        })?;

        match self.wait_for_debugger(port, &mut process).await {
            Ok(()) => {}
            Err(e) => {
                let _ = process.kill().await;
                return Err(e);
            }
        }

        match RealDriver::connect(port, &self.config.browser).await {
            Ok(driver) => Ok((process, driver)),
            Err(e) => {
                let _ = process.kill().await;
                Err(e)
            }
        }
    }

    async fn wait_for_debugger(&self, port: u16, process: &mut Child) -> Result<()> {
        let client = reqwest::Client::new();
        let deadline = tokio::time::Instant::now()
            + Duration::from_secs(self.config.browser.start_timeout);

        loop {
            if let Ok(Some(status)) = process.try_wait() {
                tracing::warn!(?status, port, "browser exited before the debugger came up");
                return Err(EngineError::BrowserProcessExited);
            }

            let probe = client
                .get(format!("http://127.0.0.1:{port}/json/version"))
                .timeout(Duration::from_secs(1))
                .send()
                .await;
            if matches!(probe, Ok(resp) if resp.status().is_success()) {
                return Ok(());
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(EngineError::BrowserStart {
                    reason: format!(
                        "debug endpoint on port {port} not ready within {}s",
                        self.config.browser.start_timeout
                    ),
                });
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    /// Whether anything else on the machine already holds the port. A
    /// throwaway bind catches external processes and stale browsers that
    /// our own bookkeeping cannot see.
    fn port_is_free(port: u16) -> bool {
        std::net::TcpListener::bind(("127.0.0.1", port)).is_ok()
    }

    /// Pick a port from the configured range that neither this process
    /// nor anything else on the machine holds, and mark it taken.
    pub(crate) fn reserve_port(&self) -> Result<u16> {
        let min = self.config.browser.debug_port_min;
        let max = self.config.browser.debug_port_max;
        let mut ports = match self.ports_in_use.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let range_size = (max - min) as usize + 1;
        if ports.len() >= range_size {
            return Err(EngineError::BrowserStart {
                reason: format!("all debugging ports in {min}..={max} are in use"),
            });
        }

        let mut rng = rand::thread_rng();
        for _ in 0..PORT_ALLOCATION_ATTEMPTS {
            let candidate = rng.gen_range(min..=max);
            if ports.contains(&candidate) || !Self::port_is_free(candidate) {
                continue;
            }
            ports.insert(candidate);
            return Ok(candidate);
        }

        // Random probing got unlucky; take the first free port linearly.
        for candidate in min..=max {
            if !ports.contains(&candidate) && Self::port_is_free(candidate) {
                ports.insert(candidate);
                return Ok(candidate);
            }
        }

        Err(EngineError::BrowserStart {
            reason: format!("no free debugging port in {min}..={max}"),
        })
    }

    pub(crate) fn release_port(&self, port: u16) {
        let mut ports = match self.ports_in_use.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        ports.remove(&port);
    }

    /// Tear down a session. Every step is best effort; the port always
    /// returns to the pool.
    pub async fn release(&self, mut session: BrowserSession) {
        if let Err(e) = session.driver.close().await {
            tracing::debug!(session_id = %session.id, error = %e, "driver close failed");
        }
        if let Some(mut process) = session.process.take() {
            if let Err(e) = process.kill().await {
                tracing::debug!(session_id = %session.id, error = %e, "process kill failed");
            }
        }
        if let Some(dir) = session.profile_dir.take() {
            let _ = tokio::fs::remove_dir_all(&dir).await;
        }
        if let Some(port) = session.port {
            self.release_port(port);
        }
        tracing::debug!(session_id = %session.id, "session released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::config::Config;

    fn manager_with_ports(min: u16, max: u16) -> SessionManager {
        let mut config = Config::default();
        config.browser.debug_port_min = min;
        config.browser.debug_port_max = max;
        SessionManager::new(config)
    }

    #[test]
    fn test_reserved_ports_are_unique() {
        let manager = manager_with_ports(29222, 29226);
        let mut seen = HashSet::new();
        for _ in 0..5 {
            let port = manager.reserve_port().unwrap();
            assert!((29222..=29226).contains(&port));
            assert!(seen.insert(port), "port {port} handed out twice");
        }
    }

    #[test]
    fn test_exhausted_range_is_an_error() {
        let manager = manager_with_ports(29222, 29223);
        manager.reserve_port().unwrap();
        manager.reserve_port().unwrap();
        assert!(manager.reserve_port().is_err());
    }

    #[test]
    fn test_externally_bound_port_is_skipped() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let bound = listener.local_addr().unwrap().port();

        // The only port in range is held by another socket.
        let manager = manager_with_ports(bound, bound);
        assert!(manager.reserve_port().is_err());

        drop(listener);
        assert_eq!(manager.reserve_port().unwrap(), bound);
    }

    #[test]
    fn test_released_port_is_reusable() {
        let manager = manager_with_ports(29300, 29300);
        let port = manager.reserve_port().unwrap();
        assert_eq!(port, 29300);
        assert!(manager.reserve_port().is_err());

        manager.release_port(port);
        assert_eq!(manager.reserve_port().unwrap(), 29300);
    }

    #[tokio::test]
    async fn test_acquire_simulated_when_no_executable() {
        let mut config = Config::default();
        config.simulation.enabled = true;
        config.simulation.browser_start_delay = 0;
        config.browser.executable_path = String::new();

        let manager = SessionManager::new(config);
        let session = manager.acquire(true).await.unwrap();
        assert!(session.is_simulated());
        assert_eq!(session.port(), None);
        assert_eq!(manager.sessions_acquired(), 1);
        manager.release(session).await;
    }

    #[tokio::test]
    async fn test_acquire_fails_without_executable_or_simulation() {
        let mut config = Config::default();
        config.simulation.enabled = false;
        config.browser.executable_path = String::new();

        let manager = SessionManager::new(config);
        assert!(manager.acquire(true).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_executable_falls_back_to_simulation() {
        let mut config = Config::default();
        config.simulation.enabled = true;
        config.simulation.browser_start_delay = 0;
        config.browser.executable_path = "/nonexistent/chrome".to_string();

        let manager = SessionManager::new(config);
        let session = manager.acquire(true).await.unwrap();
        assert!(session.is_simulated());
        manager.release(session).await;
    }
}
