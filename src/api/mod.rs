// ABOUTME: HTTP and websocket surface of the service
// ABOUTME: Shared state wires the registry, engine, and broadcaster together

pub mod routes;
pub mod server;
pub mod ws;

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::browser::SessionManager;
use crate::cli::config::Config;
use crate::events::EventBroadcaster;
use crate::registry::controller::RetryCancelController;
use crate::registry::TaskRegistry;

/// Everything the handlers need, cheap to clone per request.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<TaskRegistry>,
    pub broadcaster: Arc<EventBroadcaster>,
    pub sessions: Arc<SessionManager>,
    pub controller: Arc<RetryCancelController>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);
        let registry = Arc::new(TaskRegistry::new());
        let broadcaster = Arc::new(EventBroadcaster::new(
            config.websocket.clone(),
            config.performance.clone(),
        ));
        let sessions = Arc::new(SessionManager::new((*config).clone()));
        let controller = Arc::new(RetryCancelController::new(
            registry.clone(),
            broadcaster.clone(),
        ));

        Self {
            config,
            registry,
            broadcaster,
            sessions,
            controller,
            started_at: Utc::now(),
        }
    }
}
