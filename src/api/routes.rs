// ABOUTME: REST endpoints for task submission, inspection, and control
// ABOUTME: Maps engine errors onto HTTP statuses with structured bodies

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::actions::Action;
use crate::api::{ws, AppState};
use crate::engine::error::{classify, EngineError};
use crate::registry::{Task, TaskSpec, TaskStatus};

const DEFAULT_PAGE_SIZE: usize = 100;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/tasks", post(create_task).get(list_tasks))
        .route("/api/tasks/executing", get(executing_tasks))
        .route("/api/tasks/{id}", get(get_task).delete(delete_task))
        .route("/api/tasks/{id}/cancel", post(cancel_task))
        .route("/api/tasks/{id}/retry", post(retry_task))
        .route("/api/actions", get(list_actions))
        .route("/api/statistics", get(statistics))
        .route("/ws", get(ws::websocket_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Engine error carried out of a handler.
#[derive(Debug)]
pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::TaskNotFound { .. } => StatusCode::NOT_FOUND,
            EngineError::InvalidTransition { .. } => StatusCode::CONFLICT,
            EngineError::Config { .. } | EngineError::UnsupportedAction { .. } => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let detail = classify(&self.0, None, None);
        (status, Json(detail)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    /// Entry page to open before the actions run; empty skips navigation.
    #[serde(default)]
    pub url: String,
    pub actions: Vec<Action>,
    /// Higher is scheduled sooner.
    #[serde(default)]
    pub priority: i32,
    /// Overrides the configured automatic retry budget.
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Overrides the configured headless default.
    #[serde(default)]
    pub headless: Option<bool>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<TaskStatus>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": crate::VERSION,
        "uptime_seconds": (chrono::Utc::now() - state.started_at).num_seconds(),
    }))
}

async fn create_task(
    State(state): State<AppState>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    if req.actions.is_empty() {
        return Err(EngineError::Config {
            reason: "a task needs at least one action".to_string(),
        }
        .into());
    }

    let task = state.registry.create(TaskSpec {
        url: req.url,
        actions: req.actions,
        priority: req.priority,
        max_retries: req.max_retries.unwrap_or(state.config.task.max_retries),
        headless: req.headless.unwrap_or(state.config.browser.headless),
        metadata: req.metadata,
    });

    tracing::info!(task_id = %task.id, priority = task.priority, "task created");
    Ok((StatusCode::CREATED, Json(task)))
}

async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<Vec<Task>> {
    let tasks = state.registry.list(
        query.status,
        query.offset.unwrap_or(0),
        query.limit.unwrap_or(DEFAULT_PAGE_SIZE),
    );
    Json(tasks)
}

async fn executing_tasks(State(state): State<AppState>) -> Json<Vec<Task>> {
    Json(state.registry.executing())
}

async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    Ok(Json(state.registry.get(&id)?))
}

/// Deleting an unfinished task cancels it first. Tasks the engine still
/// holds (running or cancelling) refuse deletion.
async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let task = state.registry.get(&id)?;
    if matches!(task.status, TaskStatus::Pending | TaskStatus::Queued) {
        state.controller.cancel(&id)?;
    }
    state.registry.delete(&id)?;
    tracing::info!(task_id = %id, "task deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    Ok(Json(state.controller.cancel(&id)?))
}

async fn retry_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    let retry = state.controller.retry(&id)?;
    Ok((StatusCode::CREATED, Json(retry)))
}

async fn list_actions() -> Json<serde_json::Value> {
    Json(json!({
        "actions": Action::available_kinds(),
        "extractors": Action::available_extractors(),
    }))
}

async fn statistics(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "tasks": state.registry.stats(),
        "websocket_connections": state.broadcaster.connection_count(),
        "browser_sessions_acquired": state.sessions.sessions_acquired(),
        "uptime_seconds": (chrono::Utc::now() - state.started_at).num_seconds(),
        "version": crate::VERSION,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::config::Config;

    fn state() -> AppState {
        let mut config = Config::default();
        config.simulation.browser_start_delay = 0;
        config.simulation.action_delay = 0;
        AppState::new(config)
    }

    fn goto_request() -> CreateTaskRequest {
        CreateTaskRequest {
            url: "https://example.com".to_string(),
            actions: vec![Action::Goto {
                url: "https://example.com".to_string(),
                timeout: None,
            }],
            priority: 0,
            max_retries: None,
            headless: None,
            metadata: serde_json::Value::Null,
        }
    }

    fn all_query() -> ListQuery {
        ListQuery {
            status: None,
            limit: None,
            offset: None,
        }
    }

    #[tokio::test]
    async fn test_create_then_fetch_task() {
        let state = state();
        let (status, Json(task)) = create_task(State(state.clone()), Json(goto_request()))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.max_retries, state.config.task.max_retries);
        assert_eq!(task.headless, state.config.browser.headless);

        let Json(fetched) = get_task(State(state), Path(task.id.clone())).await.unwrap();
        assert_eq!(fetched.id, task.id);
    }

    #[tokio::test]
    async fn test_empty_action_list_rejected() {
        let state = state();
        let req = CreateTaskRequest {
            url: String::new(),
            actions: vec![],
            priority: 0,
            max_retries: None,
            headless: None,
            metadata: serde_json::Value::Null,
        };
        assert!(create_task(State(state), Json(req)).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_task_is_not_found() {
        let state = state();
        let err = get_task(State(state), Path("missing".to_string()))
            .await
            .err()
            .unwrap();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cancel_pending_task_via_endpoint() {
        let state = state();
        let (_, Json(task)) = create_task(State(state.clone()), Json(goto_request()))
            .await
            .unwrap();

        let Json(cancelled) = cancel_task(State(state), Path(task.id)).await.unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_delete_cancels_pending_task_first() {
        let state = state();
        let (_, Json(task)) = create_task(State(state.clone()), Json(goto_request()))
            .await
            .unwrap();

        let status = delete_task(State(state.clone()), Path(task.id.clone()))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(state.registry.get(&task.id).is_err());
    }

    #[tokio::test]
    async fn test_delete_refuses_running_task() {
        let state = state();
        let (_, Json(task)) = create_task(State(state.clone()), Json(goto_request()))
            .await
            .unwrap();
        state
            .registry
            .transition(&task.id, TaskStatus::Queued)
            .unwrap();
        state
            .registry
            .transition(&task.id, TaskStatus::Running)
            .unwrap();

        let err = delete_task(State(state), Path(task.id)).await.err().unwrap();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_retry_of_pending_task_conflicts() {
        let state = state();
        let (_, Json(task)) = create_task(State(state.clone()), Json(goto_request()))
            .await
            .unwrap();

        let err = retry_task(State(state), Path(task.id)).await.err().unwrap();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_list_filter_by_status() {
        let state = state();
        let (_, Json(task)) = create_task(State(state.clone()), Json(goto_request()))
            .await
            .unwrap();
        let _ = cancel_task(State(state.clone()), Path(task.id)).await.unwrap();
        let _ = create_task(State(state.clone()), Json(goto_request()))
            .await
            .unwrap();

        let Json(pending) = list_tasks(
            State(state),
            Query(ListQuery {
                status: Some(TaskStatus::Pending),
                ..all_query()
            }),
        )
        .await;
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn test_list_pagination() {
        let state = state();
        for _ in 0..5 {
            let _ = create_task(State(state.clone()), Json(goto_request()))
                .await
                .unwrap();
        }

        let Json(page) = list_tasks(
            State(state.clone()),
            Query(ListQuery {
                limit: Some(2),
                ..all_query()
            }),
        )
        .await;
        assert_eq!(page.len(), 2);

        let Json(rest) = list_tasks(
            State(state),
            Query(ListQuery {
                offset: Some(4),
                ..all_query()
            }),
        )
        .await;
        assert_eq!(rest.len(), 1);
    }

    #[tokio::test]
    async fn test_actions_listing_is_complete() {
        let Json(value) = list_actions().await;
        assert_eq!(value["actions"].as_array().unwrap().len(), 17);
        assert_eq!(value["extractors"].as_array().unwrap().len(), 3);
    }
}
