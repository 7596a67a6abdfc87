// ABOUTME: Runs one task end to end: session, actions, progress, teardown
// ABOUTME: Owns the failure, cancellation, and automatic retry paths

use serde_json::{json, Value};
use std::sync::Arc;
use tracing::instrument;

use crate::browser::{BrowserSession, SessionManager};
use crate::cli::config::Config;
use crate::engine::dispatcher::ActionDispatcher;
use crate::engine::error::{classify, EngineError};
use crate::events::{EventBroadcaster, LogEntry};
use crate::registry::controller::RetryCancelController;
use crate::registry::{Task, TaskRegistry, TaskStatus};

/// Progress reserved for the action phase; the remainder covers teardown.
const ACTION_PROGRESS_SPAN: u64 = 90;
const PROGRESS_CLOSING: u8 = 95;
const PROGRESS_DONE: u8 = 100;

/// Executes claimed tasks. One executor is shared by all workers; per-task
/// state lives on the stack of `execute`.
pub struct TaskExecutor {
    registry: Arc<TaskRegistry>,
    broadcaster: Arc<EventBroadcaster>,
    sessions: Arc<SessionManager>,
    controller: Arc<RetryCancelController>,
    dispatcher: ActionDispatcher,
    config: Config,
}

impl TaskExecutor {
    pub fn new(
        registry: Arc<TaskRegistry>,
        broadcaster: Arc<EventBroadcaster>,
        sessions: Arc<SessionManager>,
        controller: Arc<RetryCancelController>,
        config: Config,
    ) -> Self {
        let dispatcher = ActionDispatcher::new(config.page_timeout(), config.action_timeout());
        Self {
            registry,
            broadcaster,
            sessions,
            controller,
            dispatcher,
            config,
        }
    }

    /// Drive one queued task to a terminal state. Never returns an error;
    /// every failure path is recorded on the task itself.
    #[instrument(skip(self, task), fields(task_id = %task.id))]
    pub async fn execute(&self, task: Task) {
        // Cancelled between claim and start: no session is ever opened.
        match self.registry.get(&task.id) {
            Ok(current) if current.status == TaskStatus::Queued => {}
            _ => {
                tracing::info!(task_id = %task.id, "task no longer queued, skipping");
                return;
            }
        }

        let session = match self.sessions.acquire(task.headless).await {
            Ok(session) => session,
            Err(e) => {
                self.fail(&task, &e, None).await;
                return;
            }
        };

        self.execute_with_session(task, session).await;
    }

    /// Run a task against an already acquired session. The session is
    /// always released before returning, whatever the outcome.
    pub async fn execute_with_session(&self, task: Task, mut session: BrowserSession) {
        let task_id = task.id.clone();

        let running = match self.registry.transition(&task_id, TaskStatus::Running) {
            Ok(running) => running,
            Err(e) => {
                // Cancelled while the browser was starting.
                tracing::info!(task_id, error = %e, "task no longer runnable");
                self.sessions.release(session).await;
                return;
            }
        };
        self.broadcaster.send_status(
            &task_id,
            TaskStatus::Running.as_str(),
            running.progress,
            running.current_action_index,
            "task started",
        );

        if session.is_simulated() {
            self.broadcaster.send_log(
                &task_id,
                LogEntry::warning("no browser available, running in simulation mode", None),
            );
        }

        if !task.url.is_empty() {
            let page_timeout = self.config.page_timeout();
            self.broadcaster.send_log(
                &task_id,
                LogEntry::info(format!("navigating to {}", task.url), None),
            );
            if let Err(e) = session.driver.goto(&task.url, page_timeout).await {
                self.broadcaster
                    .send_log(&task_id, LogEntry::error(format!("navigation: {e}"), None));
                self.sessions.release(session).await;
                self.fail(&task, &e, None).await;
                return;
            }
        }

        let total = task.actions.len();
        let mut collected: Vec<Value> = Vec::new();
        let mut cancelled = false;

        for (index, action) in task.actions.iter().enumerate() {
            if self.registry.is_cancelling(&task_id) {
                cancelled = true;
                break;
            }

            let name = action.display_name();
            let progress = ((index as u64 * ACTION_PROGRESS_SPAN) / total.max(1) as u64) as u8;
            self.report_progress(&task_id, index, total, progress, name);

            match self
                .dispatcher
                .dispatch(session.driver.as_mut(), action)
                .await
            {
                Ok(outcome) => {
                    if let Err(e) = self.registry.advance_action(&task_id) {
                        tracing::warn!(task_id, error = %e, "action counter not advanced");
                    }
                    self.broadcaster.send_log(
                        &task_id,
                        LogEntry::success(
                            format!("{name} ({}/{total})", index + 1),
                            Some(name.to_string()),
                        ),
                    );

                    if let Some(data) = outcome.data {
                        collected.push(json!({ "action_index": index, "data": data }));
                    }
                    if let Some(image) = outcome.screenshot {
                        self.broadcaster.send_screenshot(&task_id, &image, index);
                    } else {
                        self.maybe_realtime_screenshot(&mut session, &task_id, index)
                            .await;
                    }
                }
                Err(e) => {
                    self.broadcaster.send_log(
                        &task_id,
                        LogEntry::error(format!("{name}: {e}"), Some(name.to_string())),
                    );
                    self.sessions.release(session).await;
                    self.fail(&task, &e, Some(index)).await;
                    return;
                }
            }

            let done = (((index + 1) as u64 * ACTION_PROGRESS_SPAN) / total.max(1) as u64) as u8;
            self.report_progress(&task_id, index, total, done, name);
        }

        if cancelled || self.registry.is_cancelling(&task_id) {
            self.sessions.release(session).await;
            self.finish_cancelled(&task_id).await;
            return;
        }

        self.report_progress(&task_id, total, total, PROGRESS_CLOSING, "closing browser");
        self.sessions.release(session).await;

        let result = json!({ "data": collected });
        if let Err(e) = self.registry.set_result(&task_id, result.clone()) {
            tracing::warn!(task_id, error = %e, "result could not be stored");
        }

        match self.registry.transition(&task_id, TaskStatus::Completed) {
            Ok(done) => {
                self.report_progress(&task_id, total, total, PROGRESS_DONE, "task complete");
                self.broadcaster.send_status(
                    &task_id,
                    TaskStatus::Completed.as_str(),
                    PROGRESS_DONE,
                    done.current_action_index,
                    "task complete",
                );
                self.broadcaster.send_result(&task_id, result);
                tracing::info!(task_id, actions = total, "task completed");
            }
            Err(_) => {
                // Cancellation raced the finish line; honor it.
                self.finish_cancelled(&task_id).await;
            }
        }
    }

    fn report_progress(
        &self,
        task_id: &str,
        action_index: usize,
        total_actions: usize,
        progress: u8,
        action_name: &str,
    ) {
        if let Ok(task) = self.registry.update_progress(task_id, progress, action_name) {
            self.broadcaster.send_progress(
                task_id,
                action_index,
                total_actions,
                task.progress,
                action_name,
            );
        }
    }

    /// Push a live viewport frame between actions, subject to the
    /// configured cadence.
    async fn maybe_realtime_screenshot(
        &self,
        session: &mut BrowserSession,
        task_id: &str,
        index: usize,
    ) {
        let perf = &self.config.performance;
        if perf.disable_realtime_screenshot {
            return;
        }
        if perf.screenshot_interval == 0 || (index + 1) % perf.screenshot_interval != 0 {
            return;
        }
        match session.driver.screenshot(false, None).await {
            Ok(image) => self.broadcaster.send_screenshot(task_id, &image, index),
            Err(e) => tracing::debug!(task_id, error = %e, "realtime screenshot skipped"),
        }
    }

    async fn finish_cancelled(&self, task_id: &str) {
        match self.registry.transition(task_id, TaskStatus::Cancelled) {
            Ok(done) => {
                let detail = classify(&EngineError::TaskCancelled, Some(task_id), None);
                if let Err(e) = self.registry.set_error(task_id, detail) {
                    tracing::warn!(task_id, error = %e, "cancel detail not stored");
                }
                self.broadcaster.send_status(
                    task_id,
                    TaskStatus::Cancelled.as_str(),
                    done.progress,
                    done.current_action_index,
                    "task cancelled",
                );
                tracing::info!(task_id, "task cancelled at action boundary");
            }
            Err(e) => tracing::warn!(task_id, error = %e, "cancel finish rejected"),
        }
    }

    async fn fail(&self, task: &Task, error: &EngineError, action_index: Option<usize>) {
        let task_id = task.id.as_str();
        let detail = classify(error, Some(task_id), action_index);

        if let Err(e) = self.registry.set_error(task_id, detail.clone()) {
            tracing::warn!(task_id, error = %e, "error detail not stored");
        }

        match self.registry.transition(task_id, TaskStatus::Failed) {
            Ok(failed) => {
                self.broadcaster.send_status(
                    task_id,
                    TaskStatus::Failed.as_str(),
                    failed.progress,
                    failed.current_action_index,
                    &detail.message,
                );
                let detail_json = serde_json::to_value(&detail).unwrap_or(Value::Null);
                self.broadcaster.send_error(task_id, detail_json);
                tracing::warn!(
                    task_id,
                    code = detail.code.as_str(),
                    ?action_index,
                    "task failed"
                );
                self.schedule_auto_retry(failed, detail);
            }
            Err(_) => {
                // Failure raced a cancel request; the task ends cancelled.
                self.finish_cancelled(task_id).await;
            }
        }
    }

    /// Queue the automatic retry after the configured delay, without
    /// holding a worker slot while waiting.
    fn schedule_auto_retry(&self, failed: Task, detail: crate::engine::error::ErrorDetail) {
        if failed.retry_count >= failed.max_retries {
            return;
        }
        let controller = self.controller.clone();
        let delay = self.config.retry_delay();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            controller.auto_retry(&failed, &detail);
        });
    }
}
