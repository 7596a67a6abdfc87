// ABOUTME: Retry and cancel decisions layered on top of the task registry
// ABOUTME: Cancellation is state-dependent; retries always mint a new task

use std::sync::Arc;

use crate::engine::error::{EngineError, ErrorDetail, Result};
use crate::events::EventBroadcaster;
use crate::registry::{Task, TaskRegistry, TaskStatus};

/// Applies the cancel and retry policies.
///
/// Pending and queued tasks cancel instantly. Running tasks are marked
/// cancelling and the executor honors the flag at the next action
/// boundary. Terminal tasks never change; retrying one creates a fresh
/// task that re-enters the queue from the start.
pub struct RetryCancelController {
    registry: Arc<TaskRegistry>,
    broadcaster: Arc<EventBroadcaster>,
}

impl RetryCancelController {
    pub fn new(registry: Arc<TaskRegistry>, broadcaster: Arc<EventBroadcaster>) -> Self {
        Self {
            registry,
            broadcaster,
        }
    }

    fn announce(&self, task: &Task, message: &str) {
        self.broadcaster.send_status(
            &task.id,
            task.status.as_str(),
            task.progress,
            task.current_action_index,
            message,
        );
    }

    /// Request cancellation. Returns the task in its post-request state.
    pub fn cancel(&self, task_id: &str) -> Result<Task> {
        let task = self.registry.get(task_id)?;

        let updated = match task.status {
            TaskStatus::Pending | TaskStatus::Queued => {
                let updated = self.registry.transition(task_id, TaskStatus::Cancelled)?;
                self.announce(&updated, "task cancelled");
                tracing::info!(task_id, from = task.status.as_str(), "task cancelled");
                updated
            }
            TaskStatus::Running => {
                let updated = self.registry.transition(task_id, TaskStatus::Cancelling)?;
                self.announce(&updated, "cancellation requested");
                tracing::info!(task_id, "cancellation requested, stopping at next action");
                updated
            }
            // A second cancel while already cancelling is a no-op.
            TaskStatus::Cancelling => task,
            status => {
                return Err(EngineError::InvalidTransition {
                    from: status.as_str().to_string(),
                    to: TaskStatus::Cancelled.as_str().to_string(),
                })
            }
        };

        Ok(updated)
    }

    /// Manually retry a finished task. The new task starts with a fresh
    /// retry budget; manual intervention resets the attempt counter.
    pub fn retry(&self, task_id: &str) -> Result<Task> {
        let source = self.registry.get(task_id)?;

        if !matches!(source.status, TaskStatus::Failed | TaskStatus::Cancelled) {
            return Err(EngineError::InvalidTransition {
                from: source.status.as_str().to_string(),
                to: "retried".to_string(),
            });
        }

        let retry = self.registry.create_retry(&source, 0);
        tracing::info!(
            source_id = task_id,
            retry_id = %retry.id,
            "manual retry created"
        );
        self.announce(&retry, &format!("manual retry of {task_id}"));
        Ok(retry)
    }

    /// Automatic retry after a failure, if budget remains. Returns the
    /// successor task when one was created.
    pub fn auto_retry(&self, failed: &Task, error: &ErrorDetail) -> Option<Task> {
        if failed.retry_count >= failed.max_retries {
            tracing::info!(
                task_id = %failed.id,
                attempts = failed.retry_count + 1,
                "retry budget exhausted"
            );
            return None;
        }

        let retry = self.registry.create_retry(failed, failed.retry_count + 1);
        tracing::info!(
            source_id = %failed.id,
            retry_id = %retry.id,
            attempt = retry.retry_count + 1,
            code = error.code.as_str(),
            "automatic retry scheduled"
        );
        self.announce(
            &retry,
            &format!("retry {} of {}", retry.retry_count, retry.max_retries),
        );
        Some(retry)
    }
}
