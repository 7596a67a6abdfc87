// ABOUTME: In-memory task registry and the task lifecycle state machine
// ABOUTME: Guards every status change through an explicit transition graph

pub mod controller;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::actions::Action;
use crate::engine::error::{EngineError, ErrorDetail, Result};

/// Task lifecycle states.
///
/// Once a task reaches a terminal state its record is immutable; retry
/// never resurrects a task, it mints a new one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Queued,
    Running,
    Cancelling,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn is_executing(&self) -> bool {
        matches!(
            self,
            TaskStatus::Queued | TaskStatus::Running | TaskStatus::Cancelling
        )
    }

    pub fn can_transition_to(&self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, to),
            (Pending, Queued)
                | (Pending, Cancelled)
                | (Queued, Running)
                // Session acquisition can fail before running is entered.
                | (Queued, Failed)
                | (Queued, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelling)
                | (Cancelling, Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Cancelling => "cancelling",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

/// Creation parameters for a task, as accepted from the outside.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    /// Entry navigation target; empty means the actions handle navigation.
    pub url: String,
    pub actions: Vec<Action>,
    /// Higher is scheduled sooner.
    pub priority: i32,
    pub max_retries: u32,
    pub headless: bool,
    /// Free-form caller data, opaque to the engine.
    pub metadata: Value,
}

/// One submitted automation task and everything known about it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub url: String,
    pub actions: Vec<Action>,
    pub priority: i32,
    pub headless: bool,
    pub metadata: Value,
    pub status: TaskStatus,
    /// 0..=100; moves forward only.
    pub progress: u8,
    pub progress_message: String,
    /// Count of successfully dispatched actions; never exceeds the list.
    pub current_action_index: usize,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Id of the task this one retries, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_of: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

impl Task {
    fn new(spec: TaskSpec, retry_count: u32, retry_of: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            url: spec.url,
            actions: spec.actions,
            priority: spec.priority,
            headless: spec.headless,
            metadata: spec.metadata,
            status: TaskStatus::Pending,
            progress: 0,
            progress_message: String::new(),
            current_action_index: 0,
            retry_count,
            max_retries: spec.max_retries,
            retry_of,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    fn spec(&self) -> TaskSpec {
        TaskSpec {
            url: self.url.clone(),
            actions: self.actions.clone(),
            priority: self.priority,
            max_retries: self.max_retries,
            headless: self.headless,
            metadata: self.metadata.clone(),
        }
    }
}

/// Aggregate counters for the statistics endpoint.
#[derive(Debug, Clone, Serialize, Default)]
pub struct RegistryStats {
    pub total: usize,
    pub pending: usize,
    pub queued: usize,
    pub running: usize,
    pub cancelling: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// All known tasks, keyed by id. Pure bookkeeping; execution lives in
/// the engine, which drives this registry through transitions.
pub struct TaskRegistry {
    tasks: Mutex<HashMap<String, Task>>,
    /// Woken whenever a new pending task appears.
    pending_notify: Notify,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            pending_notify: Notify::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Task>> {
        match self.tasks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn create(&self, spec: TaskSpec) -> Task {
        self.insert(Task::new(spec, 0, None))
    }

    /// Mint the successor of a finished task. `retry_count` is the new
    /// task's attempt number: attempts so far for automatic retries,
    /// zero for a manual retry.
    pub fn create_retry(&self, source: &Task, retry_count: u32) -> Task {
        self.insert(Task::new(source.spec(), retry_count, Some(source.id.clone())))
    }

    fn insert(&self, task: Task) -> Task {
        let snapshot = task.clone();
        self.lock().insert(task.id.clone(), task);
        self.pending_notify.notify_one();
        snapshot
    }

    pub fn get(&self, id: &str) -> Result<Task> {
        self.lock()
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::TaskNotFound {
                task_id: id.to_string(),
            })
    }

    /// All tasks, newest first. `offset`/`limit` page through the list.
    pub fn list(&self, status: Option<TaskStatus>, offset: usize, limit: usize) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .lock()
            .values()
            .filter(|t| status.map_or(true, |s| t.status == s))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks.into_iter().skip(offset).take(limit).collect()
    }

    /// Tasks currently claimed by the engine.
    pub fn executing(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .lock()
            .values()
            .filter(|t| t.status.is_executing())
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        tasks
    }

    /// Remove a task record. Tasks the engine still holds stay put.
    pub fn delete(&self, id: &str) -> Result<()> {
        let mut tasks = self.lock();
        let task = tasks.get(id).ok_or_else(|| EngineError::TaskNotFound {
            task_id: id.to_string(),
        })?;
        if task.status.is_executing() {
            return Err(EngineError::InvalidTransition {
                from: task.status.as_str().to_string(),
                to: "deleted".to_string(),
            });
        }
        tasks.remove(id);
        Ok(())
    }

    /// Claim the best pending task: highest priority first, then oldest.
    /// The claimed task moves to `Queued` atomically with the selection.
    pub fn claim_next_pending(&self) -> Option<Task> {
        let mut tasks = self.lock();
        let id = tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .max_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| b.created_at.cmp(&a.created_at))
            })
            .map(|t| t.id.clone())?;

        let task = tasks.get_mut(&id)?;
        task.status = TaskStatus::Queued;
        Some(task.clone())
    }

    /// Park until a new pending task may exist.
    pub async fn wait_for_pending(&self) {
        self.pending_notify.notified().await;
    }

    /// Move a task along the lifecycle graph, stamping the relevant
    /// timestamps. Rejects anything the graph does not allow.
    pub fn transition(&self, id: &str, to: TaskStatus) -> Result<Task> {
        let mut tasks = self.lock();
        let task = tasks.get_mut(id).ok_or_else(|| EngineError::TaskNotFound {
            task_id: id.to_string(),
        })?;

        if !task.status.can_transition_to(to) {
            return Err(EngineError::InvalidTransition {
                from: task.status.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }

        task.status = to;
        match to {
            TaskStatus::Running => task.started_at = Some(Utc::now()),
            s if s.is_terminal() => task.completed_at = Some(Utc::now()),
            _ => {}
        }
        Ok(task.clone())
    }

    /// Record progress; regressions are dropped so observers never see
    /// the bar move backwards.
    pub fn update_progress(&self, id: &str, progress: u8, message: &str) -> Result<Task> {
        let mut tasks = self.lock();
        let task = tasks.get_mut(id).ok_or_else(|| EngineError::TaskNotFound {
            task_id: id.to_string(),
        })?;

        if progress > task.progress {
            task.progress = progress.min(100);
            task.progress_message = message.to_string();
        }
        Ok(task.clone())
    }

    /// Count one successfully dispatched action.
    pub fn advance_action(&self, id: &str) -> Result<Task> {
        let mut tasks = self.lock();
        let task = tasks.get_mut(id).ok_or_else(|| EngineError::TaskNotFound {
            task_id: id.to_string(),
        })?;
        if task.current_action_index < task.actions.len() {
            task.current_action_index += 1;
        }
        Ok(task.clone())
    }

    pub fn set_result(&self, id: &str, result: Value) -> Result<()> {
        let mut tasks = self.lock();
        let task = tasks.get_mut(id).ok_or_else(|| EngineError::TaskNotFound {
            task_id: id.to_string(),
        })?;
        task.result = Some(result);
        Ok(())
    }

    pub fn set_error(&self, id: &str, error: ErrorDetail) -> Result<()> {
        let mut tasks = self.lock();
        let task = tasks.get_mut(id).ok_or_else(|| EngineError::TaskNotFound {
            task_id: id.to_string(),
        })?;
        task.error = Some(error);
        Ok(())
    }

    /// Whether the engine should stop at the next action boundary.
    pub fn is_cancelling(&self, id: &str) -> bool {
        self.lock()
            .get(id)
            .map(|t| t.status == TaskStatus::Cancelling)
            .unwrap_or(false)
    }

    pub fn stats(&self) -> RegistryStats {
        let tasks = self.lock();
        let mut stats = RegistryStats {
            total: tasks.len(),
            ..Default::default()
        };
        for task in tasks.values() {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Queued => stats.queued += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Cancelling => stats.cancelling += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec() -> TaskSpec {
        TaskSpec {
            url: "https://example.com".to_string(),
            actions: vec![
                Action::Goto {
                    url: "https://example.com".to_string(),
                    timeout: None,
                },
                Action::Wait { timeout: 10 },
            ],
            priority: 0,
            max_retries: 3,
            headless: true,
            metadata: Value::Null,
        }
    }

    fn spec_with_priority(priority: i32) -> TaskSpec {
        TaskSpec {
            priority,
            ..spec()
        }
    }

    fn registry_with_task() -> (TaskRegistry, Task) {
        let registry = TaskRegistry::new();
        let task = registry.create(spec());
        (registry, task)
    }

    #[test]
    fn test_happy_path_transitions() {
        let (registry, task) = registry_with_task();

        registry.transition(&task.id, TaskStatus::Queued).unwrap();
        let running = registry.transition(&task.id, TaskStatus::Running).unwrap();
        assert!(running.started_at.is_some());

        let done = registry
            .transition(&task.id, TaskStatus::Completed)
            .unwrap();
        assert!(done.completed_at.is_some());
        assert!(done.status.is_terminal());
    }

    #[test]
    fn test_terminal_states_are_frozen() {
        let (registry, task) = registry_with_task();
        registry.transition(&task.id, TaskStatus::Queued).unwrap();
        registry.transition(&task.id, TaskStatus::Running).unwrap();
        registry.transition(&task.id, TaskStatus::Failed).unwrap();

        for to in [
            TaskStatus::Pending,
            TaskStatus::Queued,
            TaskStatus::Running,
            TaskStatus::Cancelling,
            TaskStatus::Completed,
            TaskStatus::Cancelled,
        ] {
            assert!(registry.transition(&task.id, to).is_err());
        }
    }

    #[test]
    fn test_running_cancels_through_cancelling() {
        let (registry, task) = registry_with_task();
        registry.transition(&task.id, TaskStatus::Queued).unwrap();
        registry.transition(&task.id, TaskStatus::Running).unwrap();

        // No direct running -> cancelled shortcut.
        assert!(registry
            .transition(&task.id, TaskStatus::Cancelled)
            .is_err());

        registry
            .transition(&task.id, TaskStatus::Cancelling)
            .unwrap();
        assert!(registry.is_cancelling(&task.id));
        registry
            .transition(&task.id, TaskStatus::Cancelled)
            .unwrap();
    }

    #[test]
    fn test_queued_may_fail_on_session_error() {
        let (registry, task) = registry_with_task();
        registry.transition(&task.id, TaskStatus::Queued).unwrap();
        let failed = registry.transition(&task.id, TaskStatus::Failed).unwrap();
        assert!(failed.started_at.is_none());
        assert!(failed.completed_at.is_some());
    }

    #[test]
    fn test_progress_is_monotonic() {
        let (registry, task) = registry_with_task();

        registry.update_progress(&task.id, 40, "step 2").unwrap();
        let after = registry.update_progress(&task.id, 20, "stale").unwrap();
        assert_eq!(after.progress, 40);
        assert_eq!(after.progress_message, "step 2");

        let done = registry.update_progress(&task.id, 100, "done").unwrap();
        assert_eq!(done.progress, 100);
    }

    #[test]
    fn test_action_index_caps_at_action_count() {
        let (registry, task) = registry_with_task();
        let total = task.actions.len();

        for _ in 0..total + 3 {
            registry.advance_action(&task.id).unwrap();
        }
        assert_eq!(
            registry.get(&task.id).unwrap().current_action_index,
            total
        );
    }

    #[test]
    fn test_claim_prefers_priority_then_age() {
        let registry = TaskRegistry::new();
        let _low = registry.create(spec_with_priority(-5));
        let high_old = registry.create(spec_with_priority(10));
        let _high_new = registry.create(spec_with_priority(10));

        let claimed = registry.claim_next_pending().unwrap();
        assert_eq!(claimed.id, high_old.id);
        assert_eq!(claimed.status, TaskStatus::Queued);

        // The claimed task is no longer pending.
        let second = registry.claim_next_pending().unwrap();
        assert_ne!(second.id, claimed.id);
    }

    #[test]
    fn test_retry_mints_new_task_with_lineage() {
        let (registry, task) = registry_with_task();

        let auto = registry.create_retry(&task, task.retry_count + 1);
        assert_ne!(auto.id, task.id);
        assert_eq!(auto.retry_count, 1);
        assert_eq!(auto.retry_of.as_deref(), Some(task.id.as_str()));
        assert_eq!(auto.status, TaskStatus::Pending);
        assert_eq!(auto.url, task.url);
        assert_eq!(auto.actions.len(), task.actions.len());

        let manual = registry.create_retry(&task, 0);
        assert_eq!(manual.retry_count, 0);
    }

    #[test]
    fn test_delete_refuses_executing_tasks() {
        let (registry, task) = registry_with_task();
        registry.transition(&task.id, TaskStatus::Queued).unwrap();
        registry.transition(&task.id, TaskStatus::Running).unwrap();
        assert!(registry.delete(&task.id).is_err());

        registry.transition(&task.id, TaskStatus::Failed).unwrap();
        registry.delete(&task.id).unwrap();
        assert!(registry.get(&task.id).is_err());
    }

    #[test]
    fn test_list_paginates_newest_first() {
        let registry = TaskRegistry::new();
        for _ in 0..5 {
            registry.create(spec());
        }

        let page = registry.list(None, 0, 3);
        assert_eq!(page.len(), 3);
        assert!(page.windows(2).all(|w| w[0].created_at >= w[1].created_at));

        let rest = registry.list(None, 3, 100);
        assert_eq!(rest.len(), 2);

        let none = registry.list(Some(TaskStatus::Completed), 0, 100);
        assert!(none.is_empty());
    }

    #[test]
    fn test_stats_counts_by_status() {
        let (registry, task) = registry_with_task();
        let _second = registry.create(spec());
        registry.transition(&task.id, TaskStatus::Queued).unwrap();

        let stats = registry.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.queued, 1);
    }

    #[test]
    fn test_set_result_preserved_in_get() {
        let (registry, task) = registry_with_task();
        registry
            .set_result(&task.id, json!({ "extracted": [] }))
            .unwrap();
        let fetched = registry.get(&task.id).unwrap();
        assert_eq!(fetched.result.unwrap()["extracted"], json!([]));
    }
}
