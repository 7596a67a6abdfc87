// ABOUTME: Fixed-size worker pool draining the pending task queue
// ABOUTME: Pool size bounds how many browsers are alive at once

use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::engine::executor::TaskExecutor;
use crate::registry::TaskRegistry;

/// Spawns `count` workers that claim and execute pending tasks until the
/// process shuts down. Claiming is atomic in the registry, so workers
/// never race over a task.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(executor: Arc<TaskExecutor>, registry: Arc<TaskRegistry>, count: usize) -> Self {
        let handles = (0..count)
            .map(|worker_id| {
                let executor = executor.clone();
                let registry = registry.clone();
                tokio::spawn(async move {
                    tracing::debug!(worker_id, "worker started");
                    loop {
                        match registry.claim_next_pending() {
                            Some(task) => {
                                tracing::debug!(worker_id, task_id = %task.id, "task claimed");
                                executor.execute(task).await;
                            }
                            None => registry.wait_for_pending().await,
                        }
                    }
                })
            })
            .collect();

        Self { handles }
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    pub fn shutdown(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
