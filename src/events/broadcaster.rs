// ABOUTME: Fan-out hub pushing task events to subscribed websocket peers
// ABOUTME: Owns per-task log batches and the server-side heartbeat sweep

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::cli::config::{PerformanceConfig, WebSocketConfig};
use crate::events::batch::LogBatch;
use crate::events::heartbeat;
use crate::events::message::{LogEntry, MessageType, WsMessage};

/// Subscription key meaning "every task".
pub const SUBSCRIBE_ALL: &str = "all";

struct Connection {
    tx: mpsc::UnboundedSender<WsMessage>,
    subscriptions: HashSet<String>,
    all_tasks: bool,
    last_pong: Instant,
}

impl Connection {
    fn wants(&self, task_id: &str) -> bool {
        self.all_tasks || self.subscriptions.contains(task_id)
    }
}

/// Shared event hub. Producers (executor, controller) push task events;
/// each websocket handler drains its own queue and forwards frames.
pub struct EventBroadcaster {
    ws_config: WebSocketConfig,
    perf: PerformanceConfig,
    connections: Mutex<HashMap<Uuid, Connection>>,
    batches: Mutex<HashMap<String, LogBatch>>,
}

impl EventBroadcaster {
    pub fn new(ws_config: WebSocketConfig, perf: PerformanceConfig) -> Self {
        Self {
            ws_config,
            perf,
            connections: Mutex::new(HashMap::new()),
            batches: Mutex::new(HashMap::new()),
        }
    }

    fn lock_connections(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Connection>> {
        match self.connections.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_batches(&self) -> std::sync::MutexGuard<'_, HashMap<String, LogBatch>> {
        match self.batches.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register a new peer; the returned receiver is its outbound queue.
    pub fn register(&self) -> (Uuid, mpsc::UnboundedReceiver<WsMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.lock_connections().insert(
            id,
            Connection {
                tx,
                subscriptions: HashSet::new(),
                all_tasks: false,
                last_pong: Instant::now(),
            },
        );
        tracing::debug!(connection_id = %id, "websocket peer registered");
        (id, rx)
    }

    pub fn unregister(&self, id: Uuid) {
        self.lock_connections().remove(&id);
        tracing::debug!(connection_id = %id, "websocket peer removed");
    }

    pub fn connection_count(&self) -> usize {
        self.lock_connections().len()
    }

    pub fn subscribe(&self, id: Uuid, task_id: &str) {
        let mut conns = self.lock_connections();
        if let Some(conn) = conns.get_mut(&id) {
            if task_id == SUBSCRIBE_ALL {
                conn.all_tasks = true;
            } else {
                conn.subscriptions.insert(task_id.to_string());
            }
            let ack = WsMessage::new(
                MessageType::Subscribed,
                Some(task_id.to_string()),
                serde_json::Value::Null,
            );
            let _ = conn.tx.send(ack);
        }
    }

    pub fn unsubscribe(&self, id: Uuid, task_id: &str) {
        let mut conns = self.lock_connections();
        if let Some(conn) = conns.get_mut(&id) {
            if task_id == SUBSCRIBE_ALL {
                conn.all_tasks = false;
            } else {
                conn.subscriptions.remove(task_id);
            }
            let ack = WsMessage::new(
                MessageType::Unsubscribed,
                Some(task_id.to_string()),
                serde_json::Value::Null,
            );
            let _ = conn.tx.send(ack);
        }
    }

    /// Send a frame to one specific peer.
    pub fn reply(&self, id: Uuid, message: WsMessage) {
        if let Some(conn) = self.lock_connections().get(&id) {
            let _ = conn.tx.send(message);
        }
    }

    pub fn record_pong(&self, id: Uuid) {
        if let Some(conn) = self.lock_connections().get_mut(&id) {
            conn.last_pong = Instant::now();
        }
    }

    /// Deliver a frame to every peer subscribed to its task. Peers whose
    /// queue is gone are dropped on the spot.
    fn broadcast(&self, task_id: &str, message: WsMessage) {
        let mut conns = self.lock_connections();
        conns.retain(|_, conn| {
            if !conn.wants(task_id) {
                return true;
            }
            conn.tx.send(message.clone()).is_ok()
        });
    }

    pub fn send_status(
        &self,
        task_id: &str,
        status: &str,
        progress: u8,
        current_action: usize,
        message: &str,
    ) {
        self.flush_logs(task_id);
        self.broadcast(
            task_id,
            WsMessage::status(task_id, status, progress, current_action, message),
        );
    }

    pub fn send_progress(
        &self,
        task_id: &str,
        action_index: usize,
        total_actions: usize,
        progress: u8,
        action_name: &str,
    ) {
        self.broadcast(
            task_id,
            WsMessage::progress(task_id, action_index, total_actions, progress, action_name),
        );
    }

    pub fn send_screenshot(&self, task_id: &str, base64_image: &str, action_index: usize) {
        self.broadcast(
            task_id,
            WsMessage::screenshot(task_id, base64_image, action_index),
        );
    }

    /// Terminal result frame. Flushes buffered logs first so clients see
    /// them before the outcome, then retires the task's batch.
    pub fn send_result(&self, task_id: &str, result: serde_json::Value) {
        self.flush_logs(task_id);
        self.lock_batches().remove(task_id);
        self.broadcast(task_id, WsMessage::result(task_id, result));
    }

    pub fn send_error(&self, task_id: &str, detail: serde_json::Value) {
        self.flush_logs(task_id);
        self.lock_batches().remove(task_id);
        self.broadcast(task_id, WsMessage::error(task_id, detail));
    }

    /// Queue or deliver one log entry, honoring the batching policy.
    pub fn send_log(&self, task_id: &str, entry: LogEntry) {
        let to_send = {
            let mut batches = self.lock_batches();
            let batch = batches.entry(task_id.to_string()).or_insert_with(|| {
                LogBatch::new(
                    self.perf.batch_log_size,
                    Duration::from_millis(self.perf.batch_log_interval),
                )
            });

            if entry.bypasses_batching() {
                let mut entries = batch.drain().unwrap_or_default();
                entries.push(entry);
                Some(entries)
            } else {
                batch.push(entry)
            }
        };

        if let Some(entries) = to_send {
            self.broadcast(task_id, WsMessage::logs(task_id, &entries));
        }
    }

    fn flush_logs(&self, task_id: &str) {
        let drained = self
            .lock_batches()
            .get_mut(task_id)
            .and_then(|batch| batch.drain());
        if let Some(entries) = drained {
            self.broadcast(task_id, WsMessage::logs(task_id, &entries));
        }
    }

    fn flush_stale_logs(&self) {
        let drained: Vec<(String, Vec<LogEntry>)> = {
            let mut batches = self.lock_batches();
            batches
                .iter_mut()
                .filter_map(|(task_id, batch)| {
                    batch.drain_if_stale().map(|e| (task_id.clone(), e))
                })
                .collect()
        };
        for (task_id, entries) in drained {
            self.broadcast(&task_id, WsMessage::logs(&task_id, &entries));
        }
    }

    /// Ping everyone and drop peers whose pong is overdue.
    fn heartbeat_sweep(&self) {
        let mut conns = self.lock_connections();
        conns.retain(|id, conn| {
            if heartbeat::pong_expired(conn.last_pong, &self.ws_config) {
                tracing::info!(connection_id = %id, "dropping unresponsive websocket peer");
                return false;
            }
            conn.tx.send(WsMessage::ping()).is_ok()
        });
    }

    /// Background maintenance: periodic log flushes and heartbeat sweeps.
    /// Runs for the life of the server.
    pub async fn run_maintenance(self: Arc<Self>) {
        let mut flush_tick =
            tokio::time::interval(Duration::from_millis(self.perf.batch_log_interval.max(10)));
        let mut ping_tick =
            tokio::time::interval(Duration::from_millis(self.ws_config.ping_interval.max(100)));
        // The first tick of an interval fires immediately; skip it.
        flush_tick.tick().await;
        ping_tick.tick().await;

        loop {
            tokio::select! {
                _ = flush_tick.tick() => self.flush_stale_logs(),
                _ = ping_tick.tick() => self.heartbeat_sweep(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broadcaster() -> EventBroadcaster {
        EventBroadcaster::new(
            WebSocketConfig::default(),
            PerformanceConfig {
                batch_log_size: 3,
                batch_log_interval: 60_000,
                disable_realtime_screenshot: false,
                screenshot_interval: 1,
            },
        )
    }

    #[tokio::test]
    async fn test_info_logs_batch_into_one_frame() {
        let hub = broadcaster();
        let (id, mut rx) = hub.register();
        hub.subscribe(id, "t1");
        let _ack = rx.recv().await.unwrap();

        hub.send_log("t1", LogEntry::info("a", None));
        hub.send_log("t1", LogEntry::info("b", None));
        assert!(rx.try_recv().is_err());

        hub.send_log("t1", LogEntry::info("c", None));
        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.kind, MessageType::TaskLog);
        assert_eq!(frame.payload["logs"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_error_log_flushes_buffer_immediately() {
        let hub = broadcaster();
        let (id, mut rx) = hub.register();
        hub.subscribe(id, "t1");
        let _ack = rx.recv().await.unwrap();

        hub.send_log("t1", LogEntry::info("step", None));
        hub.send_log("t1", LogEntry::error("boom", None));

        let frame = rx.try_recv().unwrap();
        let logs = frame.payload["logs"].as_array().unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[1]["level"], "error");
    }

    #[tokio::test]
    async fn test_only_subscribers_receive_task_frames() {
        let hub = broadcaster();
        let (sub, mut sub_rx) = hub.register();
        let (other, mut other_rx) = hub.register();
        hub.subscribe(sub, "t1");
        hub.subscribe(other, "t2");
        let _ = sub_rx.recv().await;
        let _ = other_rx.recv().await;

        hub.send_progress("t1", 2, 4, 50, "click element");
        assert_eq!(sub_rx.try_recv().unwrap().kind, MessageType::TaskProgress);
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_all_subscription_sees_every_task() {
        let hub = broadcaster();
        let (id, mut rx) = hub.register();
        hub.subscribe(id, SUBSCRIBE_ALL);
        let _ = rx.recv().await;

        hub.send_progress("t1", 0, 2, 10, "a");
        hub.send_progress("t2", 0, 2, 20, "b");
        assert_eq!(rx.try_recv().unwrap().task_id.as_deref(), Some("t1"));
        assert_eq!(rx.try_recv().unwrap().task_id.as_deref(), Some("t2"));
    }

    #[tokio::test]
    async fn test_result_flushes_logs_first() {
        let hub = broadcaster();
        let (id, mut rx) = hub.register();
        hub.subscribe(id, "t1");
        let _ = rx.recv().await;

        hub.send_log("t1", LogEntry::info("pending", None));
        hub.send_result("t1", serde_json::json!({ "ok": true }));

        assert_eq!(rx.try_recv().unwrap().kind, MessageType::TaskLog);
        assert_eq!(rx.try_recv().unwrap().kind, MessageType::TaskResult);
    }

    #[tokio::test]
    async fn test_sweep_drops_peers_with_overdue_pongs() {
        let hub = EventBroadcaster::new(
            WebSocketConfig {
                ping_interval: 0,
                pong_timeout: 50,
                max_reconnect_attempts: 5,
                reconnect_delay_base: 3_000,
            },
            PerformanceConfig::default(),
        );

        let (_stale, _stale_rx) = hub.register();
        let (live, mut live_rx) = hub.register();
        assert_eq!(hub.connection_count(), 2);

        // Let both peers' grace window lapse, then only one answers.
        tokio::time::sleep(Duration::from_millis(80)).await;
        hub.record_pong(live);
        hub.heartbeat_sweep();

        assert_eq!(hub.connection_count(), 1);
        // The surviving peer got the sweep's ping.
        assert_eq!(live_rx.try_recv().unwrap().kind, MessageType::Ping);
    }

    #[tokio::test]
    async fn test_dropped_peer_is_pruned_on_send() {
        let hub = broadcaster();
        let (id, rx) = hub.register();
        hub.subscribe(id, "t1");
        drop(rx);

        hub.send_progress("t1", 0, 2, 10, "a");
        assert_eq!(hub.connection_count(), 0);
    }
}
