// ABOUTME: Realtime event layer: wire envelope, batching, heartbeats, fan-out
// ABOUTME: Everything a client sees live flows through the broadcaster

pub mod batch;
pub mod broadcaster;
pub mod heartbeat;
pub mod message;

pub use broadcaster::{EventBroadcaster, SUBSCRIBE_ALL};
pub use message::{ClientMessage, LogEntry, LogLevel, MessageType, WsMessage};
