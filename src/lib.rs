// ABOUTME: Browser-automation task execution engine
// ABOUTME: Tasks are declarative action lists run against real or simulated browsers

pub mod actions;
pub mod api;
pub mod browser;
pub mod cli;
pub mod engine;
pub mod events;
pub mod registry;

pub use engine::error::{EngineError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
