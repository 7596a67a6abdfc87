// ABOUTME: Execution engine: action dispatch, task execution, worker pool
// ABOUTME: Error taxonomy for everything that can go wrong lives here too

pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod worker;

pub use dispatcher::ActionDispatcher;
pub use error::{EngineError, Result};
pub use executor::TaskExecutor;
pub use worker::WorkerPool;
