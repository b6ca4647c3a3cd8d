//! Tower middleware layers for the execution stage.
//!
//! - [`retry`]: Bounded re-execution with exponential backoff
//! - [`timeout`]: Per-attempt execution bound
//! - [`trace`]: Per-attempt tracing span
//! - [`pipeline`]: Composes the layers around a handler

pub mod pipeline;
pub mod retry;
pub mod timeout;
pub mod trace;

pub use pipeline::{build_execution_stack, ExecutionStack};
pub use retry::RetryLayer;
pub use timeout::TimeoutLayer;
pub use trace::TraceLayer;
