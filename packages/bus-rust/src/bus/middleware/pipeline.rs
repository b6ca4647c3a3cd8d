//! Execution stack composition.

use std::sync::Arc;

use relay_core::{Handler, Intent};
use tower::ServiceBuilder;

use super::retry::{RetryLayer, RetryService};
use super::timeout::{TimeoutLayer, TimeoutService};
use super::trace::{TraceLayer, TraceService};
use crate::bus::config::RetryPolicy;
use crate::bus::execution::HandlerService;

/// The composed execution stack for intent `I`.
pub type ExecutionStack<I> = RetryService<TimeoutService<TraceService<HandlerService<I>>>>;

/// Wrap `handler` in the execution middleware.
///
/// Layer order (outermost to innermost):
/// 1. `RetryLayer` -- re-run failed or timed-out attempts per `policy`
/// 2. `TimeoutLayer` -- bound each attempt separately
/// 3. `TraceLayer` -- one span per attempt
///
/// Building the stack only clones an `Arc`, so the bus builds one per dispatch.
#[must_use]
pub fn build_execution_stack<I: Intent>(
    handler: Arc<dyn Handler<Intent = I>>,
    policy: &RetryPolicy,
) -> ExecutionStack<I> {
    ServiceBuilder::new()
        .layer(RetryLayer::new(policy.clone()))
        .layer(TimeoutLayer)
        .layer(TraceLayer)
        .service(HandlerService::new(handler))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
