//! Handler contract: the single unit of business logic bound to one intent type.

use std::time::Duration;

use async_trait::async_trait;

use crate::context::ExecutionContext;
use crate::correlation::Correlation;
use crate::intent::Intent;

/// Result type produced by the handler for intent `I`.
pub type HandlerResult<I> = anyhow::Result<<I as Intent>::Output>;

/// Business logic for one intent type.
///
/// The bound intent type is declared through `Self::Intent`, so the registry
/// resolves the binding at compile time. Only `execute` is required; the
/// context-aware overload and the lifecycle hooks have pass-through defaults.
///
/// Hooks run in this order around every execution attempt:
/// `pre_process`, `execute_with_context`, `post_process`, then `on_success`
/// or `on_error`.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    type Intent: Intent;

    /// Executes the intent.
    async fn execute(
        &self,
        intent: &Self::Intent,
        correlation: &Correlation,
    ) -> HandlerResult<Self::Intent>;

    /// Context-aware execution. Defaults to [`Handler::execute`].
    async fn execute_with_context(
        &self,
        intent: &Self::Intent,
        correlation: &Correlation,
        _context: &ExecutionContext,
    ) -> HandlerResult<Self::Intent> {
        self.execute(intent, correlation).await
    }

    /// Stable handler name for diagnostics. Defaults to the Rust type name.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Upper bound for a single execution attempt. `None` falls back to the
    /// bus default.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Runs before execution. An error aborts the attempt as an execution failure.
    async fn pre_process(
        &self,
        _intent: &Self::Intent,
        _correlation: &Correlation,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs after a successful execution, before `on_success`.
    async fn post_process(
        &self,
        _intent: &Self::Intent,
        _output: &<Self::Intent as Intent>::Output,
        _correlation: &Correlation,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Observability callback after a successful attempt.
    fn on_success(&self, _intent: &Self::Intent, _correlation: &Correlation) {}

    /// Observability callback after a failed attempt.
    fn on_error(&self, _intent: &Self::Intent, _error: &anyhow::Error, _correlation: &Correlation) {}
}
