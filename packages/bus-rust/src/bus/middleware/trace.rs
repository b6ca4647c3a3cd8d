//! Tracing middleware for execution attempts.
//!
//! Wraps each attempt in an `execute` span recording the handler, attempt
//! number, duration and outcome. Counters live in the bus metrics collector;
//! this layer only produces spans and events.

use std::task::{Context, Poll};
use std::time::Instant;

use relay_core::Intent;
use tower::{Layer, Service};
use tracing::{debug_span, Instrument};

use crate::bus::execution::{ExecutionFault, ExecutionFuture, ExecutionRequest};

// ---------------------------------------------------------------------------
// TraceLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct TraceLayer;

impl<S> Layer<S> for TraceLayer {
    type Service = TraceService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TraceService { inner }
    }
}

// ---------------------------------------------------------------------------
// TraceService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TraceService<S> {
    inner: S,
}

impl<S, I> Service<ExecutionRequest<I>> for TraceService<S>
where
    I: Intent,
    S: Service<ExecutionRequest<I>, Response = I::Output, Error = ExecutionFault> + Send,
    S::Future: Send + 'static,
{
    type Response = I::Output;
    type Error = ExecutionFault;
    type Future = ExecutionFuture<I::Output>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: ExecutionRequest<I>) -> Self::Future {
        let handler = req.handler;
        let attempt = req.attempt;
        let span = debug_span!(
            "execute",
            intent = I::NAME,
            handler = handler,
            correlation_id = req.correlation.id(),
            attempt = attempt,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(req);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;

                let outcome = match &result {
                    Ok(_) => "ok",
                    Err(ExecutionFault::Failed { .. }) => "failed",
                    Err(ExecutionFault::TimedOut { .. }) => "timed_out",
                };
                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = start.elapsed().as_millis() as u64;
                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);

                tracing::debug!(
                    handler = handler,
                    attempt = attempt,
                    duration_ms = duration_ms,
                    outcome = outcome,
                    "execution attempt complete"
                );
                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use relay_core::{Correlation, ExecutionContext, IntentMeta};
    use tower::ServiceExt;

    use super::*;

    struct Echo {
        meta: IntentMeta,
        fail: bool,
    }

    impl Intent for Echo {
        type Output = bool;
        const NAME: &'static str = "Echo";
        fn meta(&self) -> &IntentMeta {
            &self.meta
        }
    }

    struct EchoService;

    impl Service<ExecutionRequest<Echo>> for EchoService {
        type Response = bool;
        type Error = ExecutionFault;
        type Future = ExecutionFuture<bool>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: ExecutionRequest<Echo>) -> Self::Future {
            let fail = req.intent.fail;
            let attempts = req.attempt;
            Box::pin(async move {
                if fail {
                    Err(ExecutionFault::Failed {
                        source: anyhow::anyhow!("echo refused"),
                        attempts,
                    })
                } else {
                    Ok(true)
                }
            })
        }
    }

    fn make_req(fail: bool) -> ExecutionRequest<Echo> {
        let intent = Arc::new(Echo {
            meta: IntentMeta::new(),
            fail,
        });
        let correlation = Correlation::for_intent(intent.as_ref());
        ExecutionRequest::new(
            intent,
            correlation,
            Arc::new(ExecutionContext::default()),
            "EchoService",
            None,
        )
    }

    #[tokio::test]
    async fn passes_success_through() {
        let out = TraceLayer.layer(EchoService).oneshot(make_req(false)).await;
        assert!(out.unwrap());
    }

    #[tokio::test]
    async fn passes_failure_through() {
        let fault = TraceLayer
            .layer(EchoService)
            .oneshot(make_req(true))
            .await
            .unwrap_err();
        assert!(fault.to_string().contains("echo refused"));
    }
}
