//! Timeout middleware for execution attempts.
//!
//! Fails an attempt that exceeds the request's `timeout` with
//! `ExecutionFault::TimedOut`. Requests without a timeout pass through.

use std::task::{Context, Poll};

use relay_core::Intent;
use tower::{Layer, Service};

use crate::bus::execution::{ExecutionFault, ExecutionFuture, ExecutionRequest};

// ---------------------------------------------------------------------------
// TimeoutLayer
// ---------------------------------------------------------------------------

/// Tower layer enforcing the per-request execution bound.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeoutLayer;

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService { inner }
    }
}

// ---------------------------------------------------------------------------
// TimeoutService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TimeoutService<S> {
    inner: S,
}

impl<S, I> Service<ExecutionRequest<I>> for TimeoutService<S>
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
        let timeout = req.timeout;
        let attempts = req.attempt;
        let fut = self.inner.call(req);
        Box::pin(async move {
            let Some(timeout) = timeout else {
                return fut.await;
            };
            match tokio::time::timeout(timeout, fut).await {
                Ok(result) => result,
                Err(_elapsed) => Err(ExecutionFault::TimedOut { timeout, attempts }),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
