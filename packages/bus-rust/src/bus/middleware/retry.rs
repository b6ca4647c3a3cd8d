//! Retry middleware for execution attempts.
//!
//! Re-runs the inner stack on any `ExecutionFault` until the policy's attempt
//! budget is spent, sleeping an exponentially growing backoff between attempts.
//! Validation and authorization never reach this layer, so they are never
//! retried.

use std::task::{Context, Poll};
use std::time::Duration;

use rand::Rng;
use relay_core::Intent;
use tower::{Layer, Service, ServiceExt};
use tracing::warn;

use crate::bus::config::RetryPolicy;
use crate::bus::execution::{ExecutionFault, ExecutionFuture, ExecutionRequest};

// ---------------------------------------------------------------------------
// RetryLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RetryLayer {
    policy: RetryPolicy,
}

impl RetryLayer {
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }
}

impl<S> Layer<S> for RetryLayer {
    type Service = RetryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RetryService {
            inner,
            policy: self.policy.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// RetryService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RetryService<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S, I> Service<ExecutionRequest<I>> for RetryService<S>
where
    I: Intent,
    S: Service<ExecutionRequest<I>, Response = I::Output, Error = ExecutionFault>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    type Response = I::Output;
    type Error = ExecutionFault;
    type Future = ExecutionFuture<I::Output>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: ExecutionRequest<I>) -> Self::Future {
        // Keep the service that was driven to readiness for the first attempt.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let policy = self.policy.clone();

        Box::pin(async move {
            let max_attempts = policy.max_attempts.max(1);
            let mut attempt = req.attempt.max(1);
            loop {
                let mut this_attempt = req.clone();
                this_attempt.attempt = attempt;

                let fault = match inner.ready().await?.call(this_attempt).await {
                    Ok(output) => return Ok(output),
                    Err(fault) => fault,
                };
                if attempt >= max_attempts {
                    return Err(fault);
                }

                let delay = delay_before(&policy, attempt + 1);
                warn!(
                    intent = I::NAME,
                    handler = req.handler,
                    correlation_id = req.correlation.id(),
                    attempt,
                    max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %fault,
                    "execution attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        })
    }
}

/// Backoff before `attempt`, jittered into `[delay / 2, delay]` when enabled.
fn delay_before(policy: &RetryPolicy, attempt: u32) -> Duration {
    let delay = policy.backoff_for(attempt);
    if !policy.jitter || delay.is_zero() {
        return delay;
    }
    let full = u64::try_from(delay.as_nanos()).unwrap_or(u64::MAX);
    Duration::from_nanos(rand::rng().random_range(full / 2..=full))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use relay_core::{Correlation, ExecutionContext, IntentMeta};

    use super::*;

    struct Flaky {
        meta: IntentMeta,
    }

    impl Intent for Flaky {
        type Output = u32;
        const NAME: &'static str = "Flaky";
        fn meta(&self) -> &IntentMeta {
            &self.meta
        }
    }

    /// Fails until `succeed_on` attempts have been made; returns the attempt
    /// number it succeeded on.
    #[derive(Clone)]
    struct FlakyService {
        calls: Arc<AtomicU32>,
        succeed_on: u32,
    }

    impl Service<ExecutionRequest<Flaky>> for FlakyService {
        type Response = u32;
        type Error = ExecutionFault;
        type Future = ExecutionFuture<u32>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: ExecutionRequest<Flaky>) -> Self::Future {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let succeed_on = self.succeed_on;
            Box::pin(async move {
                if n >= succeed_on {
                    Ok(req.attempt)
                } else {
                    Err(ExecutionFault::Failed {
                        source: anyhow::anyhow!("transient failure {n}"),
                        attempts: req.attempt,
                    })
                }
            })
        }
    }

    fn make_req() -> ExecutionRequest<Flaky> {
        let intent = Arc::new(Flaky {
            meta: IntentMeta::new(),
        });
        let correlation = Correlation::for_intent(intent.as_ref());
        ExecutionRequest::new(
            intent,
            correlation,
            Arc::new(ExecutionContext::default()),
            "FlakyService",
            None,
        )
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(10),
            ..RetryPolicy::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let svc = RetryLayer::new(policy(3)).layer(FlakyService {
            calls: Arc::clone(&calls),
            succeed_on: 3,
        });
        let attempt = svc.oneshot(make_req()).await.unwrap();
        assert_eq!(attempt, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let svc = RetryLayer::new(policy(2)).layer(FlakyService {
            calls: Arc::clone(&calls),
            succeed_on: u32::MAX,
        });
        let fault = svc.oneshot(make_req()).await.unwrap_err();
        assert_eq!(fault.attempts(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn single_attempt_policy_does_not_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let svc = RetryLayer::new(RetryPolicy::none()).layer(FlakyService {
            calls: Arc::clone(&calls),
            succeed_on: 2,
        });
        assert!(svc.oneshot(make_req()).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn jitter_stays_within_half_to_full_delay() {
        let policy = RetryPolicy {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(100),
            jitter: true,
            ..RetryPolicy::default()
        };
        for _ in 0..200 {
            let delay = delay_before(&policy, 2);
            assert!(delay >= Duration::from_millis(50));
            assert!(delay <= Duration::from_millis(100));
        }
    }
}
