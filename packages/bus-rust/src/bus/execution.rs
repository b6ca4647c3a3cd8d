//! Handler invocation as a tower service.
//!
//! [`HandlerService`] is the innermost service of the execution stack. It runs
//! one attempt: `pre_process`, `execute_with_context`, `post_process`, then
//! `on_success` or `on_error`. Retries, timeouts and tracing wrap it as layers
//! (see [`super::middleware`]).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use relay_core::{Correlation, ExecutionContext, Handler, Intent};
use tower::Service;

// ---------------------------------------------------------------------------
// ExecutionRequest
// ---------------------------------------------------------------------------

/// Everything one execution attempt needs. Cloning is cheap: the intent and
/// context are shared.
pub struct ExecutionRequest<I: Intent> {
    pub intent: Arc<I>,
    pub correlation: Correlation,
    pub context: Arc<ExecutionContext>,
    pub handler: &'static str,
    /// Bound for a single attempt. `None` runs unbounded.
    pub timeout: Option<Duration>,
    /// 1-based attempt number.
    pub attempt: u32,
}

impl<I: Intent> ExecutionRequest<I> {
    #[must_use]
    pub fn new(
        intent: Arc<I>,
        correlation: Correlation,
        context: Arc<ExecutionContext>,
        handler: &'static str,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            intent,
            correlation,
            context,
            handler,
            timeout,
            attempt: 1,
        }
    }
}

impl<I: Intent> Clone for ExecutionRequest<I> {
    fn clone(&self) -> Self {
        Self {
            intent: Arc::clone(&self.intent),
            correlation: self.correlation.clone(),
            context: Arc::clone(&self.context),
            handler: self.handler,
            timeout: self.timeout,
            attempt: self.attempt,
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutionFault
// ---------------------------------------------------------------------------

/// Failure of the execution stack. Both variants are retryable.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionFault {
    #[error("attempt {attempts} failed: {source}")]
    Failed {
        #[source]
        source: anyhow::Error,
        attempts: u32,
    },
    #[error("attempt {attempts} exceeded {timeout:?}")]
    TimedOut { timeout: Duration, attempts: u32 },
}

impl ExecutionFault {
    /// Attempts made when the fault was raised.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Failed { attempts, .. } | Self::TimedOut { attempts, .. } => *attempts,
        }
    }
}

/// Boxed future returned by every service in the execution stack.
pub type ExecutionFuture<T> = Pin<Box<dyn Future<Output = Result<T, ExecutionFault>> + Send>>;

// ---------------------------------------------------------------------------
// HandlerService
// ---------------------------------------------------------------------------

/// Runs one attempt of a handler, including its lifecycle hooks.
pub struct HandlerService<I: Intent> {
    handler: Arc<dyn Handler<Intent = I>>,
}

impl<I: Intent> HandlerService<I> {
    #[must_use]
    pub fn new(handler: Arc<dyn Handler<Intent = I>>) -> Self {
        Self { handler }
    }
}

impl<I: Intent> Clone for HandlerService<I> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
        }
    }
}

impl<I: Intent> Service<ExecutionRequest<I>> for HandlerService<I> {
    type Response = I::Output;
    type Error = ExecutionFault;
    type Future = ExecutionFuture<I::Output>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ExecutionRequest<I>) -> Self::Future {
        let handler = Arc::clone(&self.handler);
        Box::pin(async move {
            run_attempt(handler.as_ref(), &req)
                .await
                .map_err(|source| ExecutionFault::Failed {
                    source,
                    attempts: req.attempt,
                })
        })
    }
}

async fn run_attempt<I: Intent>(
    handler: &dyn Handler<Intent = I>,
    req: &ExecutionRequest<I>,
) -> anyhow::Result<I::Output> {
    let intent = req.intent.as_ref();
    let correlation = &req.correlation;

    let result = async {
        handler.pre_process(intent, correlation).await?;
        let output = handler
            .execute_with_context(intent, correlation, &req.context)
            .await?;
        handler.post_process(intent, &output, correlation).await?;
        Ok::<_, anyhow::Error>(output)
    }
    .await;

    match &result {
        Ok(_) => handler.on_success(intent, correlation),
        Err(err) => handler.on_error(intent, err, correlation),
    }
    result
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use relay_core::{HandlerResult, IntentMeta};
    use tower::ServiceExt;

    use super::*;

    struct Charge {
        meta: IntentMeta,
        cents: i64,
    }

    impl Intent for Charge {
        type Output = i64;
        const NAME: &'static str = "Charge";
        fn meta(&self) -> &IntentMeta {
            &self.meta
        }
    }

    /// Records hook order; fails `execute` for negative amounts and
    /// `post_process` for zero.
    #[derive(Default)]
    struct HookedHandler {
        calls: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl Handler for HookedHandler {
        type Intent = Charge;

        async fn execute(&self, intent: &Charge, _: &Correlation) -> HandlerResult<Charge> {
            self.calls.lock().push("execute");
            anyhow::ensure!(intent.cents >= 0, "negative charge");
            Ok(intent.cents)
        }

        async fn execute_with_context(
            &self,
            intent: &Charge,
            correlation: &Correlation,
            context: &ExecutionContext,
        ) -> HandlerResult<Charge> {
            self.calls.lock().push("execute_with_context");
            let bonus = context.property_or::<i64>("bonus", 0);
            self.execute(intent, correlation).await.map(|c| c + bonus)
        }

        async fn pre_process(&self, _: &Charge, _: &Correlation) -> anyhow::Result<()> {
            self.calls.lock().push("pre_process");
            Ok(())
        }

        async fn post_process(&self, _: &Charge, output: &i64, _: &Correlation) -> anyhow::Result<()> {
            self.calls.lock().push("post_process");
            anyhow::ensure!(*output != 0, "zero charge rejected after execution");
            Ok(())
        }

        fn on_success(&self, _: &Charge, _: &Correlation) {
            self.calls.lock().push("on_success");
        }

        fn on_error(&self, _: &Charge, _: &anyhow::Error, _: &Correlation) {
            self.calls.lock().push("on_error");
        }
    }

    fn request(cents: i64, context: ExecutionContext) -> ExecutionRequest<Charge> {
        let intent = Arc::new(Charge {
            meta: IntentMeta::new(),
            cents,
        });
        let correlation = Correlation::for_intent(intent.as_ref());
        ExecutionRequest::new(intent, correlation, Arc::new(context), "HookedHandler", None)
    }

    #[tokio::test]
    async fn hooks_run_in_order_on_success() {
        let handler = Arc::new(HookedHandler::default());
        let context = ExecutionContext::builder().property("bonus", 5).build();
        let out = HandlerService::new(handler.clone())
            .oneshot(request(10, context))
            .await
            .unwrap();

        assert_eq!(out, 15);
        assert_eq!(
            *handler.calls.lock(),
            vec![
                "pre_process",
                "execute_with_context",
                "execute",
                "post_process",
                "on_success"
            ]
        );
    }

    #[tokio::test]
    async fn execute_failure_calls_on_error_and_skips_post_process() {
        let handler = Arc::new(HookedHandler::default());
        let fault = HandlerService::new(handler.clone())
            .oneshot(request(-1, ExecutionContext::default()))
            .await
            .unwrap_err();

        assert!(matches!(fault, ExecutionFault::Failed { attempts: 1, .. }));
        assert!(fault.to_string().contains("negative charge"));
        let calls = handler.calls.lock();
        assert!(!calls.contains(&"post_process"));
        assert_eq!(calls.last(), Some(&"on_error"));
    }

    #[tokio::test]
    async fn post_process_failure_fails_the_attempt() {
        let handler = Arc::new(HookedHandler::default());
        let fault = HandlerService::new(handler.clone())
            .oneshot(request(0, ExecutionContext::default()))
            .await
            .unwrap_err();
        assert!(fault.to_string().contains("zero charge"));
        assert_eq!(handler.calls.lock().last(), Some(&"on_error"));
    }
}
