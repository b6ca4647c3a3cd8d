//! The dispatch bus.
//!
//! Every invocation walks the same sequence:
//!
//! ```text
//! LOOKUP -> enter correlation -> VALIDATE -> AUTHORIZE -> EXECUTE
//!        -> side effect (best effort) -> record metrics -> release correlation
//! ```
//!
//! A failing stage ends the invocation with one [`DispatchError`]. Metrics are
//! recorded exactly once for every invocation that got past lookup, and the
//! correlation scope is released on every exit path, including cancellation
//! (dropping the dispatch future).

use std::sync::Arc;
use std::time::Instant;

use relay_core::{
    ConstraintEngine, Correlation, ExecutionContext, Handler, Intent, IntentDescriptor,
    IntentKind, ResultCache, RuleEngine, SideEffectPublisher, TelemetrySink,
};
use tower::ServiceExt;
use tracing::{debug, field, info, info_span, warn, Instrument, Span};

use super::authorization::{
    AuthorizationGate, AuthorizationStage, DisabledAuthorization, IntentAuthorization,
};
use super::config::BusConfig;
use super::correlation::CorrelationTracker;
use super::error::{
    ConfigurationError, DispatchError, ExecutionError, FailureKind, HandlerNotFoundError,
    IntentTrace, TimeoutError,
};
use super::execution::{ExecutionFault, ExecutionRequest};
use super::metrics::{MetricsCollector, NoopMetricsCollector, TelemetryMetricsCollector};
use super::middleware::build_execution_stack;
use super::registry::{BoundHandler, HandlerRegistry, Registration};
use super::validation::ValidationStage;

// ---------------------------------------------------------------------------
// Bus
// ---------------------------------------------------------------------------

/// Routes intents to their handlers through the dispatch pipeline.
///
/// Cheap to clone; clones share the registry, metrics and correlation tracker.
#[derive(Clone)]
pub struct Bus {
    config: BusConfig,
    registry: Arc<HandlerRegistry>,
    validation: ValidationStage,
    authorization: AuthorizationStage,
    metrics: Arc<dyn MetricsCollector>,
    publisher: Option<Arc<dyn SideEffectPublisher>>,
    cache: Option<Arc<dyn ResultCache>>,
    correlations: Arc<CorrelationTracker>,
}

impl Bus {
    #[must_use]
    pub fn builder() -> BusBuilder {
        BusBuilder::new()
    }

    /// Bus with default collaborators and no handlers.
    #[must_use]
    pub fn new(config: BusConfig) -> Self {
        BusBuilder::new().config(config).assemble()
    }

    /// Dispatch with an empty execution context.
    ///
    /// # Errors
    ///
    /// Returns the [`DispatchError`] of the first failing stage.
    pub async fn dispatch<I: Intent>(&self, intent: I) -> Result<I::Output, DispatchError> {
        self.dispatch_with_context(intent, Arc::new(ExecutionContext::default()))
            .await
    }

    /// Dispatch with a caller-built execution context, shared read-only by
    /// every stage.
    ///
    /// # Errors
    ///
    /// Returns the [`DispatchError`] of the first failing stage.
    pub async fn dispatch_with_context<I: Intent>(
        &self,
        intent: I,
        context: Arc<ExecutionContext>,
    ) -> Result<I::Output, DispatchError> {
        let started = Instant::now();

        let Some(bound) = self.registry.try_find::<I>()? else {
            let err = HandlerNotFoundError {
                intent_type: I::NAME,
                registered: self.registry.registered_names(),
                trace: IntentTrace::for_intent(&intent, started),
            };
            debug!(intent = I::NAME, "no handler registered");
            return Err(err.into());
        };

        let correlation = Correlation::for_intent(&intent);
        let _scope = self.correlations.enter(&correlation);

        let span = info_span!(
            "dispatch",
            intent = I::NAME,
            kind = I::KIND.as_str(),
            intent_id = %correlation.intent_id(),
            correlation_id = correlation.id(),
            handler = bound.binding().handler,
            outcome = field::Empty,
            elapsed_ms = field::Empty,
        );

        self.run(Arc::new(intent), bound, correlation, context, started)
            .instrument(span)
            .await
    }

    /// Dispatch a query through the result cache.
    ///
    /// Consulted only for [`IntentKind::Query`] intents that return a cache key
    /// and only when a cache is configured; everything else is a plain
    /// [`dispatch_with_context`](Self::dispatch_with_context). A hit returns
    /// before lookup and records no metrics.
    ///
    /// # Errors
    ///
    /// Returns the [`DispatchError`] of the first failing stage on a miss.
    pub async fn dispatch_cached<I>(
        &self,
        intent: I,
        context: Arc<ExecutionContext>,
    ) -> Result<I::Output, DispatchError>
    where
        I: Intent,
        I::Output: Clone,
    {
        let (cache, key) = match (&self.cache, I::KIND, intent.cache_key()) {
            (Some(cache), IntentKind::Query, Some(key)) => (Arc::clone(cache), key),
            _ => return self.dispatch_with_context(intent, context).await,
        };

        if let Some(hit) = cache.get(I::NAME, &key).await {
            match hit.downcast::<I::Output>() {
                Ok(output) => {
                    debug!(intent = I::NAME, key = %key, "query served from cache");
                    return Ok((*output).clone());
                }
                Err(_) => warn!(intent = I::NAME, key = %key, "cached value has an unexpected type"),
            }
        }

        let output = self.dispatch_with_context(intent, context).await?;
        cache.put(I::NAME, &key, Arc::new(output.clone())).await;
        Ok(output)
    }

    /// Register a handler on this bus's registry.
    ///
    /// # Errors
    ///
    /// See [`HandlerRegistry::register`].
    pub fn register<H: Handler>(&self, handler: H) -> Result<Registration, ConfigurationError> {
        self.registry.register(handler)
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<dyn MetricsCollector> {
        &self.metrics
    }

    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    #[must_use]
    pub fn authorization_enabled(&self) -> bool {
        self.authorization.is_enabled()
    }

    /// Number of invocations currently between lookup and completion.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.correlations.active_count()
    }

    /// Whether an in-flight invocation carries correlation id `id`.
    #[must_use]
    pub fn is_correlation_active(&self, id: &str) -> bool {
        self.correlations.is_active(id)
    }

    async fn run<I: Intent>(
        &self,
        intent: Arc<I>,
        bound: BoundHandler<I>,
        correlation: Correlation,
        context: Arc<ExecutionContext>,
        started: Instant,
    ) -> Result<I::Output, DispatchError> {
        if let Err(err) = self
            .validation
            .validate(intent.as_ref(), &correlation, started)
            .await
        {
            self.metrics.record_validation_failure(I::NAME, err.phase);
            return Err(self.fail::<I>(err.into(), started));
        }

        if let Err(err) = self
            .authorization
            .authorize(intent.as_ref(), &correlation, &context, started)
            .await
        {
            return Err(self.fail::<I>(err.into(), started));
        }

        let handler = bound.binding().handler;
        let request = ExecutionRequest::new(
            Arc::clone(&intent),
            correlation.clone(),
            context,
            handler,
            bound.timeout().or(self.config.default_execution_timeout),
        );
        let stack = build_execution_stack(Arc::clone(bound.handler()), &self.config.retry);

        let output = match stack.oneshot(request).await {
            Ok(output) => output,
            Err(fault) => {
                let trace = IntentTrace::capture(&correlation, started);
                let err: DispatchError = match fault {
                    ExecutionFault::Failed { source, attempts } => ExecutionError {
                        handler,
                        attempts,
                        trace,
                        source,
                    }
                    .into(),
                    ExecutionFault::TimedOut { timeout, attempts } => TimeoutError {
                        handler,
                        timeout,
                        attempts,
                        trace,
                    }
                    .into(),
                };
                return Err(self.fail::<I>(err, started));
            }
        };

        self.publish_side_effect(intent.as_ref(), &output, &correlation)
            .await;

        let elapsed = started.elapsed();
        self.metrics.record_success(I::NAME, elapsed);
        let elapsed_ms = millis(elapsed);
        Span::current().record("outcome", "success");
        Span::current().record("elapsed_ms", elapsed_ms);
        if self.config.log_completions {
            info!(elapsed_ms, "dispatch complete");
        }
        Ok(output)
    }

    /// Record the terminal failure and hand the error back.
    fn fail<I: Intent>(&self, err: DispatchError, started: Instant) -> DispatchError {
        let elapsed = started.elapsed();
        let kind = err.kind();
        self.metrics.record_failure(I::NAME, kind, elapsed);

        let elapsed_ms = millis(elapsed);
        Span::current().record("outcome", kind.as_str());
        Span::current().record("elapsed_ms", elapsed_ms);
        match kind {
            FailureKind::Validation | FailureKind::Authorization => {
                debug!(elapsed_ms, outcome = kind.as_str(), "dispatch rejected");
            }
            _ => warn!(elapsed_ms, outcome = kind.as_str(), error = %err, "dispatch failed"),
        }
        err
    }

    async fn publish_side_effect<I: Intent>(
        &self,
        intent: &I,
        output: &I::Output,
        correlation: &Correlation,
    ) {
        let Some(publisher) = &self.publisher else {
            return;
        };
        let Some(effect) = intent.side_effect(output) else {
            return;
        };
        let origin = IntentDescriptor {
            intent_type: I::NAME.to_string(),
            intent_id: correlation.intent_id(),
            correlation_id: correlation.id().to_string(),
            initiator_id: intent.meta().initiator_id.clone(),
        };
        if let Err(err) = publisher.publish(&origin, &effect).await {
            warn!(topic = %effect.topic, error = %err, "side effect publication failed");
        }
    }
}

fn millis(elapsed: std::time::Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

// ---------------------------------------------------------------------------
// BusBuilder
// ---------------------------------------------------------------------------

type PendingRegistration =
    Box<dyn FnOnce(&HandlerRegistry) -> Result<Registration, ConfigurationError> + Send>;

/// Composes a [`Bus`] from its configuration, collaborators and handlers.
pub struct BusBuilder {
    config: BusConfig,
    engine: Option<Arc<dyn ConstraintEngine>>,
    gate: Option<Arc<dyn AuthorizationGate>>,
    metrics: Option<Arc<dyn MetricsCollector>>,
    publisher: Option<Arc<dyn SideEffectPublisher>>,
    cache: Option<Arc<dyn ResultCache>>,
    handlers: Vec<PendingRegistration>,
}

impl BusBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: BusConfig::default(),
            engine: None,
            gate: None,
            metrics: None,
            publisher: None,
            cache: None,
            handlers: Vec::new(),
        }
    }

    #[must_use]
    pub fn config(mut self, config: BusConfig) -> Self {
        self.config = config;
        self
    }

    /// Structural validation backend. Defaults to [`RuleEngine`].
    #[must_use]
    pub fn constraint_engine(mut self, engine: Arc<dyn ConstraintEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Authorization backend used while authorization is enabled. Defaults to
    /// [`IntentAuthorization`].
    #[must_use]
    pub fn authorization_gate(mut self, gate: Arc<dyn AuthorizationGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Count dispatches and forward them to `sink`.
    #[must_use]
    pub fn telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.metrics = Some(Arc::new(TelemetryMetricsCollector::new(sink)));
        self
    }

    #[must_use]
    pub fn metrics_collector(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    #[must_use]
    pub fn side_effect_publisher(mut self, publisher: Arc<dyn SideEffectPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    #[must_use]
    pub fn result_cache(mut self, cache: Arc<dyn ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Queue a handler for registration when the bus is built.
    #[must_use]
    pub fn handler<H: Handler>(mut self, handler: H) -> Self {
        self.handlers
            .push(Box::new(move |registry| registry.register(handler)));
        self
    }

    /// # Errors
    ///
    /// Returns the first `ConfigurationError` raised while registering the
    /// queued handlers.
    pub fn build(mut self) -> Result<Bus, ConfigurationError> {
        let handlers = std::mem::take(&mut self.handlers);
        let bus = self.assemble();
        for register in handlers {
            register(&bus.registry)?;
        }
        info!(
            handlers = bus.registry.len(),
            authorization = bus.authorization_enabled(),
            mode = ?bus.config.registration_mode,
            "bus ready"
        );
        Ok(bus)
    }

    fn assemble(self) -> Bus {
        let authorization = if self.config.authorization_enabled {
            AuthorizationStage::new(
                self.gate
                    .unwrap_or_else(|| Arc::new(IntentAuthorization) as Arc<dyn AuthorizationGate>),
            )
        } else {
            AuthorizationStage::new(Arc::new(DisabledAuthorization))
        };
        Bus {
            registry: Arc::new(HandlerRegistry::new(self.config.registration_mode)),
            validation: ValidationStage::new(
                self.engine
                    .unwrap_or_else(|| Arc::new(RuleEngine) as Arc<dyn ConstraintEngine>),
            ),
            authorization,
            metrics: self
                .metrics
                .unwrap_or_else(|| Arc::new(NoopMetricsCollector) as Arc<dyn MetricsCollector>),
            publisher: self.publisher,
            cache: self.cache,
            correlations: Arc::new(CorrelationTracker::new()),
            config: self.config,
        }
    }
}

impl Default for BusBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
