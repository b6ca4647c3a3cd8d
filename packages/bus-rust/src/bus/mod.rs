//! Intent dispatch pipeline.
//!
//! This module implements the bus that routes each intent to its handler:
//!
//! 1. **Resolution** (`resolve`): handler -> intent type, result type, stable name
//! 2. **Registry** (`registry`): copy-on-write table of intent type -> handler
//! 3. **Validation** (`validation`): structural constraints, then custom rules
//! 4. **Authorization** (`authorization`): pluggable gate, toggled by config
//! 5. **Execution** (`execution`, `middleware`): tower stack of retry, timeout
//!    and tracing around the handler hooks
//! 6. **Orchestration** (`orchestrator`): sequences the stages, tracks
//!    correlation scopes (`correlation`) and records metrics (`metrics`)

pub mod authorization;
pub mod config;
pub mod correlation;
pub mod error;
pub mod execution;
pub mod metrics;
pub mod middleware;
pub mod orchestrator;
pub mod registry;
pub mod resolve;
pub mod validation;

// Re-export key types for convenient access.
pub use authorization::{
    AuthorizationGate, AuthorizationStage, Authorize, DisabledAuthorization, IntentAuthorization,
};
pub use config::{BusConfig, RegistrationMode, RetryPolicy};
pub use correlation::{CorrelationScope, CorrelationTracker};
pub use error::{
    AuthorizationError, ConfigurationError, DispatchError, ExecutionError, FailureKind,
    HandlerNotFoundError, IntentTrace, PipelineStage, TimeoutError, ValidationError,
};
pub use execution::{ExecutionFault, ExecutionRequest, HandlerService};
pub use metrics::{
    MetricsCollector, MetricsSnapshot, NoopMetricsCollector, TelemetryMetricsCollector,
};
pub use orchestrator::{Bus, BusBuilder};
pub use registry::{BoundHandler, HandlerRegistry, Registration};
pub use resolve::{resolve, HandlerBinding};
pub use validation::ValidationStage;
