//! Relay bus: handler registry, validation and authorization stages,
//! execution middleware, metrics and the dispatch orchestrator.

pub mod bus;
pub mod telemetry;

pub use bus::{
    Bus, BusBuilder, BusConfig, DispatchError, FailureKind, HandlerRegistry, MetricsCollector,
    MetricsSnapshot, RegistrationMode, RetryPolicy,
};
pub use telemetry::MetricsFacadeSink;
