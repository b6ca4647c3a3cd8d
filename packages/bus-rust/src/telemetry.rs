//! Tracing and metrics export wiring.
//!
//! The bus itself only emits `tracing` events and calls a [`TelemetrySink`].
//! Binaries call [`init_tracing`] once at startup and, when they want
//! Prometheus output, [`install_prometheus_recorder`] plus a
//! [`MetricsFacadeSink`] passed to `BusBuilder::telemetry`.

use std::time::Duration;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use relay_core::TelemetrySink;
use tracing_subscriber::EnvFilter;

/// Counter of completed dispatches, labelled by `intent` and `outcome`.
pub const DISPATCH_TOTAL: &str = "relay_dispatch_total";
/// Histogram of dispatch wall time in seconds, labelled by `intent` and `outcome`.
pub const DISPATCH_DURATION_SECONDS: &str = "relay_dispatch_duration_seconds";
/// Counter of validation rejections, labelled by `intent` and `phase`.
pub const VALIDATION_FAILURES_TOTAL: &str = "relay_validation_failures_total";

/// Install the global `tracing` subscriber.
///
/// `filter` uses `EnvFilter` syntax and is overridden by `RUST_LOG` when set.
///
/// # Errors
///
/// Returns an error when the filter does not parse or a global subscriber is
/// already installed.
pub fn init_tracing(filter: &str, json: bool) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(from_env) => from_env,
        Err(_) => EnvFilter::try_new(filter)?,
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    let installed = if json {
        builder.json().flatten_event(true).try_init()
    } else {
        builder.compact().try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}

/// Install a Prometheus recorder as the global `metrics` recorder.
///
/// # Errors
///
/// Returns an error when a global recorder is already installed.
pub fn install_prometheus_recorder() -> anyhow::Result<PrometheusHandle> {
    Ok(PrometheusBuilder::new().install_recorder()?)
}

/// [`TelemetrySink`] forwarding to the `metrics` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsFacadeSink;

impl TelemetrySink for MetricsFacadeSink {
    fn increment(&self, intent: &'static str, outcome: &'static str) {
        metrics::counter!(DISPATCH_TOTAL, "intent" => intent, "outcome" => outcome).increment(1);
    }

    fn observe_duration(&self, intent: &'static str, outcome: &'static str, duration: Duration) {
        metrics::histogram!(DISPATCH_DURATION_SECONDS, "intent" => intent, "outcome" => outcome)
            .record(duration.as_secs_f64());
    }

    fn validation_failed(&self, intent: &'static str, phase: &'static str) {
        metrics::counter!(VALIDATION_FAILURES_TOTAL, "intent" => intent, "phase" => phase)
            .increment(1);
    }
}
