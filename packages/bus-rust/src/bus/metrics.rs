//! Dispatch metrics.
//!
//! [`TelemetryMetricsCollector`] keeps lock-free per-intent counters and
//! forwards every observation to a [`TelemetrySink`]. [`NoopMetricsCollector`]
//! is used when no sink is configured; it records nothing and reads back zero.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use relay_core::{TelemetrySink, ValidationPhase};
use serde::Serialize;

use super::error::FailureKind;

/// Outcome label used for successful dispatches.
pub const SUCCESS: &str = "success";

/// Point-in-time view of one counter set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Dispatches that reached the pipeline, whatever their outcome.
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub validation_failed: u64,
    /// Number of duration samples observed (successes and failures).
    pub duration_samples: u64,
    pub total_duration: Duration,
    pub max_duration: Duration,
}

impl MetricsSnapshot {
    /// Mean of all duration samples, or zero when there are none.
    #[must_use]
    pub fn mean_duration(&self) -> Duration {
        if self.duration_samples == 0 {
            return Duration::ZERO;
        }
        let nanos = self.total_duration.as_nanos() / u128::from(self.duration_samples);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

/// Records dispatch outcomes.
pub trait MetricsCollector: Send + Sync {
    fn record_success(&self, intent: &'static str, duration: Duration);

    fn record_failure(&self, intent: &'static str, kind: FailureKind, duration: Duration);

    fn record_validation_failure(&self, intent: &'static str, phase: ValidationPhase);

    /// Counters for one intent type.
    fn snapshot(&self, intent: &str) -> MetricsSnapshot;

    /// Counters across all intent types.
    fn totals(&self) -> MetricsSnapshot;
}

// ---------------------------------------------------------------------------
// NoopMetricsCollector
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetricsCollector;

impl MetricsCollector for NoopMetricsCollector {
    fn record_success(&self, _intent: &'static str, _duration: Duration) {}

    fn record_failure(&self, _intent: &'static str, _kind: FailureKind, _duration: Duration) {}

    fn record_validation_failure(&self, _intent: &'static str, _phase: ValidationPhase) {}

    fn snapshot(&self, _intent: &str) -> MetricsSnapshot {
        MetricsSnapshot::default()
    }

    fn totals(&self) -> MetricsSnapshot {
        MetricsSnapshot::default()
    }
}

// ---------------------------------------------------------------------------
// TelemetryMetricsCollector
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Counters {
    processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    validation_failed: AtomicU64,
    samples: AtomicU64,
    total_nanos: AtomicU64,
    max_nanos: AtomicU64,
}

impl Counters {
    fn observe(&self, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.samples.fetch_add(1, Ordering::Relaxed);
        self.total_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.max_nanos.fetch_max(nanos, Ordering::Relaxed);
    }

    fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            validation_failed: self.validation_failed.load(Ordering::Relaxed),
            duration_samples: self.samples.load(Ordering::Relaxed),
            total_duration: Duration::from_nanos(self.total_nanos.load(Ordering::Relaxed)),
            max_duration: Duration::from_nanos(self.max_nanos.load(Ordering::Relaxed)),
        }
    }
}

/// Atomic counters per intent type, mirrored to a telemetry sink.
///
/// Per-type records are created on first observation and live as long as the
/// collector.
pub struct TelemetryMetricsCollector {
    sink: Arc<dyn TelemetrySink>,
    per_intent: DashMap<&'static str, Arc<Counters>>,
    totals: Counters,
}

impl TelemetryMetricsCollector {
    #[must_use]
    pub fn new(sink: Arc<dyn TelemetrySink>) -> Self {
        Self {
            sink,
            per_intent: DashMap::new(),
            totals: Counters::default(),
        }
    }

    fn counters(&self, intent: &'static str) -> Arc<Counters> {
        if let Some(existing) = self.per_intent.get(intent) {
            return Arc::clone(existing.value());
        }
        Arc::clone(self.per_intent.entry(intent).or_default().value())
    }
}

impl MetricsCollector for TelemetryMetricsCollector {
    fn record_success(&self, intent: &'static str, duration: Duration) {
        let counters = self.counters(intent);
        for c in [&*counters, &self.totals] {
            c.processed.fetch_add(1, Ordering::Relaxed);
            c.succeeded.fetch_add(1, Ordering::Relaxed);
            c.observe(duration);
        }
        self.sink.increment(intent, SUCCESS);
        self.sink.observe_duration(intent, SUCCESS, duration);
    }

    fn record_failure(&self, intent: &'static str, kind: FailureKind, duration: Duration) {
        let counters = self.counters(intent);
        for c in [&*counters, &self.totals] {
            c.processed.fetch_add(1, Ordering::Relaxed);
            c.failed.fetch_add(1, Ordering::Relaxed);
            c.observe(duration);
        }
        self.sink.increment(intent, kind.as_str());
        self.sink.observe_duration(intent, kind.as_str(), duration);
    }

    fn record_validation_failure(&self, intent: &'static str, phase: ValidationPhase) {
        let counters = self.counters(intent);
        counters.validation_failed.fetch_add(1, Ordering::Relaxed);
        self.totals.validation_failed.fetch_add(1, Ordering::Relaxed);
        self.sink.validation_failed(intent, phase.as_str());
    }

    fn snapshot(&self, intent: &str) -> MetricsSnapshot {
        self.per_intent
            .get(intent)
            .map(|c| c.snapshot())
            .unwrap_or_default()
    }

    fn totals(&self) -> MetricsSnapshot {
        self.totals.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    /// Sink that records every call for inspection.
    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<String>>,
    }

    impl TelemetrySink for RecordingSink {
        fn increment(&self, intent: &'static str, outcome: &'static str) {
            self.events.lock().push(format!("inc {intent} {outcome}"));
        }

        fn observe_duration(&self, intent: &'static str, outcome: &'static str, _: Duration) {
            self.events.lock().push(format!("dur {intent} {outcome}"));
        }

        fn validation_failed(&self, intent: &'static str, phase: &'static str) {
            self.events.lock().push(format!("val {intent} {phase}"));
        }
    }

    #[test]
    fn counts_successes_and_failures_per_intent() {
        let sink = Arc::new(RecordingSink::default());
        let collector = TelemetryMetricsCollector::new(sink.clone());

        collector.record_success("GetBalance", Duration::from_millis(4));
        collector.record_success("GetBalance", Duration::from_millis(2));
        collector.record_failure("Withdraw", FailureKind::Authorization, Duration::from_millis(1));

        let balance = collector.snapshot("GetBalance");
        assert_eq!(balance.processed, 2);
        assert_eq!(balance.succeeded, 2);
        assert_eq!(balance.failed, 0);
        assert_eq!(balance.duration_samples, 2);
        assert_eq!(balance.max_duration, Duration::from_millis(4));
        assert_eq!(balance.mean_duration(), Duration::from_millis(3));

        let withdraw = collector.snapshot("Withdraw");
        assert_eq!(withdraw.processed, 1);
        assert_eq!(withdraw.succeeded, 0);
        assert_eq!(withdraw.failed, 1);

        let totals = collector.totals();
        assert_eq!(totals.processed, 3);
        assert_eq!(totals.succeeded, 2);
        assert_eq!(totals.failed, 1);

        let events = sink.events.lock();
        assert!(events.contains(&"inc Withdraw authorization".to_string()));
        assert!(events.contains(&"dur GetBalance success".to_string()));
    }

    #[test]
    fn validation_failures_are_counted_separately() {
        let sink = Arc::new(RecordingSink::default());
        let collector = TelemetryMetricsCollector::new(sink.clone());
        collector.record_validation_failure("OpenAccount", ValidationPhase::Structural);
        collector.record_failure("OpenAccount", FailureKind::Validation, Duration::ZERO);

        let snapshot = collector.snapshot("OpenAccount");
        assert_eq!(snapshot.validation_failed, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.succeeded, 0);
        assert!(sink
            .events
            .lock()
            .contains(&"val OpenAccount structural".to_string()));
    }

    #[test]
    fn unknown_intent_reads_zero() {
        let collector = TelemetryMetricsCollector::new(Arc::new(RecordingSink::default()));
        assert_eq!(collector.snapshot("Nope"), MetricsSnapshot::default());
    }

    #[test]
    fn noop_collector_reads_zero() {
        let collector = NoopMetricsCollector;
        collector.record_success("GetBalance", Duration::from_millis(5));
        assert_eq!(collector.snapshot("GetBalance"), MetricsSnapshot::default());
        assert_eq!(collector.totals().processed, 0);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let collector = Arc::new(TelemetryMetricsCollector::new(Arc::new(
            RecordingSink::default(),
        )));
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let collector = Arc::clone(&collector);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        collector.record_success("Ping", Duration::from_micros(10));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(collector.snapshot("Ping").processed, 4000);
        assert_eq!(collector.snapshot("Ping").succeeded, 4000);
        assert_eq!(collector.totals().duration_samples, 4000);
    }
}
