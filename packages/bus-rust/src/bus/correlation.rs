//! Active correlation scopes.
//!
//! The orchestrator enters a scope for every invocation after lookup and holds
//! it until the invocation ends. The scope releases itself on `Drop`, which
//! covers success, failure, panic unwinding and cancellation alike.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use relay_core::Correlation;

/// Set of correlation ids belonging to in-flight invocations.
///
/// Scopes are keyed by a per-tracker sequence number rather than the id itself,
/// so two invocations sharing a caller-supplied correlation id are tracked
/// independently.
#[derive(Debug, Default)]
pub struct CorrelationTracker {
    next: AtomicU64,
    active: DashMap<u64, Arc<str>>,
}

impl CorrelationTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `correlation` active until the returned scope is dropped.
    #[must_use]
    pub fn enter(self: &Arc<Self>, correlation: &Correlation) -> CorrelationScope {
        let slot = self.next.fetch_add(1, Ordering::Relaxed);
        self.active.insert(slot, correlation.shared_id());
        CorrelationScope {
            tracker: Arc::clone(self),
            slot,
        }
    }

    /// Number of open scopes.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Whether any open scope carries correlation id `id`.
    #[must_use]
    pub fn is_active(&self, id: &str) -> bool {
        self.active.iter().any(|entry| &**entry.value() == id)
    }
}

/// Open correlation scope. Dropping it clears the correlation.
#[derive(Debug)]
pub struct CorrelationScope {
    tracker: Arc<CorrelationTracker>,
    slot: u64,
}

impl Drop for CorrelationScope {
    fn drop(&mut self) {
        self.tracker.active.remove(&self.slot);
    }
}
