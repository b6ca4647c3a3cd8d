//! Contracts for the collaborators that sit around the dispatch pipeline.
//!
//! None of these are implemented by the bus itself beyond no-op defaults: the
//! constraint engine, telemetry backend, side-effect publisher and result cache
//! are pluggable and selected when the bus is composed.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constraints::ConstraintSet;
use crate::intent::{Intent, IntentType};
use crate::outcome::ValidationOutcome;

/// An intent instance as handed to a [`ConstraintEngine`].
///
/// Carries the instance itself, so engines keyed on the intent type can inspect
/// it, plus the constraints the intent declares (possibly none).
pub struct ConstraintTarget<'a> {
    intent_type: IntentType,
    intent: &'a (dyn Any + Send + Sync),
    constraints: ConstraintSet,
}

impl<'a> ConstraintTarget<'a> {
    #[must_use]
    pub fn new<I: Intent>(intent: &'a I) -> Self {
        Self {
            intent_type: IntentType::of::<I>(),
            intent,
            constraints: intent.constraints(),
        }
    }

    #[must_use]
    pub fn intent_type(&self) -> IntentType {
        self.intent_type
    }

    /// The instance as `I`, or `None` when it is another intent type.
    #[must_use]
    pub fn downcast<I: Intent>(&self) -> Option<&'a I> {
        self.intent.downcast_ref::<I>()
    }

    #[must_use]
    pub fn constraints(&self) -> &ConstraintSet {
        &self.constraints
    }
}

/// Structural validation of an intent instance.
///
/// Consulted first for every dispatched intent, whether or not it declares
/// constraints; any violation stops the dispatch.
#[async_trait]
pub trait ConstraintEngine: Send + Sync {
    /// Returns every violation found; an empty outcome means the intent passed.
    async fn validate(&self, target: &ConstraintTarget<'_>) -> ValidationOutcome;
}

/// Backend receiving dispatch counters and duration samples.
///
/// Keyed by intent name and outcome label (`"success"`, `"validation"`,
/// `"authorization"`, `"execution"`, `"timeout"`, ...).
pub trait TelemetrySink: Send + Sync {
    /// Increments the dispatch counter for `intent` / `outcome`.
    fn increment(&self, intent: &'static str, outcome: &'static str);

    /// Records one duration sample for `intent` / `outcome`.
    fn observe_duration(&self, intent: &'static str, outcome: &'static str, duration: Duration);

    /// Increments the validation-failure counter for `intent` / `phase`.
    fn validation_failed(&self, intent: &'static str, phase: &'static str);
}

// ---------------------------------------------------------------------------
// Side effects
// ---------------------------------------------------------------------------

/// Publish specification derived by an intent from its result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SideEffect {
    /// Destination the publisher routes the payload to.
    pub topic: String,
    pub payload: serde_json::Value,
}

impl SideEffect {
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }
}

/// Identity of the intent a side effect originates from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentDescriptor {
    pub intent_type: String,
    pub intent_id: Uuid,
    pub correlation_id: String,
    pub initiator_id: Option<String>,
}

/// Delivers side effects after a successful execution.
///
/// Failures are logged by the bus and never turn a successful dispatch into a
/// failure.
#[async_trait]
pub trait SideEffectPublisher: Send + Sync {
    async fn publish(&self, origin: &IntentDescriptor, effect: &SideEffect) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// Result cache
// ---------------------------------------------------------------------------

/// Type-erased cached query result.
pub type CachedValue = Arc<dyn Any + Send + Sync>;

/// Storage for query results. The bus only calls the hooks; storage and
/// eviction belong to the implementation.
#[async_trait]
pub trait ResultCache: Send + Sync {
    /// Previously stored result for `intent` / `key`.
    async fn get(&self, intent: &'static str, key: &str) -> Option<CachedValue>;

    /// Stores a fresh result after a successful execution.
    async fn put(&self, intent: &'static str, key: &str, value: CachedValue);
}
