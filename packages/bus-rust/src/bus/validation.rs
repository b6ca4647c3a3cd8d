//! Two-phase validation stage.
//!
//! The structural phase hands the intent, together with its declarative
//! constraints, to the configured [`ConstraintEngine`]. The engine is consulted
//! for every intent, including those that declare no constraints. The custom
//! phase calls `Intent::validate` and only runs when the structural phase
//! found nothing.

use std::sync::Arc;
use std::time::Instant;

use relay_core::{
    unix_millis, ConstraintEngine, ConstraintTarget, Correlation, Intent, RuleEngine, ValidationOutcome,
    ValidationPhase,
};
use tracing::debug;

use super::error::{IntentTrace, ValidationError};

/// Validation stage of the dispatch pipeline.
#[derive(Clone)]
pub struct ValidationStage {
    engine: Arc<dyn ConstraintEngine>,
}

impl ValidationStage {
    #[must_use]
    pub fn new(engine: Arc<dyn ConstraintEngine>) -> Self {
        Self { engine }
    }

    /// Validate `intent`, stopping at the first failing phase.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` carrying every violation of the failing phase.
    pub async fn validate<I: Intent>(
        &self,
        intent: &I,
        correlation: &Correlation,
        started: Instant,
    ) -> Result<(), ValidationError> {
        let structural = self.engine.validate(&ConstraintTarget::new(intent)).await;
        if !structural.is_valid() {
            return Err(reject(ValidationPhase::Structural, structural, correlation, started));
        }

        let custom = intent.validate(correlation).await;
        if !custom.is_valid() {
            return Err(reject(ValidationPhase::Custom, custom, correlation, started));
        }
        Ok(())
    }
}

impl Default for ValidationStage {
    fn default() -> Self {
        Self::new(Arc::new(RuleEngine))
    }
}

fn reject(
    phase: ValidationPhase,
    outcome: ValidationOutcome,
    correlation: &Correlation,
    started: Instant,
) -> ValidationError {
    debug!(
        intent = correlation.intent_type(),
        correlation_id = correlation.id(),
        phase = phase.as_str(),
        fields = ?outcome.fields(),
        "validation rejected intent"
    );
    ValidationError {
        phase,
        violations: outcome.into_violations(),
        trace: IntentTrace::capture(correlation, started),
        failed_at_millis: unix_millis(),
    }
}
