//! Dispatch error taxonomy.
//!
//! Every failure a caller can observe is one `DispatchError` variant naming the
//! stage that failed. Each variant carries an [`IntentTrace`] (intent type,
//! instance id, correlation id, elapsed time) and keeps the underlying cause as
//! its `source()`.

use std::fmt;
use std::time::{Duration, Instant};

use relay_core::{AuthorizationViolation, Correlation, FieldViolation, Intent, ValidationPhase};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// IntentTrace
// ---------------------------------------------------------------------------

/// Diagnostic identity attached to every dispatch error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentTrace {
    pub intent_type: &'static str,
    pub intent_id: Uuid,
    pub correlation_id: Option<String>,
    /// Wall time from lookup until the failure was raised.
    pub elapsed: Duration,
}

impl IntentTrace {
    /// Trace for an invocation that has no correlation yet (lookup failures).
    #[must_use]
    pub fn for_intent<I: Intent>(intent: &I, started: Instant) -> Self {
        Self {
            intent_type: I::NAME,
            intent_id: intent.meta().id,
            correlation_id: intent.meta().correlation_id.clone(),
            elapsed: started.elapsed(),
        }
    }

    /// Trace for a correlated invocation, measured from `started`.
    #[must_use]
    pub fn capture(correlation: &Correlation, started: Instant) -> Self {
        Self {
            intent_type: correlation.intent_type(),
            intent_id: correlation.intent_id(),
            correlation_id: Some(correlation.id().to_string()),
            elapsed: started.elapsed(),
        }
    }
}

impl fmt::Display for IntentTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} (correlation {}, after {:?})",
            self.intent_type,
            self.intent_id,
            self.correlation_id.as_deref().unwrap_or("-"),
            self.elapsed
        )
    }
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

// ---------------------------------------------------------------------------
// Stage errors
// ---------------------------------------------------------------------------

/// No handler is bound to the intent type.
#[derive(Debug, thiserror::Error)]
#[error(
    "no handler registered for intent `{intent_type}`; registered: [{}]",
    .registered.join(", ")
)]
pub struct HandlerNotFoundError {
    pub intent_type: &'static str,
    /// Names of the intent types bound at lookup time, sorted.
    pub registered: Vec<&'static str>,
    pub trace: IntentTrace,
}

/// Structural or custom validation rejected the intent.
#[derive(Debug, thiserror::Error)]
#[error("{phase} validation failed for {trace}: {}", join(.violations))]
pub struct ValidationError {
    pub phase: ValidationPhase,
    pub violations: Vec<FieldViolation>,
    pub trace: IntentTrace,
    /// When the failing phase completed, in milliseconds since the Unix epoch.
    pub failed_at_millis: u64,
}

impl ValidationError {
    /// Violated field names in order.
    #[must_use]
    pub fn fields(&self) -> Vec<&str> {
        self.violations.iter().map(|v| v.field.as_str()).collect()
    }
}

/// The authorization stage denied the intent.
#[derive(Debug, thiserror::Error)]
#[error("authorization denied for {trace}: {}", join(.violations))]
pub struct AuthorizationError {
    pub violations: Vec<AuthorizationViolation>,
    pub trace: IntentTrace,
}

impl AuthorizationError {
    /// Violation codes in order.
    #[must_use]
    pub fn codes(&self) -> Vec<&str> {
        self.violations.iter().map(|v| v.code.as_str()).collect()
    }
}

/// The handler failed. The handler's error is preserved as the source.
#[derive(Debug, thiserror::Error)]
#[error("handler `{handler}` failed for {trace} after {attempts} attempt(s)")]
pub struct ExecutionError {
    pub handler: &'static str,
    pub attempts: u32,
    pub trace: IntentTrace,
    #[source]
    pub source: anyhow::Error,
}

/// The handler did not finish within its execution bound.
#[derive(Debug, thiserror::Error)]
#[error("handler `{handler}` exceeded {timeout:?} for {trace} after {attempts} attempt(s)")]
pub struct TimeoutError {
    pub handler: &'static str,
    pub timeout: Duration,
    pub attempts: u32,
    pub trace: IntentTrace,
}

/// A handler binding could not be resolved or registered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("handler `{handler}` binds an intent with a blank name")]
    BlankIntentName { handler: &'static str },
    #[error("intent name `{name}` bound by handler `{handler}` must not contain whitespace")]
    InvalidIntentName {
        name: &'static str,
        handler: &'static str,
    },
    #[error("intent name `{name}` is already bound to type `{existing}`, cannot bind `{requested}`")]
    AmbiguousIntentName {
        name: &'static str,
        existing: &'static str,
        requested: &'static str,
    },
    #[error("intent `{intent}` is already bound to handler `{existing}`")]
    DuplicateBinding {
        intent: &'static str,
        existing: &'static str,
    },
    #[error("binding for intent `{intent}` does not match its declared handler type")]
    BindingMismatch { intent: &'static str },
}

// ---------------------------------------------------------------------------
// FailureKind / PipelineStage
// ---------------------------------------------------------------------------

/// Failure classification used for metrics labels and retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    NotFound,
    Validation,
    Authorization,
    Execution,
    Timeout,
    Configuration,
}

impl FailureKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Validation => "validation",
            Self::Authorization => "authorization",
            Self::Execution => "execution",
            Self::Timeout => "timeout",
            Self::Configuration => "configuration",
        }
    }

    /// Only execution failures and timeouts may be retried.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Execution | Self::Timeout)
    }
}

/// Pipeline stage in which a dispatch terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    Lookup,
    Validate,
    Authorize,
    Execute,
}

// ---------------------------------------------------------------------------
// DispatchError
// ---------------------------------------------------------------------------

/// The single error value returned by a failed dispatch.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    HandlerNotFound(#[from] HandlerNotFoundError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Authorization(#[from] AuthorizationError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

impl DispatchError {
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::HandlerNotFound(_) => FailureKind::NotFound,
            Self::Validation(_) => FailureKind::Validation,
            Self::Authorization(_) => FailureKind::Authorization,
            Self::Execution(_) => FailureKind::Execution,
            Self::Timeout(_) => FailureKind::Timeout,
            Self::Configuration(_) => FailureKind::Configuration,
        }
    }

    #[must_use]
    pub fn stage(&self) -> PipelineStage {
        match self {
            Self::HandlerNotFound(_) | Self::Configuration(_) => PipelineStage::Lookup,
            Self::Validation(_) => PipelineStage::Validate,
            Self::Authorization(_) => PipelineStage::Authorize,
            Self::Execution(_) | Self::Timeout(_) => PipelineStage::Execute,
        }
    }

    /// Whether an outer retry policy may resubmit the intent.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Diagnostic identity. `None` only for configuration errors.
    #[must_use]
    pub fn trace(&self) -> Option<&IntentTrace> {
        match self {
            Self::HandlerNotFound(e) => Some(&e.trace),
            Self::Validation(e) => Some(&e.trace),
            Self::Authorization(e) => Some(&e.trace),
            Self::Execution(e) => Some(&e.trace),
            Self::Timeout(e) => Some(&e.trace),
            Self::Configuration(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    fn trace() -> IntentTrace {
        IntentTrace {
            intent_type: "Withdraw",
            intent_id: Uuid::nil(),
            correlation_id: Some("corr-1".to_string()),
            elapsed: Duration::from_millis(3),
        }
    }

    #[test]
    fn only_execution_and_timeout_are_retryable() {
        let validation = DispatchError::from(ValidationError {
            phase: ValidationPhase::Structural,
            violations: vec![FieldViolation::new("name", "required", "NOT_BLANK")],
            trace: trace(),
            failed_at_millis: 0,
        });
        let authorization = DispatchError::from(AuthorizationError {
            violations: vec![AuthorizationViolation::new("amount", "limit", "LIMIT_EXCEEDED")],
            trace: trace(),
        });
        let execution = DispatchError::from(ExecutionError {
            handler: "WithdrawHandler",
            attempts: 1,
            trace: trace(),
            source: anyhow::anyhow!("ledger unavailable"),
        });
        let timeout = DispatchError::from(TimeoutError {
            handler: "WithdrawHandler",
            timeout: Duration::from_millis(10),
            attempts: 1,
            trace: trace(),
        });

        assert!(!validation.is_retryable());
        assert!(!authorization.is_retryable());
        assert!(execution.is_retryable());
        assert!(timeout.is_retryable());
        assert_eq!(timeout.kind(), FailureKind::Timeout);
        assert_eq!(authorization.stage(), PipelineStage::Authorize);
    }

    #[test]
    fn execution_error_preserves_cause_chain() {
        let cause = anyhow::anyhow!("socket closed").context("ledger unavailable");
        let err = DispatchError::from(ExecutionError {
            handler: "WithdrawHandler",
            attempts: 2,
            trace: trace(),
            source: cause,
        });
        let source = err.source().expect("execution error has a source");
        assert_eq!(source.to_string(), "ledger unavailable");
        assert_eq!(
            source.source().map(ToString::to_string).as_deref(),
            Some("socket closed")
        );
        assert!(err.to_string().contains("corr-1"));
        assert!(err.to_string().contains("2 attempt(s)"));
    }

    #[test]
    fn not_found_lists_registered_types() {
        let err = HandlerNotFoundError {
            intent_type: "Deposit",
            registered: vec!["GetBalance", "Withdraw"],
            trace: trace(),
        };
        assert_eq!(
            err.to_string(),
            "no handler registered for intent `Deposit`; registered: [GetBalance, Withdraw]"
        );
    }

    #[test]
    fn configuration_error_has_no_trace() {
        let err = DispatchError::from(ConfigurationError::BindingMismatch { intent: "X" });
        assert!(err.trace().is_none());
        assert_eq!(err.stage(), PipelineStage::Lookup);
    }
}
