//! Validation and authorization outcomes.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Which validation sub-stage produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValidationPhase {
    /// Declarative field constraints evaluated by the constraint engine.
    Structural,
    /// Business rules supplied by the intent itself.
    Custom,
}

impl ValidationPhase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Structural => "structural",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for ValidationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
    /// Machine-readable code, e.g. `NOT_BLANK`.
    pub code: String,
}

impl FieldViolation {
    #[must_use]
    pub fn new(
        field: impl Into<String>,
        message: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            code: code.into(),
        }
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} [{}]", self.field, self.message, self.code)
    }
}

/// Ordered set of field violations. Valid iff empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    violations: Vec<FieldViolation>,
}

impl ValidationOutcome {
    /// An outcome with no violations.
    #[must_use]
    pub fn valid() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_violations(violations: Vec<FieldViolation>) -> Self {
        Self { violations }
    }

    /// Shorthand for an outcome holding one violation.
    #[must_use]
    pub fn invalid(
        field: impl Into<String>,
        message: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            violations: vec![FieldViolation::new(field, message, code)],
        }
    }

    pub fn push(&mut self, violation: FieldViolation) {
        self.violations.push(violation);
    }

    /// Appends all violations of `other`, preserving order.
    pub fn merge(&mut self, other: ValidationOutcome) {
        self.violations.extend(other.violations);
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    #[must_use]
    pub fn violations(&self) -> &[FieldViolation] {
        &self.violations
    }

    #[must_use]
    pub fn into_violations(self) -> Vec<FieldViolation> {
        self.violations
    }

    /// Violated field names in order.
    #[must_use]
    pub fn fields(&self) -> Vec<&str> {
        self.violations.iter().map(|v| v.field.as_str()).collect()
    }
}

// ---------------------------------------------------------------------------
// Authorization
// ---------------------------------------------------------------------------

/// A single denied-access reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationViolation {
    /// Resource or field the denial applies to.
    pub resource: String,
    pub message: String,
    /// Machine-readable code, e.g. `LIMIT_EXCEEDED`.
    pub code: String,
}

impl AuthorizationViolation {
    #[must_use]
    pub fn new(
        resource: impl Into<String>,
        message: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            resource: resource.into(),
            message: message.into(),
            code: code.into(),
        }
    }
}

impl fmt::Display for AuthorizationViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} [{}]", self.resource, self.message, self.code)
    }
}

/// Result of the authorization stage.
///
/// Authorized iff `authorized` is true and there are no violations, so an
/// implementation that sets the flag but still reports a reason is denied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationOutcome {
    authorized: bool,
    violations: Vec<AuthorizationViolation>,
}

impl AuthorizationOutcome {
    #[must_use]
    pub fn new(authorized: bool, violations: Vec<AuthorizationViolation>) -> Self {
        Self {
            authorized,
            violations,
        }
    }

    #[must_use]
    pub fn granted() -> Self {
        Self::new(true, Vec::new())
    }

    /// Denied with a single reason.
    #[must_use]
    pub fn denied(
        resource: impl Into<String>,
        message: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self::new(
            false,
            vec![AuthorizationViolation::new(resource, message, code)],
        )
    }

    /// Adds a reason and clears the authorized flag.
    pub fn deny(&mut self, violation: AuthorizationViolation) {
        self.authorized = false;
        self.violations.push(violation);
    }

    #[must_use]
    pub fn is_authorized(&self) -> bool {
        self.authorized && self.violations.is_empty()
    }

    #[must_use]
    pub fn violations(&self) -> &[AuthorizationViolation] {
        &self.violations
    }

    #[must_use]
    pub fn into_violations(self) -> Vec<AuthorizationViolation> {
        self.violations
    }
}

impl Default for AuthorizationOutcome {
    fn default() -> Self {
        Self::granted()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn empty_outcome_is_valid() {
        assert!(ValidationOutcome::valid().is_valid());
        assert!(!ValidationOutcome::invalid("name", "required", "NOT_BLANK").is_valid());
    }

    #[test]
    fn merge_preserves_order() {
        let mut outcome = ValidationOutcome::invalid("a", "bad", "X");
        outcome.merge(ValidationOutcome::invalid("b", "bad", "Y"));
        outcome.push(FieldViolation::new("c", "bad", "Z"));
        assert_eq!(outcome.fields(), vec!["a", "b", "c"]);
    }

    #[test]
    fn flag_with_violations_is_not_authorized() {
        let outcome = AuthorizationOutcome::new(
            true,
            vec![AuthorizationViolation::new("account", "frozen", "FROZEN")],
        );
        assert!(!outcome.is_authorized());
    }

    #[test]
    fn deny_clears_flag() {
        let mut outcome = AuthorizationOutcome::granted();
        assert!(outcome.is_authorized());
        outcome.deny(AuthorizationViolation::new("amount", "too large", "LIMIT_EXCEEDED"));
        assert!(!outcome.is_authorized());
        assert_eq!(outcome.violations()[0].code, "LIMIT_EXCEEDED");
    }

    #[test]
    fn violation_display_includes_code() {
        let v = FieldViolation::new("deposit", "must be positive", "POSITIVE");
        assert_eq!(v.to_string(), "deposit: must be positive [POSITIVE]");
    }

    proptest! {
        #[test]
        fn merged_outcome_counts_add_up(a in 0usize..8, b in 0usize..8) {
            let mut left = ValidationOutcome::from_violations(
                (0..a).map(|i| FieldViolation::new(format!("l{i}"), "m", "C")).collect(),
            );
            let right = ValidationOutcome::from_violations(
                (0..b).map(|i| FieldViolation::new(format!("r{i}"), "m", "C")).collect(),
            );
            left.merge(right);
            prop_assert_eq!(left.violations().len(), a + b);
            prop_assert_eq!(left.is_valid(), a + b == 0);
        }

        #[test]
        fn authorized_iff_flag_and_no_violations(flag in any::<bool>(), n in 0usize..4) {
            let outcome = AuthorizationOutcome::new(
                flag,
                (0..n).map(|i| AuthorizationViolation::new(format!("r{i}"), "m", "C")).collect(),
            );
            prop_assert_eq!(outcome.is_authorized(), flag && n == 0);
        }
    }
}
