//! Declarative field constraints and the default rule engine.
//!
//! Intents describe their structural rules with a [`ConstraintSet`]; a
//! [`ConstraintEngine`](crate::traits::ConstraintEngine) evaluates them. The
//! shipped [`RuleEngine`] lets a missing value pass every rule except
//! `Required` and `NotBlank`, and evaluates every constraint so all violations
//! are reported at once.

use async_trait::async_trait;
use regex::Regex;
use tracing::trace;

use crate::outcome::{FieldViolation, ValidationOutcome};
use crate::traits::{ConstraintEngine, ConstraintTarget};

// ---------------------------------------------------------------------------
// FieldValue
// ---------------------------------------------------------------------------

/// Snapshot of a field value handed to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Missing,
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl FieldValue {
    #[allow(clippy::cast_precision_loss)]
    fn as_number(&self) -> Option<f64> {
        match self {
            Self::Int(n) => Some(*n as f64),
            Self::Float(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&String> for FieldValue {
    fn from(value: &String) -> Self {
        Self::Text(value.clone())
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Missing, Into::into)
    }
}

// ---------------------------------------------------------------------------
// Rule / FieldConstraint
// ---------------------------------------------------------------------------

/// A single declarative rule.
#[derive(Debug, Clone)]
pub enum Rule {
    Required,
    NotBlank,
    Positive,
    NonNegative,
    /// Inclusive numeric range.
    Range { min: f64, max: f64 },
    /// Inclusive character-count range for text.
    Length { min: usize, max: usize },
    Pattern(Regex),
    /// Result of a caller-evaluated predicate, reported under `code`.
    Check { passed: bool, code: String },
}

impl Rule {
    /// Machine-readable violation code.
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            Self::Required => "REQUIRED",
            Self::NotBlank => "NOT_BLANK",
            Self::Positive => "POSITIVE",
            Self::NonNegative => "NON_NEGATIVE",
            Self::Range { .. } => "OUT_OF_RANGE",
            Self::Length { .. } => "LENGTH",
            Self::Pattern(_) => "PATTERN",
            Self::Check { code, .. } => code,
        }
    }

    fn default_message(&self) -> String {
        match self {
            Self::Required => "is required".to_string(),
            Self::NotBlank => "must not be blank".to_string(),
            Self::Positive => "must be positive".to_string(),
            Self::NonNegative => "must not be negative".to_string(),
            Self::Range { min, max } => format!("must be between {min} and {max}"),
            Self::Length { min, max } => format!("length must be between {min} and {max}"),
            Self::Pattern(re) => format!("must match {}", re.as_str()),
            Self::Check { .. } => "is invalid".to_string(),
        }
    }
}

/// A rule bound to one field value.
#[derive(Debug, Clone)]
pub struct FieldConstraint {
    pub field: String,
    pub value: FieldValue,
    pub rule: Rule,
    /// Overrides the rule's default message.
    pub message: Option<String>,
}

// ---------------------------------------------------------------------------
// ConstraintSet
// ---------------------------------------------------------------------------

/// Ordered list of field constraints declared by an intent.
///
/// ```
/// use relay_core::constraints::ConstraintSet;
///
/// let constraints = ConstraintSet::new()
///     .not_blank("name", "")
///     .message("name required")
///     .positive("deposit", -5);
/// assert_eq!(constraints.len(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConstraintSet {
    constraints: Vec<FieldConstraint>,
}

impl ConstraintSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a constraint for `field`.
    #[must_use]
    pub fn rule(mut self, field: impl Into<String>, value: impl Into<FieldValue>, rule: Rule) -> Self {
        self.constraints.push(FieldConstraint {
            field: field.into(),
            value: value.into(),
            rule,
            message: None,
        });
        self
    }

    /// Replaces the message of the most recently added constraint.
    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        if let Some(last) = self.constraints.last_mut() {
            last.message = Some(message.into());
        }
        self
    }

    #[must_use]
    pub fn required(self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.rule(field, value, Rule::Required)
    }

    #[must_use]
    pub fn not_blank(self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.rule(field, value, Rule::NotBlank)
    }

    #[must_use]
    pub fn positive(self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.rule(field, value, Rule::Positive)
    }

    #[must_use]
    pub fn non_negative(self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.rule(field, value, Rule::NonNegative)
    }

    #[must_use]
    pub fn range(
        self,
        field: impl Into<String>,
        value: impl Into<FieldValue>,
        min: f64,
        max: f64,
    ) -> Self {
        self.rule(field, value, Rule::Range { min, max })
    }

    #[must_use]
    pub fn length(
        self,
        field: impl Into<String>,
        value: impl Into<FieldValue>,
        min: usize,
        max: usize,
    ) -> Self {
        self.rule(field, value, Rule::Length { min, max })
    }

    #[must_use]
    pub fn pattern(
        self,
        field: impl Into<String>,
        value: impl Into<FieldValue>,
        pattern: &Regex,
    ) -> Self {
        self.rule(field, value, Rule::Pattern(pattern.clone()))
    }

    /// Records a predicate the caller already evaluated.
    #[must_use]
    pub fn check(
        self,
        field: impl Into<String>,
        passed: bool,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        self.rule(
            field,
            FieldValue::Bool(passed),
            Rule::Check {
                passed,
                code: code.into(),
            },
        )
        .message(message)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldConstraint> {
        self.constraints.iter()
    }
}

// ---------------------------------------------------------------------------
// RuleEngine
// ---------------------------------------------------------------------------

/// Default constraint engine: evaluates every constraint of a set in order.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleEngine;

impl RuleEngine {
    /// Evaluates `constraints`, collecting every violation.
    #[must_use]
    pub fn evaluate(&self, constraints: &ConstraintSet) -> ValidationOutcome {
        let mut outcome = ValidationOutcome::valid();
        for constraint in constraints.iter() {
            if let Some(code) = violation_code(&constraint.rule, &constraint.value) {
                let message = constraint
                    .message
                    .clone()
                    .unwrap_or_else(|| constraint.rule.default_message());
                trace!(field = %constraint.field, code = %code, "constraint violated");
                outcome.push(FieldViolation::new(constraint.field.clone(), message, code));
            }
        }
        outcome
    }
}

#[async_trait]
impl ConstraintEngine for RuleEngine {
    async fn validate(&self, target: &ConstraintTarget<'_>) -> ValidationOutcome {
        self.evaluate(target.constraints())
    }
}

/// Returns the violation code when `value` breaks `rule`.
fn violation_code(rule: &Rule, value: &FieldValue) -> Option<String> {
    let passed = match (rule, value) {
        (Rule::Check { passed, .. }, _) => *passed,
        (Rule::Required, v) => *v != FieldValue::Missing,
        (Rule::NotBlank, FieldValue::Text(s)) => !s.trim().is_empty(),
        (Rule::NotBlank, FieldValue::Missing) => false,
        (_, FieldValue::Missing) => true,
        (Rule::Positive, v) => return numeric(rule, v, |n| n > 0.0),
        (Rule::NonNegative, v) => return numeric(rule, v, |n| n >= 0.0),
        (Rule::Range { min, max }, v) => return numeric(rule, v, |n| n >= *min && n <= *max),
        (Rule::Length { min, max }, FieldValue::Text(s)) => {
            let len = s.chars().count();
            len >= *min && len <= *max
        }
        (Rule::Pattern(re), FieldValue::Text(s)) => re.is_match(s),
        _ => return Some("TYPE_MISMATCH".to_string()),
    };
    (!passed).then(|| rule.code().to_string())
}

fn numeric(rule: &Rule, value: &FieldValue, test: impl Fn(f64) -> bool) -> Option<String> {
    match value.as_number() {
        Some(n) if test(n) => None,
        Some(_) => Some(rule.code().to_string()),
        None => Some("TYPE_MISMATCH".to_string()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::intent::{Intent, IntentMeta};

    #[test]
    fn reports_every_violation_in_order() {
        let set = ConstraintSet::new()
            .not_blank("name", "  ")
            .message("name required")
            .positive("deposit", -5)
            .message("deposit must be positive");
        let outcome = RuleEngine.evaluate(&set);
        assert_eq!(outcome.fields(), vec!["name", "deposit"]);
        assert_eq!(outcome.violations()[0].message, "name required");
        assert_eq!(outcome.violations()[0].code, "NOT_BLANK");
        assert_eq!(outcome.violations()[1].code, "POSITIVE");
    }

    #[test]
    fn missing_values_only_fail_required_and_not_blank() {
        let none: Option<i64> = None;
        let set = ConstraintSet::new()
            .positive("a", none)
            .range("b", none, 0.0, 1.0)
            .required("c", none)
            .not_blank("d", Option::<String>::None);
        let outcome = RuleEngine.evaluate(&set);
        assert_eq!(outcome.fields(), vec!["c", "d"]);
    }

    #[test]
    fn range_length_and_pattern() {
        let re = Regex::new(r"^A\d+$").unwrap();
        let set = ConstraintSet::new()
            .range("pct", 150, 0.0, 100.0)
            .length("code", "toolong", 1, 3)
            .pattern("account", "A1", &re)
            .pattern("other", "B1", &re);
        let outcome = RuleEngine.evaluate(&set);
        let codes: Vec<_> = outcome.violations().iter().map(|v| v.code.as_str()).collect();
        assert_eq!(codes, vec!["OUT_OF_RANGE", "LENGTH", "PATTERN"]);
    }

    #[test]
    fn type_mismatch_is_reported() {
        let set = ConstraintSet::new().positive("amount", "ten");
        let outcome = RuleEngine.evaluate(&set);
        assert_eq!(outcome.violations()[0].code, "TYPE_MISMATCH");
    }

    #[test]
    fn check_uses_caller_code_and_message() {
        let set = ConstraintSet::new().check("currency", false, "UNSUPPORTED", "EUR only");
        let outcome = RuleEngine.evaluate(&set);
        assert_eq!(outcome.violations()[0].code, "UNSUPPORTED");
        assert_eq!(outcome.violations()[0].message, "EUR only");
    }

    struct Label {
        meta: IntentMeta,
        text: String,
    }

    impl Intent for Label {
        type Output = ();
        const NAME: &'static str = "Label";

        fn meta(&self) -> &IntentMeta {
            &self.meta
        }

        fn constraints(&self) -> ConstraintSet {
            ConstraintSet::new().not_blank("text", &self.text)
        }
    }

    #[tokio::test]
    async fn engine_trait_evaluates_the_declared_constraints() {
        let engine: &dyn ConstraintEngine = &RuleEngine;
        let ok = Label {
            meta: IntentMeta::new(),
            text: "ok".to_string(),
        };
        assert!(engine.validate(&ConstraintTarget::new(&ok)).await.is_valid());

        let blank = Label {
            meta: IntentMeta::new(),
            text: " ".to_string(),
        };
        let target = ConstraintTarget::new(&blank);
        assert_eq!(target.intent_type().name(), "Label");
        assert_eq!(target.downcast::<Label>().map(|l| l.text.as_str()), Some(" "));
        assert_eq!(engine.validate(&target).await.fields(), vec!["text"]);
    }

    proptest! {
        #[test]
        fn non_blank_text_passes(s in "[a-z]{1,16}") {
            let outcome = RuleEngine.evaluate(&ConstraintSet::new().not_blank("f", s.as_str()));
            prop_assert!(outcome.is_valid());
        }

        #[test]
        fn positive_matches_sign(n in any::<i64>()) {
            let outcome = RuleEngine.evaluate(&ConstraintSet::new().positive("f", n));
            prop_assert_eq!(outcome.is_valid(), n > 0);
        }
    }
}
