//! Intent vocabulary: the values callers submit for dispatch.
//!
//! An intent is either a command (state-changing) or a query (read-only). Each
//! intent type declares a stable name and its result type through the [`Intent`]
//! trait, so handler binding is resolved at compile time rather than discovered.

use std::any::TypeId;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constraints::ConstraintSet;
use crate::context::ExecutionContext;
use crate::correlation::Correlation;
use crate::outcome::{AuthorizationOutcome, ValidationOutcome};
use crate::traits::SideEffect;

/// Milliseconds since the Unix epoch, saturating at zero for clocks set before 1970.
#[must_use]
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

// ---------------------------------------------------------------------------
// IntentKind
// ---------------------------------------------------------------------------

/// Whether an intent changes state or only reads it.
///
/// Queries are expected to be side-effect free; the bus does not enforce this,
/// but only queries are eligible for result caching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntentKind {
    Command,
    Query,
}

impl IntentKind {
    /// Lowercase label used in logs and metric labels.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Query => "query",
        }
    }
}

// ---------------------------------------------------------------------------
// IntentMeta
// ---------------------------------------------------------------------------

/// Identity and provenance attributes shared by every intent instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentMeta {
    /// Unique id of this intent instance.
    pub id: Uuid,
    /// Creation time in milliseconds since the Unix epoch.
    pub created_at_millis: u64,
    /// Caller-supplied correlation id. When absent the bus generates one.
    pub correlation_id: Option<String>,
    /// Id of the user or system that initiated the intent.
    pub initiator_id: Option<String>,
    /// Free-form annotations. `BTreeMap` keeps log output deterministic.
    pub metadata: BTreeMap<String, String>,
}

impl IntentMeta {
    /// Creates metadata with a fresh v4 id and the current time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at_millis: unix_millis(),
            correlation_id: None,
            initiator_id: None,
            metadata: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    #[must_use]
    pub fn with_initiator(mut self, initiator_id: impl Into<String>) -> Self {
        self.initiator_id = Some(initiator_id.into());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl Default for IntentMeta {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Intent trait
// ---------------------------------------------------------------------------

/// A command or query submitted to the bus.
///
/// Implementors declare:
/// - `Output`: the result type the bound handler produces
/// - `NAME`: a stable name used for routing diagnostics, logs and metric labels.
///   Avoid deriving it from `type_name`, which changes with refactors.
/// - `KIND`: command (default) or query
///
/// Every stage hook has a permissive default, so a plain data intent only needs
/// `meta()`.
#[async_trait]
pub trait Intent: Send + Sync + 'static {
    /// Result produced by the handler bound to this intent.
    type Output: Send + Sync + 'static;

    /// Stable intent name, unique within one registry.
    const NAME: &'static str;

    /// Command or query.
    const KIND: IntentKind = IntentKind::Command;

    /// Instance identity and provenance.
    fn meta(&self) -> &IntentMeta;

    /// Declarative field constraints evaluated by the structural validation phase.
    fn constraints(&self) -> ConstraintSet {
        ConstraintSet::new()
    }

    /// Business-rule validation. Only invoked when the structural phase passed.
    async fn validate(&self, _correlation: &Correlation) -> ValidationOutcome {
        ValidationOutcome::valid()
    }

    /// Context-free authorization check.
    async fn authorize(&self, _correlation: &Correlation) -> AuthorizationOutcome {
        AuthorizationOutcome::granted()
    }

    /// Context-aware authorization check. Defaults to [`Intent::authorize`],
    /// ignoring the context.
    async fn authorize_with_context(
        &self,
        correlation: &Correlation,
        _context: &ExecutionContext,
    ) -> AuthorizationOutcome {
        self.authorize(correlation).await
    }

    /// Side effect to publish after a successful execution, if any.
    fn side_effect(&self, _output: &Self::Output) -> Option<SideEffect> {
        None
    }

    /// Cache key for query results. `None` disables caching for this instance.
    fn cache_key(&self) -> Option<String> {
        None
    }
}

// ---------------------------------------------------------------------------
// IntentType
// ---------------------------------------------------------------------------

/// Runtime descriptor of an intent type: its `TypeId`, stable name and kind.
///
/// Equality and hashing use the `TypeId` only; ordering sorts by name first so
/// listings are human readable.
#[derive(Debug, Clone, Copy)]
pub struct IntentType {
    id: TypeId,
    name: &'static str,
    kind: IntentKind,
}

impl IntentType {
    /// Descriptor for the intent type `I`.
    #[must_use]
    pub fn of<I: Intent>() -> Self {
        Self {
            id: TypeId::of::<I>(),
            name: I::NAME,
            kind: I::KIND,
        }
    }

    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn kind(&self) -> IntentKind {
        self.kind
    }
}

impl PartialEq for IntentType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for IntentType {}

impl Hash for IntentType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for IntentType {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IntentType {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name
            .cmp(other.name)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl fmt::Display for IntentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    struct Ping {
        meta: IntentMeta,
    }

    impl Intent for Ping {
        type Output = ();
        const NAME: &'static str = "Ping";
        fn meta(&self) -> &IntentMeta {
            &self.meta
        }
    }

    struct Lookup {
        meta: IntentMeta,
    }

    impl Intent for Lookup {
        type Output = u64;
        const NAME: &'static str = "Lookup";
        const KIND: IntentKind = IntentKind::Query;
        fn meta(&self) -> &IntentMeta {
            &self.meta
        }
    }

    #[test]
    fn meta_new_assigns_unique_ids() {
        let a = IntentMeta::new();
        let b = IntentMeta::new();
        assert_ne!(a.id, b.id);
        assert!(a.correlation_id.is_none());
        assert!(a.created_at_millis > 0);
    }

    #[test]
    fn meta_builder_sets_optional_fields() {
        let meta = IntentMeta::new()
            .with_correlation_id("corr-1")
            .with_initiator("user-7")
            .with_metadata("channel", "web");
        assert_eq!(meta.correlation_id.as_deref(), Some("corr-1"));
        assert_eq!(meta.initiator_id.as_deref(), Some("user-7"));
        assert_eq!(meta.metadata.get("channel").map(String::as_str), Some("web"));
    }

    #[test]
    fn intent_type_carries_name_and_kind() {
        let ping = IntentType::of::<Ping>();
        let lookup = IntentType::of::<Lookup>();
        assert_eq!(ping.name(), "Ping");
        assert_eq!(ping.kind(), IntentKind::Command);
        assert_eq!(lookup.kind(), IntentKind::Query);
        assert_ne!(ping, lookup);
        assert_eq!(ping, IntentType::of::<Ping>());
        assert_eq!(ping.to_string(), "Ping");
    }

    #[test]
    fn intent_types_sort_by_name() {
        let mut types = vec![IntentType::of::<Ping>(), IntentType::of::<Lookup>()];
        types.sort();
        let names: Vec<_> = types.iter().map(IntentType::name).collect();
        assert_eq!(names, vec!["Lookup", "Ping"]);
    }

    #[tokio::test]
    async fn default_hooks_accept_everything() {
        let ping = Ping {
            meta: IntentMeta::new(),
        };
        let correlation = Correlation::for_intent(&ping);
        assert!(ping.validate(&correlation).await.is_valid());
        assert!(ping.authorize(&correlation).await.is_authorized());
        assert!(ping
            .authorize_with_context(&correlation, &ExecutionContext::default())
            .await
            .is_authorized());
        assert!(ping.constraints().is_empty());
        assert!(ping.side_effect(&()).is_none());
        assert!(ping.cache_key().is_none());
    }
}
