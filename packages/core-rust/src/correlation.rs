//! Per-invocation correlation value.
//!
//! A `Correlation` is created once per dispatch and passed explicitly to every
//! stage. It is never stored in task-local or thread-local state: under a
//! cooperative scheduler one worker interleaves many invocations.

use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::intent::{unix_millis, Intent};

/// Tracing identity of one logical invocation.
///
/// Cheap to clone; the id is shared behind an `Arc<str>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correlation {
    id: Arc<str>,
    intent_type: &'static str,
    intent_id: Uuid,
    started_at_millis: u64,
}

impl Correlation {
    /// Builds the correlation for `intent`, reusing the caller-supplied
    /// correlation id when present and generating a fresh one otherwise.
    #[must_use]
    pub fn for_intent<I: Intent>(intent: &I) -> Self {
        let meta = intent.meta();
        let id: Arc<str> = match &meta.correlation_id {
            Some(id) => Arc::from(id.as_str()),
            None => Arc::from(Uuid::new_v4().to_string()),
        };
        Self {
            id,
            intent_type: I::NAME,
            intent_id: meta.id,
            started_at_millis: unix_millis(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Shared handle to the id, for holders that outlive a borrow.
    #[must_use]
    pub fn shared_id(&self) -> Arc<str> {
        Arc::clone(&self.id)
    }

    #[must_use]
    pub fn intent_type(&self) -> &'static str {
        self.intent_type
    }

    #[must_use]
    pub fn intent_id(&self) -> Uuid {
        self.intent_id
    }

    #[must_use]
    pub fn started_at_millis(&self) -> u64 {
        self.started_at_millis
    }
}

impl fmt::Display for Correlation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}
