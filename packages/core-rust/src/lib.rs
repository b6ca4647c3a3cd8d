//! Relay core: intents, execution context, correlation, outcomes, and the
//! handler and collaborator contracts shared by the dispatch bus.

pub mod constraints;
pub mod context;
pub mod correlation;
pub mod handler;
pub mod intent;
pub mod outcome;
pub mod traits;

pub use constraints::{ConstraintSet, FieldValue, Rule, RuleEngine};
pub use context::{ExecutionContext, ExecutionContextBuilder};
pub use correlation::Correlation;
pub use handler::{Handler, HandlerResult};
pub use intent::{unix_millis, Intent, IntentKind, IntentMeta, IntentType};
pub use outcome::{
    AuthorizationOutcome, AuthorizationViolation, FieldViolation, ValidationOutcome,
    ValidationPhase,
};
pub use traits::{
    CachedValue, ConstraintEngine, ConstraintTarget, IntentDescriptor, ResultCache, SideEffect,
    SideEffectPublisher, TelemetrySink,
};

