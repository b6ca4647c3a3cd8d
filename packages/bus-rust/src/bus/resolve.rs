//! Handler type resolution.
//!
//! A handler names its intent type through `Handler::Intent`, and the intent
//! names its result through `Intent::Output`, so the binding is known at compile
//! time. Resolution only checks that the declared stable name is usable and
//! records the type names for diagnostics. It runs once per handler, at
//! registration.

use std::any::type_name;

use relay_core::{Handler, Intent, IntentType};

use super::error::ConfigurationError;

/// A handler's resolved binding: which intent it serves and what it returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerBinding {
    pub intent: IntentType,
    /// Rust type name of the intent, used to explain name collisions.
    pub intent_type_name: &'static str,
    /// Rust type name of `Intent::Output`.
    pub result_type_name: &'static str,
    pub handler: &'static str,
}

/// Resolves the intent and result types bound by `handler`.
///
/// # Errors
///
/// Returns `ConfigurationError` when the intent's stable name is blank or
/// contains whitespace.
pub fn resolve<H: Handler>(handler: &H) -> Result<HandlerBinding, ConfigurationError> {
    let name = <H::Intent as Intent>::NAME;
    let handler_name = handler.name();

    if name.trim().is_empty() {
        return Err(ConfigurationError::BlankIntentName {
            handler: handler_name,
        });
    }
    if name.chars().any(char::is_whitespace) {
        return Err(ConfigurationError::InvalidIntentName {
            name,
            handler: handler_name,
        });
    }

    Ok(HandlerBinding {
        intent: IntentType::of::<H::Intent>(),
        intent_type_name: type_name::<H::Intent>(),
        result_type_name: type_name::<<H::Intent as Intent>::Output>(),
        handler: handler_name,
    })
}
