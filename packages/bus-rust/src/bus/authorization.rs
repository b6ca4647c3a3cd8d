//! Authorization stage.
//!
//! The gate is chosen once, when the bus is composed: [`IntentAuthorization`]
//! asks the intent itself, [`DisabledAuthorization`] grants everything.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use relay_core::{
    AuthorizationOutcome, AuthorizationViolation, Correlation, ExecutionContext, Intent,
};
use tracing::debug;

use super::error::{AuthorizationError, IntentTrace};

// ---------------------------------------------------------------------------
// Authorize (object-safe view of an intent)
// ---------------------------------------------------------------------------

/// Object-safe authorization view implemented for every [`Intent`], so gates
/// can be stored as trait objects.
#[async_trait]
pub trait Authorize: Send + Sync {
    fn intent_name(&self) -> &'static str;

    async fn check_access(
        &self,
        correlation: &Correlation,
        context: &ExecutionContext,
    ) -> AuthorizationOutcome;
}

#[async_trait]
impl<I: Intent> Authorize for I {
    fn intent_name(&self) -> &'static str {
        I::NAME
    }

    async fn check_access(
        &self,
        correlation: &Correlation,
        context: &ExecutionContext,
    ) -> AuthorizationOutcome {
        self.authorize_with_context(correlation, context).await
    }
}

// ---------------------------------------------------------------------------
// Gates
// ---------------------------------------------------------------------------

/// Decides whether an intent may execute.
#[async_trait]
pub trait AuthorizationGate: Send + Sync {
    async fn authorize(
        &self,
        intent: &dyn Authorize,
        correlation: &Correlation,
        context: &ExecutionContext,
    ) -> AuthorizationOutcome;

    fn is_enabled(&self) -> bool {
        true
    }
}

/// Delegates to the intent's own `authorize_with_context`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntentAuthorization;

#[async_trait]
impl AuthorizationGate for IntentAuthorization {
    async fn authorize(
        &self,
        intent: &dyn Authorize,
        correlation: &Correlation,
        context: &ExecutionContext,
    ) -> AuthorizationOutcome {
        intent.check_access(correlation, context).await
    }
}

/// Grants every intent without consulting it.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledAuthorization;

#[async_trait]
impl AuthorizationGate for DisabledAuthorization {
    async fn authorize(
        &self,
        _intent: &dyn Authorize,
        _correlation: &Correlation,
        _context: &ExecutionContext,
    ) -> AuthorizationOutcome {
        AuthorizationOutcome::granted()
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// AuthorizationStage
// ---------------------------------------------------------------------------

/// Authorization stage of the dispatch pipeline.
#[derive(Clone)]
pub struct AuthorizationStage {
    gate: Arc<dyn AuthorizationGate>,
}

impl AuthorizationStage {
    #[must_use]
    pub fn new(gate: Arc<dyn AuthorizationGate>) -> Self {
        Self { gate }
    }

    /// Stage backed by [`IntentAuthorization`] or, when `enabled` is false, by
    /// [`DisabledAuthorization`].
    #[must_use]
    pub fn from_toggle(enabled: bool) -> Self {
        if enabled {
            Self::new(Arc::new(IntentAuthorization))
        } else {
            Self::new(Arc::new(DisabledAuthorization))
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.gate.is_enabled()
    }

    /// # Errors
    ///
    /// Returns `AuthorizationError` when the gate denies the intent. A denial
    /// without violations is reported as a single `ACCESS_DENIED` violation.
    pub async fn authorize<I: Intent>(
        &self,
        intent: &I,
        correlation: &Correlation,
        context: &ExecutionContext,
        started: Instant,
    ) -> Result<(), AuthorizationError> {
        let outcome = self.gate.authorize(intent, correlation, context).await;
        if outcome.is_authorized() {
            return Ok(());
        }

        let mut violations = outcome.into_violations();
        if violations.is_empty() {
            violations.push(AuthorizationViolation::new(
                I::NAME,
                "access denied",
                "ACCESS_DENIED",
            ));
        }
        debug!(
            intent = I::NAME,
            correlation_id = correlation.id(),
            codes = ?violations.iter().map(|v| v.code.as_str()).collect::<Vec<_>>(),
            "authorization denied intent"
        );
        Err(AuthorizationError {
            violations,
            trace: IntentTrace::capture(correlation, started),
        })
    }
}

#[cfg(test)]
mod tests {
    use relay_core::IntentMeta;

    use super::*;

    /// Only tenant "acme" may purge.
    struct Purge {
        meta: IntentMeta,
    }

    #[async_trait]
    impl Intent for Purge {
        type Output = ();
        const NAME: &'static str = "Purge";

        fn meta(&self) -> &IntentMeta {
            &self.meta
        }

        async fn authorize_with_context(
            &self,
            _correlation: &Correlation,
            context: &ExecutionContext,
        ) -> AuthorizationOutcome {
            if context.tenant_id() == Some("acme") {
                AuthorizationOutcome::granted()
            } else {
                AuthorizationOutcome::denied("tenant", "tenant may not purge", "TENANT_FORBIDDEN")
            }
        }
    }

    /// Denies with a bare flag and no violations.
    struct Locked {
        meta: IntentMeta,
    }

    #[async_trait]
    impl Intent for Locked {
        type Output = ();
        const NAME: &'static str = "Locked";

        fn meta(&self) -> &IntentMeta {
            &self.meta
        }

        async fn authorize(&self, _correlation: &Correlation) -> AuthorizationOutcome {
            AuthorizationOutcome::new(false, Vec::new())
        }
    }

    fn purge() -> Purge {
        Purge {
            meta: IntentMeta::new(),
        }
    }

    #[tokio::test]
    async fn context_aware_authorization_is_consulted() {
        let stage = AuthorizationStage::from_toggle(true);
        let intent = purge();
        let correlation = Correlation::for_intent(&intent);

        let acme = ExecutionContext::builder().tenant_id("acme").build();
        stage
            .authorize(&intent, &correlation, &acme, Instant::now())
            .await
            .unwrap();

        let other = ExecutionContext::builder().tenant_id("globex").build();
        let err = stage
            .authorize(&intent, &correlation, &other, Instant::now())
            .await
            .unwrap_err();
        assert_eq!(err.codes(), vec!["TENANT_FORBIDDEN"]);
        assert_eq!(err.trace.intent_type, "Purge");
    }

    #[tokio::test]
    async fn disabled_gate_grants_everything() {
        let stage = AuthorizationStage::from_toggle(false);
        assert!(!stage.is_enabled());
        let intent = purge();
        stage
            .authorize(
                &intent,
                &Correlation::for_intent(&intent),
                &ExecutionContext::default(),
                Instant::now(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn bare_denial_gets_a_default_violation() {
        let intent = Locked {
            meta: IntentMeta::new(),
        };
        let err = AuthorizationStage::from_toggle(true)
            .authorize(
                &intent,
                &Correlation::for_intent(&intent),
                &ExecutionContext::default(),
                Instant::now(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.codes(), vec!["ACCESS_DENIED"]);
        assert_eq!(err.violations[0].resource, "Locked");
    }
}
