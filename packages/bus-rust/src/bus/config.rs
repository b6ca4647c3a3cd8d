use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the registry treats a second handler for an already-bound intent type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationMode {
    /// Replace the existing binding and log a warning (hot swap).
    #[default]
    Permissive,
    /// Reject the registration with `ConfigurationError::DuplicateBinding`.
    Strict,
}

/// Retry policy for the execution stage.
///
/// Only execution failures and timeouts are retried; validation and
/// authorization failures never reach the execution stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first. `1` disables retries.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_backoff: Duration,
    /// Upper bound for any single delay.
    pub max_backoff: Duration,
    /// Growth factor applied per attempt.
    pub multiplier: f64,
    /// Randomize each delay within `[delay / 2, delay]`.
    pub jitter: bool,
}

impl RetryPolicy {
    /// A policy that executes exactly once.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Backoff before attempt number `attempt` (1-based, so `attempt >= 2`),
    /// without jitter.
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(2)).unwrap_or(i32::MAX);
        #[allow(clippy::cast_precision_loss)]
        let scaled = self.initial_backoff.as_nanos() as f64 * self.multiplier.powi(exponent);
        #[allow(clippy::cast_precision_loss)]
        let cap = self.max_backoff.as_nanos() as f64;
        if !scaled.is_finite() || scaled >= cap {
            self.max_backoff
        } else {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let nanos = scaled.max(0.0).round() as u64;
            Duration::from_nanos(nanos)
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
            multiplier: 2.0,
            jitter: false,
        }
    }
}

/// Bus-level configuration.
///
/// Controls the authorization toggle, duplicate-registration policy, execution
/// timeouts and retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// When false the authorization stage is replaced by a no-op that grants.
    pub authorization_enabled: bool,
    pub registration_mode: RegistrationMode,
    /// Execution bound for handlers that do not declare their own timeout.
    /// `None` leaves execution unbounded.
    pub default_execution_timeout: Option<Duration>,
    pub retry: RetryPolicy,
    /// Emit an `info` event for every completed dispatch.
    pub log_completions: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            authorization_enabled: true,
            registration_mode: RegistrationMode::Permissive,
            default_execution_timeout: Some(Duration::from_secs(30)),
            retry: RetryPolicy::default(),
            log_completions: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_config_defaults() {
        let config = BusConfig::default();
        assert!(config.authorization_enabled);
        assert_eq!(config.registration_mode, RegistrationMode::Permissive);
        assert_eq!(config.default_execution_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.retry.max_attempts, 1);
        assert!(config.log_completions);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(300),
            multiplier: 2.0,
            jitter: false,
        };
        assert_eq!(policy.backoff_for(2), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(4), Duration::from_millis(300));
        assert_eq!(policy.backoff_for(9), Duration::from_millis(300));
    }

    #[test]
    fn registration_mode_serializes_snake_case() {
        let json = serde_json::to_value(BusConfig::default()).unwrap();
        assert_eq!(json["registration_mode"], "permissive");
        assert_eq!(json["retry"]["max_attempts"], 1);
    }

    #[test]
    fn none_policy_runs_once() {
        assert_eq!(RetryPolicy::none().max_attempts, 1);
    }
}
