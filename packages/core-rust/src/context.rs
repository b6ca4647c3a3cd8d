//! Per-request execution context.
//!
//! Built once per external request by the caller and shared read-only with every
//! pipeline stage. Nothing inside the bus mutates it.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::intent::unix_millis;

/// Cross-cutting request metadata: identity, request tracking, feature flags,
/// and free-form properties.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    user_id: Option<String>,
    tenant_id: Option<String>,
    organization_id: Option<String>,
    session_id: Option<String>,
    request_id: Option<String>,
    source: Option<String>,
    client_ip: Option<String>,
    user_agent: Option<String>,
    created_at_millis: u64,
    feature_flags: BTreeMap<String, bool>,
    properties: BTreeMap<String, serde_json::Value>,
}

impl ExecutionContext {
    #[must_use]
    pub fn builder() -> ExecutionContextBuilder {
        ExecutionContextBuilder::default()
    }

    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    #[must_use]
    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    #[must_use]
    pub fn organization_id(&self) -> Option<&str> {
        self.organization_id.as_deref()
    }

    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    #[must_use]
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    #[must_use]
    pub fn client_ip(&self) -> Option<&str> {
        self.client_ip.as_deref()
    }

    #[must_use]
    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    /// Creation time in milliseconds since the Unix epoch. Zero for the default
    /// context.
    #[must_use]
    pub fn created_at_millis(&self) -> u64 {
        self.created_at_millis
    }

    /// Returns `true` when a user id is present.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }

    /// Flag value, or `default` when the flag is not set.
    #[must_use]
    pub fn is_feature_enabled(&self, name: &str, default: bool) -> bool {
        self.feature_flags.get(name).copied().unwrap_or(default)
    }

    #[must_use]
    pub fn feature_flags(&self) -> &BTreeMap<String, bool> {
        &self.feature_flags
    }

    /// Raw property value.
    #[must_use]
    pub fn property_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.properties.get(key)
    }

    /// Property deserialized into `T`. `None` when absent or of another shape.
    #[must_use]
    pub fn property<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.properties
            .get(key)
            .and_then(|value| T::deserialize(value).ok())
    }

    /// Typed property with a fallback.
    #[must_use]
    pub fn property_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.property(key).unwrap_or(default)
    }

    /// Builder seeded with this context, for deriving a modified copy.
    #[must_use]
    pub fn to_builder(&self) -> ExecutionContextBuilder {
        ExecutionContextBuilder {
            inner: self.clone(),
            created_at_millis: Some(self.created_at_millis),
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for [`ExecutionContext`]. `build()` stamps the creation time unless
/// one was set explicitly.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContextBuilder {
    inner: ExecutionContext,
    created_at_millis: Option<u64>,
}

impl ExecutionContextBuilder {
    #[must_use]
    pub fn user_id(mut self, value: impl Into<String>) -> Self {
        self.inner.user_id = Some(value.into());
        self
    }

    #[must_use]
    pub fn tenant_id(mut self, value: impl Into<String>) -> Self {
        self.inner.tenant_id = Some(value.into());
        self
    }

    #[must_use]
    pub fn organization_id(mut self, value: impl Into<String>) -> Self {
        self.inner.organization_id = Some(value.into());
        self
    }

    #[must_use]
    pub fn session_id(mut self, value: impl Into<String>) -> Self {
        self.inner.session_id = Some(value.into());
        self
    }

    #[must_use]
    pub fn request_id(mut self, value: impl Into<String>) -> Self {
        self.inner.request_id = Some(value.into());
        self
    }

    #[must_use]
    pub fn source(mut self, value: impl Into<String>) -> Self {
        self.inner.source = Some(value.into());
        self
    }

    #[must_use]
    pub fn client_ip(mut self, value: impl Into<String>) -> Self {
        self.inner.client_ip = Some(value.into());
        self
    }

    #[must_use]
    pub fn user_agent(mut self, value: impl Into<String>) -> Self {
        self.inner.user_agent = Some(value.into());
        self
    }

    #[must_use]
    pub fn created_at_millis(mut self, millis: u64) -> Self {
        self.created_at_millis = Some(millis);
        self
    }

    #[must_use]
    pub fn feature(mut self, name: impl Into<String>, enabled: bool) -> Self {
        self.inner.feature_flags.insert(name.into(), enabled);
        self
    }

    /// Adds a property. Values that fail to serialize are stored as `null`.
    #[must_use]
    pub fn property(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
        self.inner.properties.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn build(self) -> ExecutionContext {
        let mut ctx = self.inner;
        ctx.created_at_millis = self.created_at_millis.unwrap_or_else(unix_millis);
        ctx
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
