//! Per-request routing context

use super::identifiers::{ModelName, ProviderName, TenantId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Immutable snapshot of the routing-relevant attributes of one request
///
/// Built once per request through [`RoutingContextBuilder`] and shared
/// read-only by every routing component afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingContext {
    model: ModelName,
    provider: ProviderName,
    tenant: TenantId,
    user: Option<UserId>,
    input_tokens: u32,
    max_output_tokens: u32,
    free_tier: bool,
    tags: BTreeMap<String, String>,
    timestamp: DateTime<Utc>,
}

impl RoutingContext {
    /// Start building a context for a model, requested provider and tenant
    pub fn builder(
        model: ModelName,
        provider: ProviderName,
        tenant: TenantId,
    ) -> RoutingContextBuilder {
        RoutingContextBuilder {
            context: Self {
                model,
                provider,
                tenant,
                user: None,
                input_tokens: 0,
                max_output_tokens: 0,
                free_tier: false,
                tags: BTreeMap::new(),
                timestamp: Utc::now(),
            },
        }
    }

    pub fn model(&self) -> &ModelName {
        &self.model
    }

    /// Provider the client originally asked for
    pub fn provider(&self) -> &ProviderName {
        &self.provider
    }

    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    pub fn user(&self) -> Option<&UserId> {
        self.user.as_ref()
    }

    /// Estimated number of prompt tokens
    pub fn input_tokens(&self) -> u32 {
        self.input_tokens
    }

    pub fn max_output_tokens(&self) -> u32 {
        self.max_output_tokens
    }

    /// Upper bound of tokens this request can consume
    pub fn total_tokens(&self) -> u64 {
        u64::from(self.input_tokens) + u64::from(self.max_output_tokens)
    }

    pub fn is_free_tier(&self) -> bool {
        self.free_tier
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Builder for [`RoutingContext`]
#[derive(Debug, Clone)]
pub struct RoutingContextBuilder {
    context: RoutingContext,
}

impl RoutingContextBuilder {
    pub fn user(mut self, user: UserId) -> Self {
        self.context.user = Some(user);
        self
    }

    pub fn input_tokens(mut self, tokens: u32) -> Self {
        self.context.input_tokens = tokens;
        self
    }

    pub fn max_output_tokens(mut self, tokens: u32) -> Self {
        self.context.max_output_tokens = tokens;
        self
    }

    pub fn free_tier(mut self, free_tier: bool) -> Self {
        self.context.free_tier = free_tier;
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.tags.insert(key.into(), value.into());
        self
    }

    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.context.timestamp = timestamp;
        self
    }

    pub fn build(self) -> RoutingContext {
        self.context
    }
}
