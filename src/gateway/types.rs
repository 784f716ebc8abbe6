use super::connector::{ConnectorError, LedgerError, ProviderResponse};
use crate::concurrency::AtomicCounter;
use crate::domain::{ApiKey, ModelName, ProviderName, Region, RoutingContext, RuleId, TenantId};
use crate::geo::GeoRoutingDecision;
use crate::health::ProviderScore;
use crate::routing::RoutingDecision;
use bytes::Bytes;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// A request as handed over by the transport layer
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub request_id: Uuid,
    pub context: RoutingContext,
    /// Client address as seen by the edge, optionally with a port
    pub client_ip: String,
    pub api_key: ApiKey,
    pub payload: Bytes,
    /// Shared resource serialized around the ledger; defaults to the tenant
    pub resource_key: Option<String>,
}

impl DispatchRequest {
    pub fn new(
        context: RoutingContext,
        client_ip: impl Into<String>,
        api_key: ApiKey,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            request_id: Uuid::now_v7(),
            context,
            client_ip: client_ip.into(),
            api_key,
            payload: payload.into(),
            resource_key: None,
        }
    }

    pub fn with_resource_key(mut self, key: impl Into<String>) -> Self {
        self.resource_key = Some(key.into());
        self
    }

    pub fn resource_key(&self) -> String {
        self.resource_key
            .clone()
            .unwrap_or_else(|| self.context.tenant().to_string())
    }
}

/// Routing half of a dispatch: where the request would go and why
#[derive(Debug, Clone)]
pub struct RoutePlan {
    pub geo: GeoRoutingDecision,
    pub decision: RoutingDecision,
    pub model: ModelName,
    pub provider: ProviderName,
    /// Candidates in attempt order, `provider` first
    pub ranked: Vec<ProviderName>,
    pub score: Option<ProviderScore>,
}

impl RoutePlan {
    pub fn region(&self) -> &Region {
        &self.geo.region
    }

    /// Providers that may be tried, bounded by the rule's retry budget
    pub fn attempts(&self) -> impl Iterator<Item = &ProviderName> {
        let budget = usize::try_from(self.decision.max_retries)
            .unwrap_or(usize::MAX)
            .saturating_add(1);
        self.ranked.iter().take(budget)
    }
}

/// Successful result of a dispatch
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    /// ID of the request this outcome answers, even when deduplicated
    pub request_id: Uuid,
    /// Provider response, including 4xx statuses
    pub response: ProviderResponse,
    /// Provider that produced the response
    pub provider: ProviderName,
    /// Model actually requested from the provider
    pub model: ModelName,
    /// Rule decision the route was planned from
    pub decision: RoutingDecision,
    /// SLA score of the serving provider at planning time, when it was the
    /// planned first choice
    pub score: Option<f64>,
    /// Served from another in-flight request's result
    pub deduplicated: bool,
    /// Providers tried, including the one that answered
    pub attempts: u32,
    /// Time from dispatch start to the response
    pub latency: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Upstream,
    Timeout,
    Ledger,
    Abandoned,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Upstream => "upstream",
            Self::Timeout => "timeout",
            Self::Ledger => "ledger",
            Self::Abandoned => "abandoned",
        };
        f.write_str(name)
    }
}

/// Failure of the call itself, shared verbatim with deduplicated waiters
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} failure: {message}")]
pub struct UpstreamFailure {
    pub kind: FailureKind,
    pub message: String,
    pub provider: Option<ProviderName>,
    /// Upstream HTTP status when one was received
    pub status: Option<u16>,
}

impl UpstreamFailure {
    pub fn from_status(provider: &ProviderName, status: u16) -> Self {
        Self {
            kind: FailureKind::Upstream,
            message: format!("provider {provider} returned status {status}"),
            provider: Some(provider.clone()),
            status: Some(status),
        }
    }

    pub fn connector(provider: &ProviderName, error: &ConnectorError) -> Self {
        Self {
            kind: FailureKind::Upstream,
            message: error.to_string(),
            provider: Some(provider.clone()),
            status: None,
        }
    }

    pub fn timeout(provider: Option<&ProviderName>, after: Duration) -> Self {
        Self {
            kind: FailureKind::Timeout,
            message: format!("request deadline of {after:?} exceeded"),
            provider: provider.cloned(),
            status: None,
        }
    }

    pub fn ledger(error: &LedgerError) -> Self {
        Self {
            kind: FailureKind::Ledger,
            message: error.to_string(),
            provider: None,
            status: None,
        }
    }

    pub fn abandoned() -> Self {
        Self {
            kind: FailureKind::Abandoned,
            message: "identical in-flight request was cancelled".to_string(),
            provider: None,
            status: None,
        }
    }
}

/// Client-visible reasons a dispatch did not produce a response
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    #[error("no provider is certified to serve region {region}")]
    ResidencyViolation { region: Region },

    #[error("request blocked: {reason}")]
    Blocked {
        rule_id: Option<RuleId>,
        reason: String,
    },

    #[error("too many concurrent requests for tenant {tenant}")]
    ConcurrencyExhausted {
        tenant: TenantId,
        retry_after: Duration,
    },

    #[error("no provider available for model {model}")]
    NoProvider { model: ModelName },

    #[error(transparent)]
    Failed(#[from] UpstreamFailure),
}

/// Dispatch counters
#[derive(Debug, Default)]
pub struct DispatchStats {
    pub(crate) dispatched: AtomicCounter,
    pub(crate) succeeded: AtomicCounter,
    pub(crate) failed: AtomicCounter,
    pub(crate) deduplicated: AtomicCounter,
    pub(crate) retried: AtomicCounter,
    pub(crate) blocked: AtomicCounter,
    pub(crate) residency_violations: AtomicCounter,
    pub(crate) concurrency_rejections: AtomicCounter,
}

impl DispatchStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            dispatched: self.dispatched.get(),
            succeeded: self.succeeded.get(),
            failed: self.failed.get(),
            deduplicated: self.deduplicated.get(),
            retried: self.retried.get(),
            blocked: self.blocked.get(),
            residency_violations: self.residency_violations.get(),
            concurrency_rejections: self.concurrency_rejections.get(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub dispatched: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub deduplicated: u64,
    pub retried: u64,
    pub blocked: u64,
    pub residency_violations: u64,
    pub concurrency_rejections: u64,
}
