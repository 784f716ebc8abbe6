//! Seams to the transport layer and the external resource ledger

use crate::domain::{ModelName, ProviderName, RoutingContext};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// One upstream call chosen by the orchestrator
#[derive(Debug, Clone)]
pub struct ProviderCall {
    /// Request ID for correlation with the client request
    pub request_id: Uuid,
    /// Provider selected for this attempt
    pub provider: ProviderName,
    /// Model to request, possibly rewritten by a routing rule
    pub model: ModelName,
    pub context: RoutingContext,
    /// Request body forwarded untouched
    pub payload: Bytes,
}

/// Response returned by a provider, relayed to the client as is
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderResponse {
    /// Upstream HTTP status; 5xx counts against the provider
    pub status: u16,
    pub body: Bytes,
}

impl ProviderResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::new(200, body)
    }

    /// 5xx responses count against the provider's health
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectorError {
    #[error("connection to {provider} failed: {message}")]
    Connection {
        provider: ProviderName,
        message: String,
    },

    #[error("provider {provider} rejected the request: {message}")]
    Rejected {
        provider: ProviderName,
        message: String,
    },
}

/// Performs the actual network call to a provider
#[async_trait]
pub trait ProviderConnector: Send + Sync {
    async fn complete(&self, call: &ProviderCall) -> Result<ProviderResponse, ConnectorError>;

    /// Active probe used by the background health monitor
    async fn health_check(&self, _provider: &ProviderName) -> bool {
        true
    }
}

/// What the ledger learns once a call has finished
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub request_id: Uuid,
    /// Provider that served or last failed the call; `None` if none was reached
    pub provider: Option<ProviderName>,
    pub model: ModelName,
    /// Whether the client received a provider response
    pub success: bool,
    /// Tokens held at reservation time (input plus maximum output)
    pub reserved_tokens: u64,
    /// Wall time from dispatch start to the end of the provider call
    pub latency: Duration,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("reservation rejected: {0}")]
    Rejected(String),

    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// External shared resource (credit balance, quota) mutated around each call
///
/// Calls for the same resource key are serialized by the orchestrator, so an
/// implementation may read-modify-write without its own locking.
#[async_trait]
pub trait ResourceLedger: Send + Sync {
    async fn reserve(&self, key: &str, context: &RoutingContext) -> Result<(), LedgerError>;

    async fn settle(&self, key: &str, settlement: &Settlement) -> Result<(), LedgerError>;
}

/// Ledger that accepts everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLedger;

#[async_trait]
impl ResourceLedger for NoopLedger {
    async fn reserve(&self, _key: &str, _context: &RoutingContext) -> Result<(), LedgerError> {
        Ok(())
    }

    async fn settle(&self, _key: &str, _settlement: &Settlement) -> Result<(), LedgerError> {
        Ok(())
    }
}
