//! Dispatch path composing routing, health, geo and admission control

pub mod catalog;
pub mod connector;
pub mod error_response;
pub mod health_monitor;
pub mod orchestrator;
pub mod streaming;
pub mod types;

pub use catalog::ProviderCatalog;
pub use connector::{
    ConnectorError, LedgerError, NoopLedger, ProviderCall, ProviderConnector, ProviderResponse,
    ResourceLedger, Settlement,
};
pub use error_response::{ErrorResponse, ErrorResponseExt, REQUEST_ID_HEADER};
pub use health_monitor::HealthMonitor;
pub use orchestrator::{Orchestrator, TIMEOUT_PENALTY};
pub use streaming::{relay_stream, RelayEnd, RelayReport};
pub use types::{
    DispatchError, DispatchOutcome, DispatchRequest, DispatchStats, FailureKind, RoutePlan,
    StatsSnapshot, UpstreamFailure,
};
