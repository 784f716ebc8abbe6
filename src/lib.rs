//! Switchboard - request routing and admission control for a multi-provider
//! AI completion gateway
//!
//! For each request the gateway filters providers by data-residency region,
//! applies operator routing rules, ranks the remaining candidates by live SLA
//! health and admits the call through per-tenant concurrency limits and
//! in-flight deduplication.

pub mod concurrency;
pub mod config;
pub mod domain;
pub mod error;
pub mod failover;
pub mod gateway;
pub mod geo;
pub mod health;
pub mod routing;
pub mod telemetry;

pub use config::Settings;
pub use error::{Error, Result};
pub use gateway::{DispatchError, DispatchOutcome, DispatchRequest, Orchestrator};
