use crate::geo::GeoConfigError;
use crate::routing::RuleError;
use thiserror::Error;

/// Switchboard setup and administration errors
///
/// Per-request failures are reported through
/// [`DispatchError`](crate::gateway::DispatchError) instead.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Rule error: {0}")]
    Rule(#[from] RuleError),

    #[error("Geo routing error: {0}")]
    Geo(#[from] GeoConfigError),

    #[error("Logging initialization failed: {0}")]
    Telemetry(String),
}

pub type Result<T> = std::result::Result<T, Error>;
