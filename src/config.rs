use crate::domain::{ModelName, ProviderName};
use crate::geo::GeoConfig;
use crate::health::SlaTarget;
use crate::routing::Rule;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::env;
use std::time::Duration;

pub use config::ConfigError;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    #[serde(default)]
    pub providers: Vec<ProviderSettings>,
    #[serde(default)]
    pub routing: RoutingSettings,
    pub sla: SlaSettings,
    pub geo: GeoConfig,
    pub concurrency: ConcurrencySettings,
    pub failover: FailoverSettings,
    pub dispatch: DispatchSettings,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

/// An upstream provider and the models it declares; no models means any
#[derive(Debug, Deserialize, Clone)]
pub struct ProviderSettings {
    pub name: ProviderName,
    #[serde(default)]
    pub models: Vec<ModelName>,
}

/// Rules seeded into the engine at startup
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RoutingSettings {
    #[serde(default)]
    pub rules: Vec<Rule>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SlaSettings {
    pub ewma_alpha: f64,
    #[serde(default)]
    pub default_target: SlaTarget,
    #[serde(default)]
    pub targets: HashMap<ProviderName, SlaTarget>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConcurrencySettings {
    /// In-flight requests allowed per tenant
    pub tenant_limit: usize,
    pub acquire_timeout_ms: u64,
    /// Backoff suggested to rejected clients
    pub retry_after_secs: u64,
}

impl ConcurrencySettings {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn retry_after(&self) -> Duration {
        Duration::from_secs(self.retry_after_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FailoverSettings {
    pub threshold: u32,
    pub cooldown_secs: u64,
}

impl FailoverSettings {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DispatchSettings {
    pub request_timeout_ms: u64,
    pub health_check_interval_secs: u64,
}

impl DispatchSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }
}

impl Settings {
    /// Load from defaults, `config/` files and `SWITCHBOARD__*` variables
    pub fn new() -> Result<Self, ConfigError> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let settings: Self = Self::defaults()?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{environment}")).required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("SWITCHBOARD").separator("__"))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Build from an in-memory TOML document layered over the defaults
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let settings: Self = Self::defaults()?
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.format", "json")?
            .set_default("sla.ewma_alpha", crate::health::DEFAULT_EWMA_ALPHA)?
            .set_default("geo.enabled", false)?
            .set_default("geo.default_region", crate::domain::GLOBAL_REGION)?
            .set_default("geo.enforce_data_residency", false)?
            .set_default("concurrency.tenant_limit", 32)?
            .set_default("concurrency.acquire_timeout_ms", 5_000)?
            .set_default("concurrency.retry_after_secs", 1)?
            .set_default("failover.threshold", 3)?
            .set_default("failover.cooldown_secs", 30)?
            .set_default("dispatch.request_timeout_ms", 60_000)?
            .set_default("dispatch.health_check_interval_secs", 30)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| Err(ConfigError::Message(message.to_string()));

        if !(self.sla.ewma_alpha > 0.0 && self.sla.ewma_alpha <= 1.0) {
            return invalid("sla.ewma_alpha must be in (0, 1]");
        }
        if self.concurrency.tenant_limit == 0 {
            return invalid("concurrency.tenant_limit must be at least 1");
        }
        if self.concurrency.acquire_timeout_ms == 0 {
            return invalid("concurrency.acquire_timeout_ms must be greater than zero");
        }
        if self.failover.threshold == 0 {
            return invalid("failover.threshold must be at least 1");
        }
        if self.dispatch.request_timeout_ms == 0 {
            return invalid("dispatch.request_timeout_ms must be greater than zero");
        }
        if self.dispatch.health_check_interval_secs == 0 {
            return invalid("dispatch.health_check_interval_secs must be greater than zero");
        }

        let mut seen = HashSet::new();
        for provider in &self.providers {
            if !seen.insert(&provider.name) {
                return Err(ConfigError::Message(format!(
                    "provider '{}' is configured more than once",
                    provider.name
                )));
            }
        }

        Ok(())
    }
}
