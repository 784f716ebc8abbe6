//! Region classification and data-residency filtering

use super::cidr::{parse_client_ip, Cidr, CidrParseError};
use crate::domain::{ProviderName, Region};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GeoConfigError {
    #[error("invalid CIDR '{cidr}' for region {region}: {source}")]
    InvalidCidr {
        cidr: String,
        region: Region,
        #[source]
        source: CidrParseError,
    },
}

/// Maps a network prefix to a region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoRule {
    pub cidr: String,
    pub region: Region,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Regions a provider is certified to serve; empty means everywhere
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRegion {
    pub provider: ProviderName,
    #[serde(default)]
    pub regions: Vec<Region>,
}

/// Geo routing configuration, hot-reloadable through [`GeoRouter::update_config`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoConfig {
    #[serde(default)]
    pub enabled: bool,
    pub default_region: Region,
    #[serde(default)]
    pub enforce_data_residency: bool,
    #[serde(default)]
    pub rules: Vec<GeoRule>,
    #[serde(default)]
    pub provider_regions: Vec<ProviderRegion>,
}

/// Region decision for one request, kept for compliance auditing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeoRoutingDecision {
    pub client_ip: String,
    pub region: Region,
    /// `None` when residency enforcement left no eligible provider
    pub allowed: Option<Vec<ProviderName>>,
    pub filtered_out: Vec<ProviderName>,
    pub enforced: bool,
}

impl GeoRoutingDecision {
    pub fn is_residency_violation(&self) -> bool {
        self.allowed.is_none()
    }
}

/// Parsed, immutable routing state swapped in as a whole on reload
#[derive(Debug)]
struct GeoState {
    enabled: bool,
    default_region: Region,
    enforce: bool,
    rules: Vec<(Cidr, Region)>,
    provider_regions: HashMap<ProviderName, Vec<Region>>,
}

impl GeoState {
    fn build(config: &GeoConfig) -> Result<Self, GeoConfigError> {
        let rules = config
            .rules
            .iter()
            .map(|rule| {
                rule.cidr
                    .parse::<Cidr>()
                    .map(|cidr| (cidr, rule.region.clone()))
                    .map_err(|source| GeoConfigError::InvalidCidr {
                        cidr: rule.cidr.clone(),
                        region: rule.region.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let provider_regions = config
            .provider_regions
            .iter()
            .map(|entry| (entry.provider.clone(), entry.regions.clone()))
            .collect();

        Ok(Self {
            enabled: config.enabled,
            default_region: config.default_region.clone(),
            enforce: config.enforce_data_residency,
            rules,
            provider_regions,
        })
    }

    fn resolve_region(&self, client_ip: &str) -> Region {
        if !self.enabled {
            return self.default_region.clone();
        }
        let Some(ip) = parse_client_ip(client_ip) else {
            debug!(client_ip = %client_ip, "Unparseable client address, using default region");
            return self.default_region.clone();
        };
        self.rules
            .iter()
            .find(|(cidr, _)| cidr.contains(&ip))
            .map(|(_, region)| region.clone())
            .unwrap_or_else(|| self.default_region.clone())
    }

    fn serves(&self, provider: &ProviderName, region: &Region) -> bool {
        match self.provider_regions.get(provider) {
            Some(regions) => {
                regions.is_empty() || regions.iter().any(|r| r == region || r.is_global())
            }
            None => !self.enforce,
        }
    }

    fn filter_providers(
        &self,
        candidates: &[ProviderName],
        region: &Region,
    ) -> Option<Vec<ProviderName>> {
        if !self.enabled || region.is_global() {
            return Some(candidates.to_vec());
        }

        let allowed: Vec<ProviderName> = candidates
            .iter()
            .filter(|provider| self.serves(provider, region))
            .cloned()
            .collect();

        if !allowed.is_empty() {
            return Some(allowed);
        }

        if self.enforce {
            warn!(
                region = %region,
                candidates = candidates.len(),
                "Data residency violation: no provider is certified for region"
            );
            None
        } else {
            debug!(region = %region, "No provider serves region, falling back to all candidates");
            Some(candidates.to_vec())
        }
    }
}

/// Classifies client addresses into regions and filters providers by residency
#[derive(Debug)]
pub struct GeoRouter {
    state: RwLock<Arc<GeoState>>,
}

impl GeoRouter {
    pub fn new(config: &GeoConfig) -> Result<Self, GeoConfigError> {
        Ok(Self {
            state: RwLock::new(Arc::new(GeoState::build(config)?)),
        })
    }

    /// Router that never filters; every request resolves to the given region
    pub fn disabled(default_region: Region) -> Self {
        Self {
            state: RwLock::new(Arc::new(GeoState {
                enabled: false,
                default_region,
                enforce: false,
                rules: Vec::new(),
                provider_regions: HashMap::new(),
            })),
        }
    }

    /// Parse a new configuration and swap it in atomically
    ///
    /// On error the previous configuration stays active.
    pub fn update_config(&self, config: &GeoConfig) -> Result<(), GeoConfigError> {
        let next = Arc::new(GeoState::build(config)?);
        *self.state.write() = next;
        info!(
            enabled = config.enabled,
            rules = config.rules.len(),
            providers = config.provider_regions.len(),
            enforce = config.enforce_data_residency,
            "Geo routing configuration reloaded"
        );
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.current().enabled
    }

    pub fn is_enforcing(&self) -> bool {
        let state = self.current();
        state.enabled && state.enforce
    }

    /// Region of the first CIDR rule containing the client address
    pub fn resolve_region(&self, client_ip: &str) -> Region {
        self.current().resolve_region(client_ip)
    }

    /// Providers allowed to serve `region`; `None` signals a residency violation
    pub fn filter_providers(
        &self,
        candidates: &[ProviderName],
        region: &Region,
    ) -> Option<Vec<ProviderName>> {
        self.current().filter_providers(candidates, region)
    }

    /// Resolve and filter in one step against a single configuration version
    pub fn apply(&self, client_ip: &str, candidates: &[ProviderName]) -> GeoRoutingDecision {
        let state = self.current();
        let region = state.resolve_region(client_ip);
        let allowed = state.filter_providers(candidates, &region);
        let filtered_out = match &allowed {
            Some(allowed) => candidates
                .iter()
                .filter(|c| !allowed.contains(c))
                .cloned()
                .collect(),
            None => candidates.to_vec(),
        };

        GeoRoutingDecision {
            client_ip: client_ip.to_string(),
            region,
            allowed,
            filtered_out,
            enforced: state.enabled && state.enforce,
        }
    }

    fn current(&self) -> Arc<GeoState> {
        Arc::clone(&self.state.read())
    }
}
