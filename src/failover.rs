//! Consecutive-failure tracking with cooldown-based recovery
//!
//! Demotes providers that keep failing ahead of SLA scoring. A provider at or
//! above the failure threshold becomes eligible again once the cooldown has
//! elapsed since its last failure; the next success resets it fully.

use crate::domain::ProviderName;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
struct FailureRecord {
    count: u32,
    last_failure: Instant,
}

#[derive(Debug)]
pub struct FailoverState {
    threshold: u32,
    cooldown: Duration,
    failures: Mutex<HashMap<ProviderName, FailureRecord>>,
}

impl Default for FailoverState {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD, DEFAULT_COOLDOWN)
    }
}

impl FailoverState {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn record_failure(&self, provider: &ProviderName) {
        self.record_failure_at(provider, Instant::now());
    }

    pub fn record_failure_at(&self, provider: &ProviderName, now: Instant) {
        let mut failures = self.failures.lock();
        let record = failures
            .entry(provider.clone())
            .or_insert(FailureRecord {
                count: 0,
                last_failure: now,
            });
        record.count = record.count.saturating_add(1);
        record.last_failure = now;

        if record.count == self.threshold {
            warn!(
                provider = %provider,
                failures = record.count,
                cooldown_secs = self.cooldown.as_secs(),
                "Provider reached failure threshold, demoting until cooldown elapses"
            );
        }
    }

    pub fn record_success(&self, provider: &ProviderName) {
        if let Some(previous) = self.failures.lock().remove(provider) {
            debug!(provider = %provider, failures = previous.count, "Provider recovered");
        }
    }

    pub fn failure_count(&self, provider: &ProviderName) -> u32 {
        self.failures
            .lock()
            .get(provider)
            .map_or(0, |record| record.count)
    }

    pub fn is_healthy(&self, provider: &ProviderName) -> bool {
        self.is_healthy_at(provider, Instant::now())
    }

    /// Below threshold, or the cooldown has elapsed since the last failure
    pub fn is_healthy_at(&self, provider: &ProviderName, now: Instant) -> bool {
        self.failures.lock().get(provider).is_none_or(|record| {
            record.count < self.threshold
                || now.saturating_duration_since(record.last_failure) >= self.cooldown
        })
    }

    /// First healthy provider among `preferred` then `fallbacks`
    ///
    /// When every candidate is demoted the preferred provider is returned
    /// as a last resort rather than failing the request outright.
    pub fn select_provider(
        &self,
        preferred: &ProviderName,
        fallbacks: &[ProviderName],
    ) -> ProviderName {
        self.select_provider_at(preferred, fallbacks, Instant::now())
    }

    pub fn select_provider_at(
        &self,
        preferred: &ProviderName,
        fallbacks: &[ProviderName],
        now: Instant,
    ) -> ProviderName {
        if let Some(healthy) = std::iter::once(preferred)
            .chain(fallbacks)
            .find(|provider| self.is_healthy_at(provider, now))
        {
            return healthy.clone();
        }

        warn!(
            preferred = %preferred,
            fallbacks = fallbacks.len(),
            "All failover candidates are unhealthy, using preferred provider as last resort"
        );
        preferred.clone()
    }
}
