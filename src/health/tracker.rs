//! Per-provider rolling health metrics
//!
//! Each provider owns a single [`ProviderHealth`] behind its own mutex;
//! every read goes through [`ProviderHealth::snapshot_at`] so a reader sees
//! all values from the same critical section.

use crate::domain::ProviderName;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default EWMA smoothing factor for latency
pub const DEFAULT_EWMA_ALPHA: f64 = 0.3;

/// Lifetime of the rolling `(requests, errors)` window
pub const ERROR_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Time constant of the transient penalty decay, in minutes
pub const PENALTY_DECAY_MINUTES: f64 = 5.0;

/// Decayed penalties below this value are treated as fully expired
pub const PENALTY_FLOOR: f64 = 0.01;

/// Point-in-time view of a provider's health
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub latency_ewma_ms: f64,
    pub error_rate: f64,
    pub window_requests: u64,
    pub availability: f64,
    pub healthy: bool,
    pub penalty: f64,
    pub total_requests: u64,
}

impl Default for HealthSnapshot {
    fn default() -> Self {
        ProviderHealth::new(DEFAULT_EWMA_ALPHA).snapshot_at(Instant::now())
    }
}

/// Mutable health counters for one provider
#[derive(Debug, Clone)]
pub struct ProviderHealth {
    alpha: f64,
    latency_ewma_ms: Option<f64>,
    window_started: Instant,
    window_requests: u64,
    window_errors: u64,
    healthy: bool,
    failed_checks: u64,
    total_checks: u64,
    penalty: f64,
    penalty_stamped: Instant,
    total_requests: u64,
}

impl ProviderHealth {
    pub fn new(alpha: f64) -> Self {
        let now = Instant::now();
        Self {
            alpha,
            latency_ewma_ms: None,
            window_started: now,
            window_requests: 0,
            window_errors: 0,
            healthy: true,
            failed_checks: 0,
            total_checks: 0,
            penalty: 0.0,
            penalty_stamped: now,
            total_requests: 0,
        }
    }

    /// Fold a successful call's latency into the EWMA
    pub fn record_latency_at(&mut self, latency_ms: f64, now: Instant) {
        self.roll_window(now);
        let latency_ms = latency_ms.max(0.0);
        self.latency_ewma_ms = Some(match self.latency_ewma_ms {
            Some(current) => self.alpha * latency_ms + (1.0 - self.alpha) * current,
            None => latency_ms,
        });
        self.window_requests += 1;
        self.total_requests += 1;
    }

    /// Count a failed call
    pub fn record_error_at(&mut self, now: Instant) {
        self.roll_window(now);
        self.window_requests += 1;
        self.window_errors += 1;
        self.total_requests += 1;
    }

    pub fn record_health_check(&mut self, ok: bool) {
        self.total_checks += 1;
        if !ok {
            self.failed_checks += 1;
        }
        self.healthy = ok;
    }

    /// Add to the currently decayed penalty, clamped into `[0, 1]`
    pub fn add_penalty_at(&mut self, amount: f64, now: Instant) {
        let current = self.decayed_penalty(now);
        self.penalty = (current + amount).clamp(0.0, 1.0);
        self.penalty_stamped = now;
    }

    /// Read every metric from one consistent state
    pub fn snapshot_at(&mut self, now: Instant) -> HealthSnapshot {
        self.roll_window(now);

        let error_rate = if self.window_requests == 0 {
            0.0
        } else {
            self.window_errors as f64 / self.window_requests as f64
        };
        let availability = if self.total_checks == 0 {
            1.0
        } else {
            (self.total_checks - self.failed_checks) as f64 / self.total_checks as f64
        };

        HealthSnapshot {
            latency_ewma_ms: self.latency_ewma_ms.unwrap_or(0.0),
            error_rate,
            window_requests: self.window_requests,
            availability,
            healthy: self.healthy,
            penalty: self.decayed_penalty(now),
            total_requests: self.total_requests,
        }
    }

    fn roll_window(&mut self, now: Instant) {
        if now.saturating_duration_since(self.window_started) >= ERROR_WINDOW {
            self.window_started = now;
            self.window_requests = 0;
            self.window_errors = 0;
        }
    }

    fn decayed_penalty(&self, now: Instant) -> f64 {
        let elapsed_minutes = now.saturating_duration_since(self.penalty_stamped).as_secs_f64() / 60.0;
        let decayed = self.penalty * (-elapsed_minutes / PENALTY_DECAY_MINUTES).exp();
        if decayed < PENALTY_FLOOR {
            0.0
        } else {
            decayed
        }
    }
}

/// Registry of provider health entries, created on first write
#[derive(Debug)]
pub struct HealthTracker {
    alpha: f64,
    providers: RwLock<HashMap<ProviderName, Arc<Mutex<ProviderHealth>>>>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new(DEFAULT_EWMA_ALPHA)
    }
}

impl HealthTracker {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            providers: RwLock::new(HashMap::new()),
        }
    }

    pub fn record_latency(&self, provider: &ProviderName, latency_ms: f64) {
        self.entry(provider)
            .lock()
            .record_latency_at(latency_ms, Instant::now());
    }

    pub fn record_error(&self, provider: &ProviderName) {
        self.entry(provider).lock().record_error_at(Instant::now());
    }

    pub fn record_health_check(&self, provider: &ProviderName, ok: bool) {
        self.entry(provider).lock().record_health_check(ok);
    }

    pub fn add_penalty(&self, provider: &ProviderName, amount: f64) {
        self.entry(provider)
            .lock()
            .add_penalty_at(amount, Instant::now());
    }

    pub fn snapshot(&self, provider: &ProviderName) -> HealthSnapshot {
        self.snapshot_at(provider, Instant::now())
    }

    /// Snapshot at an explicit instant; unknown providers report fresh defaults
    pub fn snapshot_at(&self, provider: &ProviderName, now: Instant) -> HealthSnapshot {
        let entry = self.providers.read().get(provider).cloned();
        match entry {
            Some(health) => health.lock().snapshot_at(now),
            None => ProviderHealth::new(self.alpha).snapshot_at(now),
        }
    }

    /// Providers with recorded health data
    pub fn providers(&self) -> Vec<ProviderName> {
        self.providers.read().keys().cloned().collect()
    }

    /// Direct access to a provider's counters, creating them if needed
    pub fn entry(&self, provider: &ProviderName) -> Arc<Mutex<ProviderHealth>> {
        if let Some(existing) = self.providers.read().get(provider) {
            return Arc::clone(existing);
        }
        let mut providers = self.providers.write();
        Arc::clone(
            providers
                .entry(provider.clone())
                .or_insert_with(|| Arc::new(Mutex::new(ProviderHealth::new(self.alpha)))),
        )
    }
}
