//! SLA-aware provider scoring and selection
//!
//! Each candidate gets a composite score in `[0, 1]` from its latest
//! [`HealthSnapshot`] measured against its configured [`SlaTarget`]:
//!
//! | component    | weight | score                                                   |
//! |--------------|--------|---------------------------------------------------------|
//! | latency      | 0.35   | 1 within target, `e^(-2(ratio-1))` beyond               |
//! | errors       | 0.30   | 1 under 10 samples or within target, `e^(-3(ratio-1))`  |
//! | availability | 0.25   | 1 at target, linear drop-off below                      |
//! | freshness    | 0.10   | 0.5 with no traffic yet, otherwise 1                    |
//!
//! The composite is scaled by the provider's static weight and by
//! `1 - penalty`. An unhealthy provider always scores exactly 0.

use super::tracker::{HealthSnapshot, HealthTracker};
use crate::domain::ProviderName;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

const LATENCY_WEIGHT: f64 = 0.35;
const ERROR_WEIGHT: f64 = 0.30;
const AVAILABILITY_WEIGHT: f64 = 0.25;
const FRESHNESS_WEIGHT: f64 = 0.10;

/// Below this many requests in the window the error rate is not trusted
pub const MIN_ERROR_SAMPLES: u64 = 10;

/// Transient penalty applied on every recorded failure
pub const FAILURE_PENALTY: f64 = 0.1;

/// Operator-configured service level for one provider
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlaTarget {
    pub max_p95_latency_ms: f64,
    pub max_error_rate: f64,
    pub min_availability: f64,
    pub weight: f64,
}

impl Default for SlaTarget {
    fn default() -> Self {
        Self {
            max_p95_latency_ms: 5000.0,
            max_error_rate: 0.05,
            min_availability: 0.99,
            weight: 1.0,
        }
    }
}

/// Individual component scores behind a composite score
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub latency: f64,
    pub error: f64,
    pub availability: f64,
    pub freshness: f64,
}

/// Score of one provider, as exposed to selection and dashboards
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderScore {
    pub provider: ProviderName,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
    pub snapshot: HealthSnapshot,
}

/// Latency component: smooth exponential penalty past the P95 target
pub fn latency_score(latency_ewma_ms: f64, target_p95_ms: f64) -> f64 {
    if latency_ewma_ms <= target_p95_ms {
        return 1.0;
    }
    let ratio = latency_ewma_ms / target_p95_ms;
    (-2.0 * (ratio - 1.0)).exp()
}

/// Error component; ignores the rate until enough samples exist
pub fn error_score(error_rate: f64, samples: u64, target_rate: f64) -> f64 {
    if samples < MIN_ERROR_SAMPLES || error_rate <= target_rate {
        return 1.0;
    }
    let ratio = error_rate / target_rate;
    (-3.0 * (ratio - 1.0)).exp()
}

/// Availability component: linear drop-off below target
pub fn availability_score(availability: f64, target: f64) -> f64 {
    if availability >= target {
        1.0
    } else {
        availability / target
    }
}

/// Compute a provider's composite score and its breakdown
pub fn compute_score(snapshot: &HealthSnapshot, target: &SlaTarget) -> (f64, ScoreBreakdown) {
    let breakdown = ScoreBreakdown {
        latency: latency_score(snapshot.latency_ewma_ms, target.max_p95_latency_ms),
        error: error_score(
            snapshot.error_rate,
            snapshot.window_requests,
            target.max_error_rate,
        ),
        availability: availability_score(snapshot.availability, target.min_availability),
        freshness: if snapshot.total_requests == 0 { 0.5 } else { 1.0 },
    };

    if !snapshot.healthy {
        return (0.0, breakdown);
    }

    let composite = LATENCY_WEIGHT * breakdown.latency
        + ERROR_WEIGHT * breakdown.error
        + AVAILABILITY_WEIGHT * breakdown.availability
        + FRESHNESS_WEIGHT * breakdown.freshness;
    let score = composite * target.weight * (1.0 - snapshot.penalty);

    (clamp_score(score), breakdown)
}

fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

fn clamp_weight(weight: f64) -> f64 {
    if weight.is_nan() || weight < 0.0 {
        0.0
    } else {
        weight
    }
}

/// Ranks providers by SLA compliance
#[derive(Debug)]
pub struct SlaBalancer {
    tracker: Arc<HealthTracker>,
    targets: RwLock<HashMap<ProviderName, SlaTarget>>,
    default_target: SlaTarget,
}

impl Default for SlaBalancer {
    fn default() -> Self {
        Self::new(Arc::new(HealthTracker::default()), SlaTarget::default())
    }
}

impl SlaBalancer {
    pub fn new(tracker: Arc<HealthTracker>, default_target: SlaTarget) -> Self {
        Self {
            tracker,
            targets: RwLock::new(HashMap::new()),
            default_target,
        }
    }

    pub fn tracker(&self) -> &Arc<HealthTracker> {
        &self.tracker
    }

    /// Register (or replace) a provider's SLA target
    pub fn register_provider(&self, provider: ProviderName, mut target: SlaTarget) {
        target.weight = clamp_weight(target.weight);
        debug!(provider = %provider, ?target, "Registering SLA target");
        self.targets.write().insert(provider, target);
    }

    /// Swap the whole target table, dropping providers no longer listed
    pub fn replace_targets(&self, targets: impl IntoIterator<Item = (ProviderName, SlaTarget)>) {
        let next: HashMap<_, _> = targets
            .into_iter()
            .map(|(provider, mut target)| {
                target.weight = clamp_weight(target.weight);
                (provider, target)
            })
            .collect();
        *self.targets.write() = next;
    }

    pub fn registered_providers(&self) -> Vec<ProviderName> {
        let mut providers: Vec<_> = self.targets.read().keys().cloned().collect();
        providers.sort();
        providers
    }

    pub fn target(&self, provider: &ProviderName) -> SlaTarget {
        self.targets
            .read()
            .get(provider)
            .copied()
            .unwrap_or(self.default_target)
    }

    pub fn score(&self, provider: &ProviderName) -> ProviderScore {
        self.score_at(provider, Instant::now())
    }

    fn score_at(&self, provider: &ProviderName, now: Instant) -> ProviderScore {
        let snapshot = self.tracker.snapshot_at(provider, now);
        let (score, breakdown) = compute_score(&snapshot, &self.target(provider));
        ProviderScore {
            provider: provider.clone(),
            score,
            breakdown,
            snapshot,
        }
    }

    /// Pick the best-scoring candidate
    ///
    /// An empty candidate list means "all registered providers". Ties are
    /// broken by provider name so selection is deterministic.
    pub fn select_provider(&self, candidates: &[ProviderName]) -> Option<ProviderScore> {
        let ranked = self.rank(candidates);
        if let Some(best) = ranked.first() {
            debug!(
                provider = %best.provider,
                score = best.score,
                candidates = ranked.len(),
                "SLA balancer selected provider"
            );
        }
        ranked.into_iter().next()
    }

    /// Scores of every registered provider, best first
    pub fn get_scores(&self) -> Vec<ProviderScore> {
        self.rank(&[])
    }

    pub fn record_success(&self, provider: &ProviderName, latency_ms: f64) {
        self.tracker.record_latency(provider, latency_ms);
    }

    /// Record a failed call and apply a transient penalty
    pub fn record_failure(&self, provider: &ProviderName) {
        self.tracker.record_error(provider);
        self.tracker.add_penalty(provider, FAILURE_PENALTY);
    }

    pub fn record_health_check(&self, provider: &ProviderName, ok: bool) {
        self.tracker.record_health_check(provider, ok);
    }

    pub fn add_penalty(&self, provider: &ProviderName, amount: f64) {
        self.tracker.add_penalty(provider, amount);
    }

    /// Every candidate scored, best first, ties broken by name
    pub fn rank(&self, candidates: &[ProviderName]) -> Vec<ProviderScore> {
        let now = Instant::now();
        let pool = if candidates.is_empty() {
            self.registered_providers()
        } else {
            candidates.to_vec()
        };

        let mut scores: Vec<ProviderScore> = pool
            .iter()
            .map(|provider| self.score_at(provider, now))
            .collect();
        scores.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.provider.cmp(&b.provider))
        });
        scores.dedup_by(|a, b| a.provider == b.provider);
        scores
    }
}
