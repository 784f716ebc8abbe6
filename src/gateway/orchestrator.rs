//! Request dispatch pipeline
//!
//! Planning runs the geo filter, the rule engine and failover-aware
//! selection: route rules keep their preference order, fallback rules are
//! ranked by SLA score. Admission then takes a tenant slot and joins or leads a
//! deduplicated call. The shared resource ledger is locked per key only
//! around reservation and settlement, never across the provider call.

use super::catalog::ProviderCatalog;
use super::connector::{
    NoopLedger, ProviderCall, ProviderConnector, ResourceLedger, Settlement,
};
use super::types::{
    DispatchError, DispatchOutcome, DispatchRequest, DispatchStats, RoutePlan, StatsSnapshot,
    UpstreamFailure,
};
use crate::concurrency::{DedupEntry, DedupError, Deduplicator, Fingerprint, KeyedMutex, KeyedSemaphore};
use crate::config::Settings;
use crate::domain::{ModelName, ProviderName, TenantId};
use crate::error::Result;
use crate::failover::FailoverState;
use crate::geo::{GeoRouter, GeoRoutingDecision};
use crate::health::{HealthTracker, ProviderScore, SlaBalancer};
use crate::routing::{RoutingDecision, RuleAction, RuleEngine};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, instrument, warn};

/// Transient penalty applied when a provider call runs past the deadline
pub const TIMEOUT_PENALTY: f64 = 0.25;

type SharedOutcome = std::result::Result<DispatchOutcome, DispatchError>;

pub struct Orchestrator {
    catalog: ProviderCatalog,
    rules: Arc<RuleEngine>,
    balancer: Arc<SlaBalancer>,
    geo: Arc<GeoRouter>,
    failover: Arc<FailoverState>,
    tenant_slots: KeyedSemaphore<TenantId>,
    dedup: Deduplicator<SharedOutcome>,
    ledger_locks: KeyedMutex<String>,
    connector: Arc<dyn ProviderConnector>,
    ledger: Arc<dyn ResourceLedger>,
    stats: DispatchStats,
    acquire_timeout: Duration,
    retry_after: Duration,
    request_timeout: Duration,
}

impl Orchestrator {
    pub fn new(settings: &Settings, connector: Arc<dyn ProviderConnector>) -> Result<Self> {
        let catalog = ProviderCatalog::from_settings(&settings.providers);
        let tracker = Arc::new(HealthTracker::new(settings.sla.ewma_alpha));
        let balancer = Arc::new(SlaBalancer::new(tracker, settings.sla.default_target));
        balancer.replace_targets(sla_targets(&catalog, settings));

        let rules = Arc::new(RuleEngine::with_rules(settings.routing.rules.clone())?);
        let geo = Arc::new(GeoRouter::new(&settings.geo)?);
        let failover = Arc::new(FailoverState::new(
            settings.failover.threshold,
            settings.failover.cooldown(),
        ));

        info!(
            providers = catalog.len(),
            rules = rules.len(),
            geo_enabled = settings.geo.enabled,
            tenant_limit = settings.concurrency.tenant_limit,
            "Orchestrator initialized"
        );

        Ok(Self {
            catalog,
            rules,
            balancer,
            geo,
            failover,
            tenant_slots: KeyedSemaphore::new(settings.concurrency.tenant_limit),
            dedup: Deduplicator::new(),
            ledger_locks: KeyedMutex::new(),
            connector,
            ledger: Arc::new(NoopLedger),
            stats: DispatchStats::default(),
            acquire_timeout: settings.concurrency.acquire_timeout(),
            retry_after: settings.concurrency.retry_after(),
            request_timeout: settings.dispatch.request_timeout(),
        })
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn ResourceLedger>) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn catalog(&self) -> &ProviderCatalog {
        &self.catalog
    }

    pub fn rules(&self) -> &Arc<RuleEngine> {
        &self.rules
    }

    pub fn balancer(&self) -> &Arc<SlaBalancer> {
        &self.balancer
    }

    pub fn geo(&self) -> &Arc<GeoRouter> {
        &self.geo
    }

    pub fn failover(&self) -> &Arc<FailoverState> {
        &self.failover
    }

    pub fn connector(&self) -> &Arc<dyn ProviderConnector> {
        &self.connector
    }

    /// Requests currently holding a slot for `tenant`
    pub fn active_requests(&self, tenant: &TenantId) -> usize {
        self.tenant_slots.active_count(tenant)
    }

    /// Distinct upstream calls currently shared through deduplication
    pub fn in_flight(&self) -> usize {
        self.dedup.in_flight()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Apply new geo rules and SLA targets without restarting
    ///
    /// On error nothing is changed.
    pub fn reload(&self, settings: &Settings) -> Result<()> {
        self.geo.update_config(&settings.geo)?;
        self.balancer
            .replace_targets(sla_targets(&self.catalog, settings));
        info!(
            geo_rules = settings.geo.rules.len(),
            sla_targets = settings.sla.targets.len(),
            "Routing configuration reloaded"
        );
        Ok(())
    }

    pub fn record_health_check(&self, provider: &ProviderName, ok: bool) {
        self.balancer.record_health_check(provider, ok);
    }

    /// Decide where a request would be sent without dispatching it
    pub fn plan(&self, request: &DispatchRequest) -> std::result::Result<RoutePlan, DispatchError> {
        let context = &request.context;

        let mut universe = self.catalog.provider_names();
        if !universe.contains(context.provider()) {
            universe.push(context.provider().clone());
        }

        let geo = self.geo.apply(&request.client_ip, &universe);
        let Some(allowed) = geo.allowed.clone() else {
            self.stats.residency_violations.increment();
            return Err(DispatchError::ResidencyViolation {
                region: geo.region.clone(),
            });
        };

        let decision = self.rules.evaluate(context);
        let model = decision
            .model
            .clone()
            .unwrap_or_else(|| context.model().clone());

        let (ranked, score) = match decision.action {
            RuleAction::Block => {
                self.stats.blocked.increment();
                return Err(DispatchError::Blocked {
                    rule_id: decision.rule_id.clone(),
                    reason: decision.reason.clone(),
                });
            }
            RuleAction::Redirect => self.redirect(&decision, &geo)?,
            RuleAction::Route => match self.preferred(&decision, &allowed) {
                Some(preferred) => self.select_in_order(&preferred),
                None => self.select(&self.serving(&model, &allowed)),
            },
            RuleAction::Fallback => {
                let candidates = self
                    .preferred(&decision, &allowed)
                    .unwrap_or_else(|| self.serving(&model, &allowed));
                self.select(&candidates)
            }
        };

        let Some(provider) = ranked.first().cloned() else {
            return Err(DispatchError::NoProvider { model });
        };

        info!(
            region = %geo.region,
            action = %decision.action,
            provider = %provider,
            model = %model,
            candidates = ranked.len(),
            filtered_out = geo.filtered_out.len(),
            "Route planned"
        );

        Ok(RoutePlan {
            geo,
            decision,
            model,
            provider,
            ranked,
            score,
        })
    }

    #[instrument(
        skip_all,
        fields(
            request_id = %request.request_id,
            tenant = %request.context.tenant(),
            model = %request.context.model(),
        )
    )]
    pub async fn dispatch(
        &self,
        request: DispatchRequest,
    ) -> std::result::Result<DispatchOutcome, DispatchError> {
        self.stats.dispatched.increment();
        let started = Instant::now();
        let deadline = started + self.request_timeout;

        let result = self.admit_and_run(&request, started, deadline).await;

        match &result {
            Ok(outcome) => {
                self.stats.succeeded.increment();
                info!(
                    provider = %outcome.provider,
                    status = outcome.response.status,
                    attempts = outcome.attempts,
                    deduplicated = outcome.deduplicated,
                    latency_ms = started.elapsed().as_millis() as u64,
                    "Dispatch completed"
                );
            }
            Err(error) => {
                self.stats.failed.increment();
                warn!(error = %error, "Dispatch failed");
            }
        }
        result
    }

    async fn admit_and_run(
        &self,
        request: &DispatchRequest,
        started: Instant,
        deadline: Instant,
    ) -> SharedOutcome {
        let plan = self.plan(request)?;

        let tenant = request.context.tenant().clone();
        let wait = self
            .acquire_timeout
            .min(deadline.saturating_duration_since(Instant::now()));
        let Some(_slot) = self.tenant_slots.acquire(&tenant, wait).await else {
            self.stats.concurrency_rejections.increment();
            warn!(
                tenant = %tenant,
                limit = self.tenant_slots.capacity(),
                "Tenant concurrency limit reached"
            );
            return Err(DispatchError::ConcurrencyExhausted {
                tenant,
                retry_after: self.retry_after,
            });
        };

        let fingerprint = Fingerprint::compute(&request.api_key, &plan.model, &request.payload)
            .scoped_to(plan.attempts());
        match self.dedup.try_start(fingerprint) {
            DedupEntry::Leader(ticket) => {
                let result = self.execute(request, &plan, started, deadline).await;
                ticket.complete(result.clone());
                result
            }
            DedupEntry::Follower(waiter) => {
                self.stats.deduplicated.increment();
                debug!(fingerprint = %fingerprint, "Awaiting identical in-flight request");
                match timeout_at(deadline, waiter.wait()).await {
                    Ok(Ok(shared)) => shared.map(|mut outcome| {
                        outcome.request_id = request.request_id;
                        outcome.deduplicated = true;
                        outcome
                    }),
                    Ok(Err(DedupError::Abandoned)) => Err(UpstreamFailure::abandoned().into()),
                    Err(_) => Err(UpstreamFailure::timeout(None, self.request_timeout).into()),
                }
            }
        }
    }

    /// Reserve, call upstream, settle
    async fn execute(
        &self,
        request: &DispatchRequest,
        plan: &RoutePlan,
        started: Instant,
        deadline: Instant,
    ) -> SharedOutcome {
        let resource_key = request.resource_key();

        let reserved = timeout_at(deadline, async {
            let _lock = self.ledger_locks.lock(&resource_key).await;
            self.ledger.reserve(&resource_key, &request.context).await
        })
        .await;
        match reserved {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                warn!(resource_key = %resource_key, error = %error, "Ledger reservation rejected");
                return Err(UpstreamFailure::ledger(&error).into());
            }
            Err(_) => return Err(UpstreamFailure::timeout(None, self.request_timeout).into()),
        }

        let result = self.call_upstream(request, plan, started, deadline).await;

        let settlement = Settlement {
            request_id: request.request_id,
            provider: match &result {
                Ok(outcome) => Some(outcome.provider.clone()),
                Err(DispatchError::Failed(failure)) => failure.provider.clone(),
                Err(_) => None,
            },
            model: plan.model.clone(),
            success: result.is_ok(),
            reserved_tokens: request.context.total_tokens(),
            latency: started.elapsed(),
        };
        {
            let _lock = self.ledger_locks.lock(&resource_key).await;
            if let Err(error) = self.ledger.settle(&resource_key, &settlement).await {
                warn!(resource_key = %resource_key, error = %error, "Ledger settlement failed");
            }
        }

        result
    }

    async fn call_upstream(
        &self,
        request: &DispatchRequest,
        plan: &RoutePlan,
        started: Instant,
        deadline: Instant,
    ) -> SharedOutcome {
        let mut last_failure = None;

        for (index, provider) in plan.attempts().enumerate() {
            let attempts = u32::try_from(index).unwrap_or(u32::MAX).saturating_add(1);
            if index > 0 {
                self.stats.retried.increment();
                debug!(provider = %provider, attempt = attempts, "Retrying with next candidate");
            }

            let call = ProviderCall {
                request_id: request.request_id,
                provider: provider.clone(),
                model: plan.model.clone(),
                context: request.context.clone(),
                payload: request.payload.clone(),
            };
            let call_started = Instant::now();

            match timeout_at(deadline, self.connector.complete(&call)).await {
                Ok(Ok(response)) if !response.is_server_error() => {
                    self.record_success(provider, call_started.elapsed());
                    return Ok(DispatchOutcome {
                        request_id: request.request_id,
                        response,
                        provider: provider.clone(),
                        model: plan.model.clone(),
                        decision: plan.decision.clone(),
                        score: plan
                            .score
                            .as_ref()
                            .filter(|score| &score.provider == provider)
                            .map(|score| score.score),
                        deduplicated: false,
                        attempts,
                        latency: started.elapsed(),
                    });
                }
                Ok(Ok(response)) => {
                    self.record_failure(provider);
                    warn!(provider = %provider, status = response.status, "Provider returned server error");
                    last_failure = Some(UpstreamFailure::from_status(provider, response.status));
                }
                Ok(Err(error)) => {
                    self.record_failure(provider);
                    warn!(provider = %provider, error = %error, "Provider call failed");
                    last_failure = Some(UpstreamFailure::connector(provider, &error));
                }
                Err(_) => {
                    self.record_failure(provider);
                    self.balancer.add_penalty(provider, TIMEOUT_PENALTY);
                    warn!(provider = %provider, "Provider call exceeded request deadline");
                    return Err(UpstreamFailure::timeout(Some(provider), self.request_timeout).into());
                }
            }
        }

        Err(match last_failure {
            Some(failure) => DispatchError::Failed(failure),
            None => DispatchError::NoProvider {
                model: plan.model.clone(),
            },
        })
    }

    fn record_success(&self, provider: &ProviderName, latency: Duration) {
        self.balancer
            .record_success(provider, latency.as_secs_f64() * 1000.0);
        self.failover.record_success(provider);
    }

    fn record_failure(&self, provider: &ProviderName) {
        self.balancer.record_failure(provider);
        self.failover.record_failure(provider);
    }

    /// Rule preference order restricted to geo-allowed providers
    fn preferred(
        &self,
        decision: &RoutingDecision,
        allowed: &[ProviderName],
    ) -> Option<Vec<ProviderName>> {
        let preferred: Vec<ProviderName> = decision
            .preference_order()
            .into_iter()
            .filter(|provider| allowed.contains(provider))
            .collect();
        (!preferred.is_empty()).then_some(preferred)
    }

    /// Allowed providers declaring the model, else every allowed provider
    ///
    /// Used when none of the rule's own providers may serve the region.
    fn serving(&self, model: &ModelName, allowed: &[ProviderName]) -> Vec<ProviderName> {
        let serving: Vec<ProviderName> = self
            .catalog
            .providers_for(model)
            .into_iter()
            .filter(|provider| allowed.contains(provider))
            .collect();
        if serving.is_empty() {
            allowed.to_vec()
        } else {
            serving
        }
    }

    /// First failover-healthy provider in preference order, then the other
    /// healthy ones in the same order
    fn select_in_order(
        &self,
        preferred: &[ProviderName],
    ) -> (Vec<ProviderName>, Option<ProviderScore>) {
        let Some((first, rest)) = preferred.split_first() else {
            return (Vec::new(), None);
        };
        let chosen = self.failover.select_provider(first, rest);
        let mut ranked = vec![chosen.clone()];
        ranked.extend(
            preferred
                .iter()
                .filter(|provider| **provider != chosen && self.failover.is_healthy(provider))
                .cloned(),
        );
        let score = self.balancer.score(&chosen);
        (ranked, Some(score))
    }

    /// Drop demoted providers, then rank the rest by SLA score
    fn select(&self, candidates: &[ProviderName]) -> (Vec<ProviderName>, Option<ProviderScore>) {
        let healthy: Vec<ProviderName> = candidates
            .iter()
            .filter(|provider| self.failover.is_healthy(provider))
            .cloned()
            .collect();

        if healthy.is_empty() {
            let Some((preferred, fallbacks)) = candidates.split_first() else {
                return (Vec::new(), None);
            };
            let chosen = self.failover.select_provider(preferred, fallbacks);
            let mut ranked = vec![chosen.clone()];
            ranked.extend(candidates.iter().filter(|p| **p != chosen).cloned());
            return (ranked, Some(self.balancer.score(&chosen)));
        }

        let scores = self.balancer.rank(&healthy);
        let ranked = scores.iter().map(|score| score.provider.clone()).collect();
        (ranked, scores.into_iter().next())
    }

    /// A redirect bypasses scoring but not residency enforcement
    fn redirect(
        &self,
        decision: &RoutingDecision,
        geo: &GeoRoutingDecision,
    ) -> std::result::Result<(Vec<ProviderName>, Option<ProviderScore>), DispatchError> {
        let target = decision.provider.clone();
        if self
            .geo
            .filter_providers(std::slice::from_ref(&target), &geo.region)
            .is_none()
        {
            self.stats.residency_violations.increment();
            warn!(
                target = %target,
                region = %geo.region,
                "Redirect target is not certified for the client region"
            );
            return Err(DispatchError::ResidencyViolation {
                region: geo.region.clone(),
            });
        }
        let score = self.balancer.score(&target);
        Ok((vec![target], Some(score)))
    }
}

/// SLA targets for every catalog provider plus any explicitly configured one
fn sla_targets(
    catalog: &ProviderCatalog,
    settings: &Settings,
) -> Vec<(ProviderName, crate::health::SlaTarget)> {
    let mut targets: Vec<_> = catalog
        .provider_names()
        .into_iter()
        .map(|name| {
            let target = settings
                .sla
                .targets
                .get(&name)
                .copied()
                .unwrap_or(settings.sla.default_target);
            (name, target)
        })
        .collect();
    for (name, target) in &settings.sla.targets {
        if !catalog.contains(name) {
            targets.push((name.clone(), *target));
        }
    }
    targets
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("catalog", &self.catalog)
            .field("rules", &self.rules.len())
            .field("tenant_slots", &self.tenant_slots)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}
