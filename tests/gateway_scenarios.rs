//! End-to-end dispatch scenarios against a scripted provider connector
//!
//! Each test builds an orchestrator from a TOML document and drives it
//! through `dispatch`, checking what reached the upstream and what the
//! client got back.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use switchboard::domain::{ApiKey, ModelName, ProviderName, RoutingContext, TenantId};
use switchboard::gateway::{
    ConnectorError, FailureKind, HealthMonitor, LedgerError, ProviderCall, ProviderConnector,
    ProviderResponse, ResourceLedger, Settlement, TIMEOUT_PENALTY,
};
use switchboard::{DispatchError, DispatchRequest, Orchestrator, Settings};

const PROVIDERS: &str = r#"
[[providers]]
name = "openai"
models = ["gpt-4"]

[[providers]]
name = "azure"
models = ["gpt-4"]

[[providers]]
name = "anthropic"
models = ["claude-3"]
"#;

const GEO: &str = r#"
[geo]
enabled = true
default_region = "us-east"
enforce_data_residency = true

[[geo.rules]]
cidr = "81.0.0.0/8"
region = "eu-west"

[[geo.rules]]
cidr = "103.0.0.0/8"
region = "ap-south"

[[geo.provider_regions]]
provider = "openai"
regions = ["us-east"]

[[geo.provider_regions]]
provider = "azure"
regions = ["eu-west"]

[[geo.provider_regions]]
provider = "anthropic"
regions = ["us-east"]
"#;

#[derive(Debug, Clone, Copy)]
enum Failure {
    Status(u16),
    Connection,
    Hang,
}

#[derive(Default)]
struct MockConnector {
    calls: Mutex<Vec<ProviderName>>,
    failing: Mutex<HashMap<ProviderName, Failure>>,
    unhealthy: Mutex<Vec<ProviderName>>,
    delay: Duration,
}

impl MockConnector {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    fn fail(&self, provider: &str, failure: Failure) {
        self.failing.lock().insert(name(provider), failure);
    }

    fn mark_unhealthy(&self, provider: &str) {
        self.unhealthy.lock().push(name(provider));
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().iter().map(ToString::to_string).collect()
    }
}

#[async_trait]
impl ProviderConnector for MockConnector {
    async fn complete(&self, call: &ProviderCall) -> Result<ProviderResponse, ConnectorError> {
        self.calls.lock().push(call.provider.clone());
        let failure = self.failing.lock().get(&call.provider).copied();

        if matches!(failure, Some(Failure::Hang)) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        } else if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match failure {
            Some(Failure::Status(status)) => Ok(ProviderResponse::new(status, "upstream error")),
            Some(Failure::Connection) => Err(ConnectorError::Connection {
                provider: call.provider.clone(),
                message: "connection refused".to_string(),
            }),
            _ => Ok(ProviderResponse::ok(format!(
                "{}:{}",
                call.provider, call.model
            ))),
        }
    }

    async fn health_check(&self, provider: &ProviderName) -> bool {
        !self.unhealthy.lock().contains(provider)
    }
}

/// Ledger recording how many callers were inside it at once
#[derive(Default)]
struct CountingLedger {
    active: AtomicUsize,
    max_active: AtomicUsize,
    reject: bool,
    settled: Mutex<Vec<(bool, Option<ProviderName>)>>,
}

impl CountingLedger {
    async fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ResourceLedger for CountingLedger {
    async fn reserve(&self, _key: &str, _context: &RoutingContext) -> Result<(), LedgerError> {
        self.enter().await;
        if self.reject {
            return Err(LedgerError::Rejected("credit balance exhausted".to_string()));
        }
        Ok(())
    }

    async fn settle(&self, _key: &str, settlement: &Settlement) -> Result<(), LedgerError> {
        self.enter().await;
        self.settled
            .lock()
            .push((settlement.success, settlement.provider.clone()));
        Ok(())
    }
}

fn name(provider: &str) -> ProviderName {
    ProviderName::try_new(provider.to_string()).expect("valid provider name")
}

fn settings(extra: &str) -> Settings {
    Settings::from_toml_str(&format!("{PROVIDERS}\n{extra}")).expect("valid test settings")
}

fn orchestrator_with(
    extra: &str,
    connector: MockConnector,
) -> (Arc<Orchestrator>, Arc<MockConnector>) {
    let connector = Arc::new(connector);
    let orchestrator =
        Orchestrator::new(&settings(extra), connector.clone()).expect("orchestrator builds");
    (Arc::new(orchestrator), connector)
}

fn orchestrator(extra: &str) -> (Arc<Orchestrator>, Arc<MockConnector>) {
    orchestrator_with(extra, MockConnector::default())
}

fn context(model: &str, provider: &str, tenant: &str) -> RoutingContext {
    RoutingContext::builder(
        ModelName::try_new(model.to_string()).expect("valid model"),
        name(provider),
        TenantId::try_new(tenant.to_string()).expect("valid tenant"),
    )
    .build()
}

fn request(ip: &str, payload: &'static str) -> DispatchRequest {
    DispatchRequest::new(
        context("gpt-4", "openai", "acme"),
        ip,
        ApiKey::try_new("sk-test-key".to_string()).expect("valid key"),
        payload,
    )
}

fn failure_kind(error: &DispatchError) -> Option<FailureKind> {
    match error {
        DispatchError::Failed(failure) => Some(failure.kind),
        _ => None,
    }
}

#[tokio::test]
async fn test_default_route_reaches_requested_provider() {
    let (orchestrator, connector) = orchestrator("");

    let outcome = orchestrator
        .dispatch(request("10.0.0.1", "hello"))
        .await
        .expect("dispatch succeeds");

    assert_eq!(outcome.provider, name("openai"));
    assert_eq!(outcome.response.body, "openai:gpt-4");
    assert_eq!(outcome.attempts, 1);
    assert!(!outcome.decision.is_rule_match());
    assert!(!outcome.deduplicated);
    assert_eq!(connector.calls(), vec!["openai"]);

    let snapshot = orchestrator.balancer().tracker().snapshot(&name("openai"));
    assert_eq!(snapshot.total_requests, 1);
    assert_eq!(snapshot.error_rate, 0.0);

    let stats = orchestrator.stats();
    assert_eq!(stats.dispatched, 1);
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.failed, 0);
}

#[tokio::test]
async fn test_matching_rule_rewrites_provider_and_model() {
    let (orchestrator, connector) = orchestrator(
        r#"
        [[routing.rules]]
        id = "acme-to-claude"
        name = "Acme uses Claude"
        priority = 5
        action = "route"
        target_provider = "anthropic"
        target_model = "claude-3"
        conditions = [{ field = "tenant", operator = "equals", value = "acme" }]
        "#,
    );

    let outcome = orchestrator
        .dispatch(request("10.0.0.1", "hello"))
        .await
        .expect("dispatch succeeds");

    assert_eq!(outcome.provider, name("anthropic"));
    assert_eq!(outcome.model.to_string(), "claude-3");
    assert_eq!(outcome.response.body, "anthropic:claude-3");
    assert_eq!(
        outcome.decision.rule_id.map(|id| id.to_string()),
        Some("acme-to-claude".to_string())
    );
    assert!(outcome.score.is_some());
    assert_eq!(connector.calls(), vec!["anthropic"]);
}

#[tokio::test]
async fn test_block_rule_rejects_before_upstream() {
    let (orchestrator, connector) = orchestrator(
        r#"
        [[routing.rules]]
        id = "no-free-gpt4"
        name = "No GPT-4 on the free tier"
        priority = 1
        action = "block"
        conditions = [
            { field = "model", operator = "equals", value = "gpt-4" },
            { field = "free_tier", operator = "equals", value = "true" },
        ]
        "#,
    );

    let mut free = request("10.0.0.1", "hello");
    free.context = RoutingContext::builder(
        ModelName::try_new("gpt-4".to_string()).expect("valid model"),
        name("openai"),
        TenantId::try_new("acme".to_string()).expect("valid tenant"),
    )
    .free_tier(true)
    .build();

    let error = orchestrator.dispatch(free).await.unwrap_err();
    match error {
        DispatchError::Blocked { rule_id, .. } => {
            assert_eq!(rule_id.map(|id| id.to_string()), Some("no-free-gpt4".to_string()));
        }
        other => panic!("expected block, got {other:?}"),
    }
    assert!(connector.calls().is_empty());

    // Paid tier is untouched by the rule.
    orchestrator
        .dispatch(request("10.0.0.1", "hello"))
        .await
        .expect("paid request succeeds");

    let stats = orchestrator.stats();
    assert_eq!(stats.blocked, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.succeeded, 1);
}

#[tokio::test]
async fn test_geo_filter_moves_request_to_certified_provider() {
    let (orchestrator, connector) = orchestrator(GEO);

    let outcome = orchestrator
        .dispatch(request("81.2.3.4", "bonjour"))
        .await
        .expect("eu request is served");

    assert_eq!(outcome.provider, name("azure"));
    assert_eq!(connector.calls(), vec!["azure"]);

    let plan = orchestrator
        .plan(&request("81.2.3.4", "bonjour"))
        .expect("plan succeeds");
    assert_eq!(plan.region().to_string(), "eu-west");
    assert!(plan.geo.enforced);
    assert!(plan.geo.filtered_out.contains(&name("openai")));

    let us = orchestrator
        .dispatch(request("10.0.0.1", "hello"))
        .await
        .expect("us request is served");
    assert_eq!(us.provider, name("openai"));
}

#[tokio::test]
async fn test_uncertified_region_is_a_residency_violation() {
    let (orchestrator, connector) = orchestrator(GEO);

    let error = orchestrator
        .dispatch(request("103.1.1.1", "namaste"))
        .await
        .unwrap_err();

    match error {
        DispatchError::ResidencyViolation { region } => {
            assert_eq!(region.to_string(), "ap-south");
        }
        other => panic!("expected residency violation, got {other:?}"),
    }
    assert!(connector.calls().is_empty());
    assert_eq!(orchestrator.stats().residency_violations, 1);
}

#[tokio::test]
async fn test_redirect_cannot_escape_residency() {
    let (orchestrator, connector) = orchestrator(&format!(
        r#"
        [[routing.rules]]
        id = "redirect-claude"
        name = "Send everything to Claude"
        priority = 1
        action = "redirect"
        target_provider = "anthropic"
        conditions = [{{ field = "model", operator = "equals", value = "gpt-4" }}]
        {GEO}
        "#
    ));

    let error = orchestrator
        .dispatch(request("81.2.3.4", "bonjour"))
        .await
        .unwrap_err();
    assert!(matches!(error, DispatchError::ResidencyViolation { .. }));

    let outcome = orchestrator
        .dispatch(request("10.0.0.1", "hello"))
        .await
        .expect("us redirect is allowed");
    assert_eq!(outcome.provider, name("anthropic"));
    assert_eq!(connector.calls(), vec!["anthropic"]);
}

#[tokio::test(start_paused = true)]
async fn test_identical_requests_share_one_upstream_call() {
    let (orchestrator, connector) =
        orchestrator_with("", MockConnector::with_delay(Duration::from_millis(100)));

    let first = request("10.0.0.1", "same prompt");
    let second = request("10.0.0.2", "same prompt");
    let (first_id, second_id) = (first.request_id, second.request_id);

    let (a, b) = tokio::join!(orchestrator.dispatch(first), orchestrator.dispatch(second));
    let (a, b) = (a.expect("leader succeeds"), b.expect("follower succeeds"));

    assert_eq!(connector.calls().len(), 1);
    assert_eq!(a.response.body, b.response.body);
    assert_eq!(a.request_id, first_id);
    assert_eq!(b.request_id, second_id);
    assert!(!a.deduplicated);
    assert!(b.deduplicated);
    assert_eq!(orchestrator.stats().deduplicated, 1);
    assert_eq!(orchestrator.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_deduplicated_waiters_see_the_same_failure() {
    let (orchestrator, connector) =
        orchestrator_with("", MockConnector::with_delay(Duration::from_millis(100)));
    connector.fail("openai", Failure::Status(503));

    let (a, b) = tokio::join!(
        orchestrator.dispatch(request("10.0.0.1", "same prompt")),
        orchestrator.dispatch(request("10.0.0.1", "same prompt")),
    );
    let (a, b) = (a.unwrap_err(), b.unwrap_err());

    assert_eq!(a, b);
    match a {
        DispatchError::Failed(failure) => {
            assert_eq!(failure.status, Some(503));
            assert_eq!(failure.provider, Some(name("openai")));
        }
        other => panic!("expected upstream failure, got {other:?}"),
    }
    assert_eq!(connector.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_different_payloads_are_not_deduplicated() {
    let (orchestrator, connector) =
        orchestrator_with("", MockConnector::with_delay(Duration::from_millis(100)));

    let (a, b) = tokio::join!(
        orchestrator.dispatch(request("10.0.0.1", "prompt one")),
        orchestrator.dispatch(request("10.0.0.1", "prompt two")),
    );

    assert!(!a.expect("first succeeds").deduplicated);
    assert!(!b.expect("second succeeds").deduplicated);
    assert_eq!(connector.calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_leader_releases_follower_and_slots() {
    let (orchestrator, connector) = orchestrator("");
    connector.fail("openai", Failure::Hang);
    let tenant = TenantId::try_new("acme".to_string()).expect("valid tenant");

    let mut leader = Box::pin(orchestrator.dispatch(request("10.0.0.1", "same prompt")));
    assert!(tokio::time::timeout(Duration::from_millis(10), &mut leader)
        .await
        .is_err());
    assert_eq!(orchestrator.active_requests(&tenant), 1);
    assert_eq!(orchestrator.in_flight(), 1);

    let (_, follower) = tokio::join!(
        async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            drop(leader);
        },
        orchestrator.dispatch(request("10.0.0.1", "same prompt")),
    );

    let error = follower.unwrap_err();
    assert_eq!(failure_kind(&error), Some(FailureKind::Abandoned));
    assert_eq!(orchestrator.active_requests(&tenant), 0);
    assert_eq!(orchestrator.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_tenant_limit_rejects_with_retry_after() {
    let (orchestrator, _connector) = orchestrator_with(
        r#"
        [concurrency]
        tenant_limit = 1
        acquire_timeout_ms = 50
        retry_after_secs = 2
        "#,
        MockConnector::with_delay(Duration::from_millis(500)),
    );

    let mut other_tenant = request("10.0.0.1", "third");
    other_tenant.context = context("gpt-4", "openai", "globex");

    let (a, b, c) = tokio::join!(
        orchestrator.dispatch(request("10.0.0.1", "first")),
        orchestrator.dispatch(request("10.0.0.1", "second")),
        orchestrator.dispatch(other_tenant),
    );

    assert!(a.is_ok());
    assert!(c.is_ok(), "other tenants keep their own slots");
    match b.unwrap_err() {
        DispatchError::ConcurrencyExhausted {
            tenant,
            retry_after,
        } => {
            assert_eq!(tenant.to_string(), "acme");
            assert_eq!(retry_after, Duration::from_secs(2));
        }
        other => panic!("expected concurrency rejection, got {other:?}"),
    }

    let tenant = TenantId::try_new("acme".to_string()).expect("valid tenant");
    assert_eq!(orchestrator.active_requests(&tenant), 0);
    assert_eq!(orchestrator.stats().concurrency_rejections, 1);
}

const FALLBACK_RULE: &str = r#"
[[routing.rules]]
id = "gpt4-pool"
name = "GPT-4 pool"
priority = 1
action = "fallback"
target_provider = "azure"
fallback_providers = ["openai"]
max_retries = 1
conditions = [{ field = "model", operator = "equals", value = "gpt-4" }]
"#;

#[tokio::test]
async fn test_server_error_retries_next_candidate() {
    let (orchestrator, connector) = orchestrator(FALLBACK_RULE);
    connector.fail("azure", Failure::Status(502));

    let outcome = orchestrator
        .dispatch(request("10.0.0.1", "hello"))
        .await
        .expect("fallback succeeds");

    assert_eq!(connector.calls(), vec!["azure", "openai"]);
    assert_eq!(outcome.provider, name("openai"));
    assert_eq!(outcome.attempts, 2);
    assert_eq!(orchestrator.failover().failure_count(&name("azure")), 1);
    assert_eq!(orchestrator.stats().retried, 1);
}

#[tokio::test]
async fn test_retry_budget_bounds_attempts() {
    let (orchestrator, connector) = orchestrator(&FALLBACK_RULE.replace(
        "max_retries = 1",
        "max_retries = 0",
    ));
    connector.fail("azure", Failure::Status(503));

    let error = orchestrator
        .dispatch(request("10.0.0.1", "hello"))
        .await
        .unwrap_err();

    match error {
        DispatchError::Failed(failure) => {
            assert_eq!(failure.kind, FailureKind::Upstream);
            assert_eq!(failure.provider, Some(name("azure")));
            assert_eq!(failure.status, Some(503));
        }
        other => panic!("expected upstream failure, got {other:?}"),
    }
    assert_eq!(connector.calls(), vec!["azure"]);
}

#[tokio::test]
async fn test_client_errors_are_returned_without_retry() {
    let (orchestrator, connector) = orchestrator(FALLBACK_RULE);
    connector.fail("azure", Failure::Status(400));

    let outcome = orchestrator
        .dispatch(request("10.0.0.1", "hello"))
        .await
        .expect("4xx is passed through");

    assert_eq!(outcome.response.status, 400);
    assert_eq!(connector.calls(), vec!["azure"]);
    assert_eq!(orchestrator.failover().failure_count(&name("azure")), 0);
}

#[tokio::test]
async fn test_demoted_provider_is_skipped_until_cooldown() {
    let (orchestrator, connector) = orchestrator(&format!(
        "{FALLBACK_RULE}\n[failover]\nthreshold = 1\ncooldown_secs = 300\n"
    ));
    connector.fail("azure", Failure::Connection);

    let first = orchestrator
        .dispatch(request("10.0.0.1", "one"))
        .await
        .expect("fallback succeeds");
    assert_eq!(first.attempts, 2);
    assert!(!orchestrator.failover().is_healthy(&name("azure")));

    let second = orchestrator
        .dispatch(request("10.0.0.1", "two"))
        .await
        .expect("demoted provider skipped");
    assert_eq!(second.provider, name("openai"));
    assert_eq!(second.attempts, 1);
    assert_eq!(connector.calls(), vec!["azure", "openai", "openai"]);
}

const ROUTE_RULE: &str = r#"
[[routing.rules]]
id = "gpt4-openai-first"
name = "GPT-4 goes to OpenAI"
priority = 1
action = "route"
target_provider = "openai"
fallback_providers = ["azure"]
max_retries = 1
conditions = [{ field = "model", operator = "equals", value = "gpt-4" }]
"#;

#[tokio::test]
async fn test_route_rule_sends_to_its_target_first() {
    let (orchestrator, connector) = orchestrator(ROUTE_RULE);

    let outcome = orchestrator
        .dispatch(request("10.0.0.1", "hello"))
        .await
        .expect("dispatch succeeds");

    // "azure" sorts first and scores the same, but the rule names openai.
    assert_eq!(outcome.provider, name("openai"));
    assert_eq!(outcome.attempts, 1);
    assert_eq!(connector.calls(), vec!["openai"]);

    let plan = orchestrator
        .plan(&request("10.0.0.1", "hello"))
        .expect("plan succeeds");
    assert_eq!(plan.ranked, vec![name("openai"), name("azure")]);
}

#[tokio::test]
async fn test_fallback_rule_ranks_by_sla_score() {
    let (orchestrator, connector) = orchestrator(&ROUTE_RULE.replace(
        "action = \"route\"",
        "action = \"fallback\"",
    ));

    let outcome = orchestrator
        .dispatch(request("10.0.0.1", "hello"))
        .await
        .expect("dispatch succeeds");

    // Equal fresh scores fall back to name order.
    assert_eq!(outcome.provider, name("azure"));
    assert_eq!(connector.calls(), vec!["azure"]);
}

#[tokio::test]
async fn test_route_rule_fails_over_in_preference_order() {
    let (orchestrator, connector) = orchestrator(&format!(
        "{ROUTE_RULE}\n[failover]\nthreshold = 1\ncooldown_secs = 300\n"
    ));
    connector.fail("openai", Failure::Status(503));

    let first = orchestrator
        .dispatch(request("10.0.0.1", "one"))
        .await
        .expect("fallback succeeds");
    assert_eq!(first.provider, name("azure"));
    assert_eq!(first.attempts, 2);

    let second = orchestrator
        .dispatch(request("10.0.0.1", "two"))
        .await
        .expect("demoted target skipped");
    assert_eq!(second.provider, name("azure"));
    assert_eq!(second.attempts, 1);
    assert_eq!(connector.calls(), vec!["openai", "azure", "azure"]);
}

#[tokio::test(start_paused = true)]
async fn test_identical_requests_on_different_routes_are_not_merged() {
    let (orchestrator, connector) =
        orchestrator_with(GEO, MockConnector::with_delay(Duration::from_millis(100)));

    let (eu, us) = tokio::join!(
        orchestrator.dispatch(request("81.1.1.1", "same prompt")),
        orchestrator.dispatch(request("10.0.0.1", "same prompt")),
    );
    let (eu, us) = (eu.expect("eu request served"), us.expect("us request served"));

    assert_eq!(eu.provider, name("azure"));
    assert_eq!(us.provider, name("openai"));
    assert!(!eu.deduplicated);
    assert!(!us.deduplicated);

    let mut calls = connector.calls();
    calls.sort();
    assert_eq!(calls, vec!["azure", "openai"]);
    assert_eq!(orchestrator.stats().deduplicated, 0);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_yields_timeout_and_penalty() {
    let (orchestrator, connector) = orchestrator("[dispatch]\nrequest_timeout_ms = 200\n");
    connector.fail("openai", Failure::Hang);

    let error = orchestrator
        .dispatch(request("10.0.0.1", "hello"))
        .await
        .unwrap_err();

    match &error {
        DispatchError::Failed(failure) => {
            assert_eq!(failure.kind, FailureKind::Timeout);
            assert_eq!(failure.provider, Some(name("openai")));
        }
        other => panic!("expected timeout, got {other:?}"),
    }

    let snapshot = orchestrator.balancer().tracker().snapshot(&name("openai"));
    assert!(snapshot.penalty >= TIMEOUT_PENALTY * 0.99);
    assert_eq!(orchestrator.failover().failure_count(&name("openai")), 1);

    let tenant = TenantId::try_new("acme".to_string()).expect("valid tenant");
    assert_eq!(orchestrator.active_requests(&tenant), 0);
    assert_eq!(orchestrator.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_ledger_access_is_serialized_per_resource() {
    let ledger = Arc::new(CountingLedger::default());
    let connector = Arc::new(MockConnector::with_delay(Duration::from_millis(5)));
    let orchestrator = Orchestrator::new(&settings(""), connector.clone())
        .expect("orchestrator builds")
        .with_ledger(ledger.clone());

    let results = futures_util::future::join_all(
        ["a", "b", "c", "d"]
            .into_iter()
            .map(|payload| orchestrator.dispatch(request("10.0.0.1", payload))),
    )
    .await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(ledger.max_active.load(Ordering::SeqCst), 1);
    assert_eq!(connector.calls().len(), 4);

    let settled = ledger.settled.lock().clone();
    assert_eq!(settled.len(), 4);
    assert!(settled
        .iter()
        .all(|(success, provider)| *success && provider.as_ref() == Some(&name("openai"))));
}

#[tokio::test]
async fn test_ledger_rejection_skips_upstream() {
    let ledger = Arc::new(CountingLedger {
        reject: true,
        ..CountingLedger::default()
    });
    let connector = Arc::new(MockConnector::default());
    let orchestrator = Orchestrator::new(&settings(""), connector.clone())
        .expect("orchestrator builds")
        .with_ledger(ledger.clone());

    let error = orchestrator
        .dispatch(request("10.0.0.1", "hello"))
        .await
        .unwrap_err();

    assert_eq!(failure_kind(&error), Some(FailureKind::Ledger));
    assert!(connector.calls().is_empty());
    assert!(ledger.settled.lock().is_empty());
}

#[tokio::test]
async fn test_reload_swaps_geo_rules_and_keeps_state_on_error() {
    let (orchestrator, _connector) = orchestrator("");
    let plan = orchestrator
        .plan(&request("81.2.3.4", "hello"))
        .expect("plan succeeds");
    assert!(plan.region().is_global());

    orchestrator.reload(&settings(GEO)).expect("valid reload");
    let plan = orchestrator
        .plan(&request("81.2.3.4", "hello"))
        .expect("plan succeeds");
    assert_eq!(plan.region().to_string(), "eu-west");
    assert_eq!(plan.provider, name("azure"));

    let broken = settings(&GEO.replace("81.0.0.0/8", "81.0.0.0/40"));
    assert!(orchestrator.reload(&broken).is_err());
    let plan = orchestrator
        .plan(&request("81.2.3.4", "hello"))
        .expect("plan succeeds");
    assert_eq!(plan.region().to_string(), "eu-west");
}

#[tokio::test]
async fn test_health_checks_zero_unhealthy_scores() {
    let (orchestrator, connector) = orchestrator("");
    connector.mark_unhealthy("anthropic");

    let (monitor, _shutdown) = HealthMonitor::new(Arc::clone(&orchestrator), Duration::from_secs(30));
    assert_eq!(monitor.probe_all().await, 2);

    assert_eq!(orchestrator.balancer().score(&name("anthropic")).score, 0.0);
    assert!(orchestrator.balancer().score(&name("openai")).score > 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_health_monitor_stops_on_shutdown() {
    let (orchestrator, connector) = orchestrator("");
    connector.mark_unhealthy("openai");

    let (monitor, shutdown) = HealthMonitor::new(Arc::clone(&orchestrator), Duration::from_secs(1));
    let handle = tokio::spawn(monitor.run());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(orchestrator.balancer().score(&name("openai")).score, 0.0);

    shutdown.send(()).await.expect("monitor is listening");
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("monitor stops")
        .expect("monitor task does not panic");
}
