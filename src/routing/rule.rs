//! Routing rules and the decisions they produce

use super::condition::Condition;
use crate::domain::{ModelName, ProviderName, RoutingContext, RuleId};
use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reason attached to the default decision
pub const NO_RULES_MATCHED: &str = "no rules matched";

/// What a matched rule asks the gateway to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    /// Send the request to the target provider
    #[display("route")]
    Route,
    /// Reject the request outright
    #[display("block")]
    Block,
    /// Send the request to a different provider and/or model, bypassing balancing
    #[display("redirect")]
    Redirect,
    /// Let the balancer choose among the target and its fallbacks
    #[display("fallback")]
    Fallback,
}

fn enabled_by_default() -> bool {
    true
}

/// An operator-defined routing rule
///
/// Conditions are combined with AND semantics; a rule without conditions
/// matches every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    pub name: String,
    /// Lower values are evaluated first
    pub priority: i32,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub action: RuleAction,
    #[serde(default)]
    pub target_provider: Option<ProviderName>,
    #[serde(default)]
    pub target_model: Option<ModelName>,
    #[serde(default)]
    pub fallback_providers: Vec<ProviderName>,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Rule {
    /// Create an enabled rule with no conditions
    pub fn new(id: RuleId, name: impl Into<String>, priority: i32, action: RuleAction) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            priority,
            enabled: true,
            conditions: Vec::new(),
            action,
            target_provider: None,
            target_model: None,
            fallback_providers: Vec::new(),
            max_retries: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_target_provider(mut self, provider: ProviderName) -> Self {
        self.target_provider = Some(provider);
        self
    }

    pub fn with_target_model(mut self, model: ModelName) -> Self {
        self.target_model = Some(model);
        self
    }

    pub fn with_fallbacks(mut self, fallbacks: Vec<ProviderName>) -> Self {
        self.fallback_providers = fallbacks;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Whether every condition holds for the context
    pub fn matches(&self, context: &RoutingContext) -> bool {
        self.conditions.iter().all(|c| c.matches(context))
    }
}

/// Outcome of evaluating the rule set against one request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingDecision {
    pub rule_id: Option<RuleId>,
    pub rule_name: Option<String>,
    pub action: RuleAction,
    pub provider: ProviderName,
    pub model: Option<ModelName>,
    pub fallback_providers: Vec<ProviderName>,
    pub max_retries: u32,
    pub reason: String,
    pub evaluation_time: Duration,
}

impl RoutingDecision {
    /// Decision used when no rule matched: route to the requested provider
    pub fn default_for(context: &RoutingContext, evaluation_time: Duration) -> Self {
        Self {
            rule_id: None,
            rule_name: None,
            action: RuleAction::Route,
            provider: context.provider().clone(),
            model: None,
            fallback_providers: Vec::new(),
            max_retries: 0,
            reason: NO_RULES_MATCHED.to_string(),
            evaluation_time,
        }
    }

    pub(crate) fn from_rule(
        rule: &Rule,
        context: &RoutingContext,
        evaluation_time: Duration,
    ) -> Self {
        Self {
            rule_id: Some(rule.id.clone()),
            rule_name: Some(rule.name.clone()),
            action: rule.action,
            provider: rule
                .target_provider
                .clone()
                .unwrap_or_else(|| context.provider().clone()),
            model: rule.target_model.clone(),
            fallback_providers: rule.fallback_providers.clone(),
            max_retries: rule.max_retries,
            reason: format!(
                "matched rule '{}' (priority {}, {} conditions)",
                rule.name,
                rule.priority,
                rule.conditions.len()
            ),
            evaluation_time,
        }
    }

    /// Whether a rule (rather than the default) produced this decision
    pub fn is_rule_match(&self) -> bool {
        self.rule_id.is_some()
    }

    /// Target provider followed by its fallbacks, without duplicates
    pub fn preference_order(&self) -> Vec<ProviderName> {
        let mut order = vec![self.provider.clone()];
        for fallback in &self.fallback_providers {
            if !order.contains(fallback) {
                order.push(fallback.clone());
            }
        }
        order
    }
}
