//! Priority-ordered rule evaluation
//!
//! The rule set is held as an immutable, priority-sorted snapshot behind an
//! `Arc`. Mutations build a new snapshot and swap it in under a brief write
//! lock, so concurrent evaluations only ever see a complete, sorted rule list
//! and never wait for an admin mutation to finish.

use super::rule::{Rule, RoutingDecision};
use crate::domain::{RoutingContext, RuleId};
use chrono::Utc;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised by rule mutations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuleError {
    #[error("Rule already exists: {0}")]
    Duplicate(RuleId),

    #[error("Rule not found: {0}")]
    NotFound(RuleId),
}

/// Evaluates routing rules against request contexts
#[derive(Debug, Default)]
pub struct RuleEngine {
    rules: RwLock<Arc<Vec<Rule>>>,
}

impl RuleEngine {
    /// Create an engine with no rules
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an engine seeded with an initial rule set
    pub fn with_rules(rules: Vec<Rule>) -> Result<Self, RuleError> {
        let engine = Self::new();
        for rule in rules {
            engine.add_rule(rule)?;
        }
        Ok(engine)
    }

    /// Add a new rule; created and updated timestamps are stamped now
    pub fn add_rule(&self, mut rule: Rule) -> Result<(), RuleError> {
        let now = Utc::now();
        rule.created_at = now;
        rule.updated_at = now;

        self.mutate(|rules| {
            if rules.iter().any(|r| r.id == rule.id) {
                return Err(RuleError::Duplicate(rule.id.clone()));
            }
            debug!(rule_id = %rule.id, priority = rule.priority, "Adding routing rule");
            rules.push(rule);
            Ok(())
        })
    }

    /// Replace an existing rule, keeping its original creation timestamp
    pub fn update_rule(&self, mut rule: Rule) -> Result<(), RuleError> {
        self.mutate(|rules| {
            let existing = rules
                .iter_mut()
                .find(|r| r.id == rule.id)
                .ok_or_else(|| RuleError::NotFound(rule.id.clone()))?;
            rule.created_at = existing.created_at;
            rule.updated_at = Utc::now();
            debug!(rule_id = %rule.id, priority = rule.priority, "Updating routing rule");
            *existing = rule;
            Ok(())
        })
    }

    /// Remove a rule by id
    pub fn delete_rule(&self, id: &RuleId) -> Result<Rule, RuleError> {
        self.mutate(|rules| {
            let index = rules
                .iter()
                .position(|r| &r.id == id)
                .ok_or_else(|| RuleError::NotFound(id.clone()))?;
            debug!(rule_id = %id, "Deleting routing rule");
            Ok(rules.remove(index))
        })
    }

    pub fn get_rule(&self, id: &RuleId) -> Option<Rule> {
        self.snapshot().iter().find(|r| &r.id == id).cloned()
    }

    /// All rules in evaluation (ascending priority) order
    pub fn list_rules(&self) -> Vec<Rule> {
        self.snapshot().as_ref().clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Evaluate the rule set; the first enabled rule whose conditions all hold wins
    pub fn evaluate(&self, context: &RoutingContext) -> RoutingDecision {
        let started = Instant::now();
        let rules = self.snapshot();

        let decision = rules
            .iter()
            .filter(|rule| rule.enabled)
            .find(|rule| rule.matches(context))
            .map(|rule| RoutingDecision::from_rule(rule, context, started.elapsed()))
            .unwrap_or_else(|| RoutingDecision::default_for(context, started.elapsed()));

        info!(
            rule_id = decision.rule_id.as_ref().map(|id| id.as_ref()).unwrap_or("-"),
            action = %decision.action,
            target = %decision.provider,
            model = %context.model(),
            tenant = %context.tenant(),
            elapsed_us = decision.evaluation_time.as_micros() as u64,
            reason = %decision.reason,
            "Routing rules evaluated"
        );

        decision
    }

    fn snapshot(&self) -> Arc<Vec<Rule>> {
        Arc::clone(&self.rules.read())
    }

    /// Apply a mutation to a copy of the rule set, re-sort, and publish it
    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut Vec<Rule>) -> Result<T, RuleError>,
    ) -> Result<T, RuleError> {
        let mut guard = self.rules.write();
        let mut next = guard.as_ref().clone();
        let result = f(&mut next)?;
        next.sort_by_key(|rule| rule.priority);
        *guard = Arc::new(next);
        Ok(result)
    }
}
