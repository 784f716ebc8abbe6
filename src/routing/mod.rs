//! Routing rule engine
//!
//! Operators define ordered, prioritized rules that route, block, redirect
//! or fan a request out to fallbacks. Evaluation yields a
//! [`RoutingDecision`] with a human-readable justification.

pub mod condition;
pub mod engine;
pub mod rule;

pub use condition::{Condition, Operator};
pub use engine::{RuleEngine, RuleError};
pub use rule::{Rule, RuleAction, RoutingDecision, NO_RULES_MATCHED};
