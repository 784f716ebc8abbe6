//! Rule conditions and their evaluation against a [`RoutingContext`]
//!
//! Conditions never fail: an unknown field resolves to an empty value and an
//! unknown operator or non-numeric operand simply does not match. A single
//! malformed rule therefore degrades to a non-match instead of breaking
//! evaluation for every request.

use crate::domain::RoutingContext;
use chrono::{Datelike, Timelike};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use tracing::{debug, warn};

/// Prefixes accepted for tag lookups (`tag.env`, `tags.env`)
const TAG_PREFIXES: [&str; 2] = ["tag.", "tags."];

/// Comparison operator of a [`Condition`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    #[display("equals")]
    Equals,
    #[display("not_equals")]
    NotEquals,
    #[display("contains")]
    Contains,
    #[display("starts_with")]
    StartsWith,
    #[display("greater_than")]
    GreaterThan,
    #[display("greater_than_or_equal")]
    GreaterThanOrEqual,
    #[display("less_than")]
    LessThan,
    #[display("less_than_or_equal")]
    LessThanOrEqual,
    #[display("in")]
    In,
    #[display("not_in")]
    NotIn,
    /// Anything the engine does not understand; never matches
    #[serde(other)]
    #[display("unknown")]
    Unknown,
}

/// A single `(field, operator, value)` test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    pub value: Value,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    /// Check the condition against a request context
    pub fn matches(&self, context: &RoutingContext) -> bool {
        let actual = resolve_field(context, &self.field);

        match self.operator {
            Operator::Equals => actual == value_to_string(&self.value),
            Operator::NotEquals => actual != value_to_string(&self.value),
            Operator::Contains => actual.contains(&*value_to_string(&self.value)),
            Operator::StartsWith => actual.starts_with(&*value_to_string(&self.value)),
            Operator::GreaterThan => self.compare_numeric(&actual, |a, b| a > b),
            Operator::GreaterThanOrEqual => self.compare_numeric(&actual, |a, b| a >= b),
            Operator::LessThan => self.compare_numeric(&actual, |a, b| a < b),
            Operator::LessThanOrEqual => self.compare_numeric(&actual, |a, b| a <= b),
            Operator::In => value_list(&self.value).iter().any(|item| *item == actual),
            Operator::NotIn => !value_list(&self.value).iter().any(|item| *item == actual),
            Operator::Unknown => {
                warn!(
                    field = %self.field,
                    "Unknown operator in routing condition, treating as non-match"
                );
                false
            }
        }
    }

    fn compare_numeric(&self, actual: &str, cmp: impl Fn(f64, f64) -> bool) -> bool {
        let Ok(left) = actual.trim().parse::<f64>() else {
            debug!(field = %self.field, value = %actual, "Non-numeric field value in numeric comparison");
            return false;
        };
        let Some(right) = value_to_f64(&self.value) else {
            debug!(field = %self.field, "Non-numeric condition value in numeric comparison");
            return false;
        };
        cmp(left, right)
    }
}

/// Resolve a context field by name; unknown fields resolve to an empty string
pub fn resolve_field<'a>(context: &'a RoutingContext, field: &str) -> Cow<'a, str> {
    for prefix in TAG_PREFIXES {
        if let Some(key) = field.strip_prefix(prefix) {
            return Cow::Borrowed(context.tag(key).unwrap_or_default());
        }
    }

    match field {
        "model" => Cow::Borrowed(context.model().as_ref()),
        "provider" => Cow::Borrowed(context.provider().as_ref()),
        "team" | "team_id" | "tenant" | "tenant_id" => Cow::Borrowed(context.tenant().as_ref()),
        "user" | "user_id" => Cow::Borrowed(context.user().map(|u| u.as_ref()).unwrap_or_default()),
        "input_tokens" | "estimated_tokens" => Cow::Owned(context.input_tokens().to_string()),
        "max_tokens" => Cow::Owned(context.max_output_tokens().to_string()),
        "total_tokens" => Cow::Owned(context.total_tokens().to_string()),
        "free_tier" | "is_free_tier" => Cow::Borrowed(if context.is_free_tier() {
            "true"
        } else {
            "false"
        }),
        "hour" => Cow::Owned(context.timestamp().hour().to_string()),
        "weekday" => Cow::Owned(context.timestamp().weekday().to_string().to_lowercase()),
        _ => {
            debug!(field = %field, "Unknown routing context field, resolving to empty value");
            Cow::Borrowed("")
        }
    }
}

fn value_to_string(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(s) => Cow::Borrowed(s.as_str()),
        Value::Null => Cow::Borrowed(""),
        Value::Bool(b) => Cow::Borrowed(if *b { "true" } else { "false" }),
        Value::Number(n) => Cow::Owned(n.to_string()),
        other => Cow::Owned(other.to_string()),
    }
}

fn value_to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Interpret a condition value as a list of strings
///
/// Accepts a JSON array, a string holding a JSON array, or a comma-separated
/// string.
fn value_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| value_to_string(item).into_owned())
            .collect(),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.starts_with('[') {
                if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(trimmed) {
                    return items
                        .iter()
                        .map(|item| value_to_string(item).into_owned())
                        .collect();
                }
            }
            trimmed
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect()
        }
        Value::Null => Vec::new(),
        other => vec![value_to_string(other).into_owned()],
    }
}
