//! Predicate evaluation: every condition must hold for the rule to match.
//!
//! Matching is forgiving about scalar representation (a payload `42` matches
//! a condition value `"42"`) but strict about presence: a missing payload
//! field never matches, including for `NotEquals`.

use serde_json::{Map, Value};

use crate::domain::rule::{Condition, ConditionOperator, Predicate};

impl Predicate {
    pub fn matches(&self, payload: &Map<String, Value>) -> bool {
        self.conditions.iter().all(|condition| condition_matches(condition, payload))
    }
}

fn condition_matches(condition: &Condition, payload: &Map<String, Value>) -> bool {
    let Some(actual) = payload.get(&condition.field) else {
        return false;
    };

    match condition.operator {
        ConditionOperator::Equals => scalar_eq(actual, &condition.value),
        ConditionOperator::NotEquals => !scalar_eq(actual, &condition.value),
        ConditionOperator::Contains => contains(actual, &condition.value),
        ConditionOperator::GreaterThan => compare(actual, &condition.value)
            .is_some_and(|ordering| ordering == std::cmp::Ordering::Greater),
        ConditionOperator::LessThan => compare(actual, &condition.value)
            .is_some_and(|ordering| ordering == std::cmp::Ordering::Less),
    }
}

fn scalar_eq(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    match (as_number(actual), as_number(expected)) {
        (Some(left), Some(right)) => left == right,
        _ => as_text(actual).zip(as_text(expected)).is_some_and(|(left, right)| left == right),
    }
}

/// Case-insensitive substring match for strings; membership for arrays.
fn contains(actual: &Value, needle: &Value) -> bool {
    match actual {
        Value::String(haystack) => as_text(needle)
            .is_some_and(|needle| haystack.to_lowercase().contains(&needle.to_lowercase())),
        Value::Array(items) => items.iter().any(|item| scalar_eq(item, needle)),
        _ => false,
    }
}

/// Numeric comparison when both sides parse as numbers, otherwise None.
fn compare(actual: &Value, expected: &Value) -> Option<std::cmp::Ordering> {
    let left = as_number(actual)?;
    let right = as_number(expected)?;
    left.partial_cmp(&right)
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}
