//! Tracking-condition matching
//!
//! An action's `tracking_conditions` is a JSON object. Every key must be
//! present in the event attributes and equal the condition value; an array
//! condition means "any of these values". Absent or empty conditions match
//! every event.

use serde_json::{Map, Value};

/// Whether `attributes` satisfy `conditions`
pub fn conditions_match(conditions: Option<&Value>, attributes: &Map<String, Value>) -> bool {
    let conditions = match conditions {
        None | Some(Value::Null) => return true,
        Some(Value::Object(map)) => map,
        // Non-object conditions are rejected on write; treat legacy rows as unmatched
        Some(_) => return false,
    };

    conditions.iter().all(|(key, expected)| match attributes.get(key) {
        None => false,
        Some(actual) => value_matches(expected, actual),
    })
}

fn value_matches(expected: &Value, actual: &Value) -> bool {
    match expected {
        Value::Array(allowed) => allowed.iter().any(|v| scalar_eq(v, actual)),
        other => scalar_eq(other, actual),
    }
}

/// Equality that treats `3` and `3.0` as the same number
fn scalar_eq(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => a == b,
        },
        _ => expected == actual,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("attributes must be an object"),
        }
    }

    #[test]
    fn test_no_conditions_matches_everything() {
        assert!(conditions_match(None, &Map::new()));
        assert!(conditions_match(Some(&Value::Null), &attrs(json!({"game": "poker"}))));
        assert!(conditions_match(Some(&json!({})), &Map::new()));
    }

    #[test]
    fn test_equality_conditions() {
        let conditions = json!({"game": "poker", "stake": 10});
        assert!(conditions_match(
            Some(&conditions),
            &attrs(json!({"game": "poker", "stake": 10, "table": 4}))
        ));
        assert!(!conditions_match(Some(&conditions), &attrs(json!({"game": "poker", "stake": 20}))));
        assert!(!conditions_match(Some(&conditions), &attrs(json!({"game": "poker"}))));
    }

    #[test]
    fn test_array_condition_means_any_of() {
        let conditions = json!({"game": ["poker", "blackjack"]});
        assert!(conditions_match(Some(&conditions), &attrs(json!({"game": "blackjack"}))));
        assert!(!conditions_match(Some(&conditions), &attrs(json!({"game": "slots"}))));
    }

    #[test]
    fn test_numeric_equality_ignores_representation() {
        let conditions = json!({"stake": 3});
        assert!(conditions_match(Some(&conditions), &attrs(json!({"stake": 3.0}))));
    }

    #[test]
    fn test_non_object_conditions_never_match() {
        assert!(!conditions_match(Some(&json!("poker")), &attrs(json!({"game": "poker"}))));
    }
}
