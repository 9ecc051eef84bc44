//! Field checks shared by the agent variants' `check_input`. Each check logs
//! and returns the offending field.

use serde_json::Value;
use tracing::error;

pub(crate) type FieldCheck = std::result::Result<(), String>;

fn present<'a>(agent: &str, data: &'a Value, field: &str) -> std::result::Result<&'a Value, String> {
    match data.get(field) {
        Some(value) if !value.is_null() => Ok(value),
        _ => {
            error!(agent, field, "Missing required field");
            Err(format!("missing required field `{}`", field))
        }
    }
}

fn invalid(agent: &str, field: &str) -> FieldCheck {
    error!(agent, field, "Invalid value for field");
    Err(format!("invalid value for field `{}`", field))
}

pub(crate) fn require_str(agent: &str, data: &Value, field: &str) -> FieldCheck {
    match present(agent, data, field)? {
        Value::String(s) if !s.trim().is_empty() => Ok(()),
        _ => invalid(agent, field),
    }
}

/// Integer no smaller than `min`.
pub(crate) fn require_count(agent: &str, data: &Value, field: &str, min: u64) -> FieldCheck {
    match present(agent, data, field)?.as_u64() {
        Some(n) if n >= min => Ok(()),
        _ => invalid(agent, field),
    }
}

pub(crate) fn require_positive(agent: &str, data: &Value, field: &str) -> FieldCheck {
    match present(agent, data, field)?.as_f64() {
        Some(n) if n > 0.0 && n.is_finite() => Ok(()),
        _ => invalid(agent, field),
    }
}

pub(crate) fn require_number(agent: &str, data: &Value, field: &str) -> FieldCheck {
    match present(agent, data, field)?.as_f64() {
        Some(n) if n.is_finite() => Ok(()),
        _ => invalid(agent, field),
    }
}

pub(crate) fn require_object(agent: &str, data: &Value, field: &str) -> FieldCheck {
    match present(agent, data, field)? {
        Value::Object(_) => Ok(()),
        _ => invalid(agent, field),
    }
}

pub(crate) fn str_or<'a>(data: &'a Value, field: &str, default: &'a str) -> &'a str {
    data.get(field).and_then(Value::as_str).unwrap_or(default)
}

pub(crate) fn f64_or(data: &Value, field: &str, default: f64) -> f64 {
    data.get(field).and_then(Value::as_f64).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_null_counts_as_missing() {
        let data = json!({"address": null});
        assert_eq!(
            require_str("test", &data, "address"),
            Err("missing required field `address`".to_string())
        );
        assert!(require_str("test", &data, "city").is_err());
    }

    #[test]
    fn test_count_rejects_fractions_and_negatives() {
        assert!(require_count("test", &json!({"n": 3}), "n", 0).is_ok());
        assert!(require_count("test", &json!({"n": 2.5}), "n", 0).is_err());
        assert!(require_count("test", &json!({"n": -1}), "n", 0).is_err());
        assert_eq!(
            require_count("test", &json!({"n": 0}), "n", 1),
            Err("invalid value for field `n`".to_string())
        );
    }

    #[test]
    fn test_positive_and_number() {
        assert!(require_positive("test", &json!({"x": 1.5}), "x").is_ok());
        assert!(require_positive("test", &json!({"x": 0}), "x").is_err());
        assert!(require_positive("test", &json!({"x": "1"}), "x").is_err());
        assert!(require_number("test", &json!({"x": -2}), "x").is_ok());
    }
}
