//! Lenient coercion of loosely-typed JSON values.
//!
//! Stored settings and remote payloads come from publishers we don't
//! control. These helpers never fail: anything unusable becomes `None`.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// A finite number from a JSON number or a numeric string.
pub fn as_f64(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    number.filter(|n| n.is_finite())
}

/// A non-negative integer; fractional input is truncated.
pub fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0)
                .map(|f| f as u64)
        }),
        Value::String(_) => as_f64(value).filter(|f| *f >= 0.0).map(|f| f as u64),
        _ => None,
    }
}

/// `true`/`false`, their string forms, or a number (non-zero is true).
pub fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Some(true),
            "false" | "0" | "no" | "off" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        _ => None,
    }
}

/// A trimmed string. Numbers and booleans are not stringified.
pub fn as_string(value: &Value) -> Option<String> {
    value.as_str().map(|s| s.trim().to_string())
}

/// Serde adapter: accept a number or numeric string, anything else is unset.
pub fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(as_f64))
}

/// Serde adapter for loosely-typed flags.
pub fn lenient_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(as_bool))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numbers_from_strings() {
        assert_eq!(as_f64(&json!("2.5")), Some(2.5));
        assert_eq!(as_f64(&json!(" 7 ")), Some(7.0));
        assert_eq!(as_f64(&json!("abc")), None);
        assert_eq!(as_f64(&json!("NaN")), None);
        assert_eq!(as_f64(&Value::Null), None);
    }

    #[test]
    fn test_unsigned_rejects_negative() {
        assert_eq!(as_u64(&json!(30)), Some(30));
        assert_eq!(as_u64(&json!("1500")), Some(1500));
        assert_eq!(as_u64(&json!(-1)), None);
        assert_eq!(as_u64(&json!("-5")), None);
        assert_eq!(as_u64(&json!(2.9)), Some(2));
    }

    #[test]
    fn test_bool_forms() {
        assert_eq!(as_bool(&json!(true)), Some(true));
        assert_eq!(as_bool(&json!("false")), Some(false));
        assert_eq!(as_bool(&json!(0)), Some(false));
        assert_eq!(as_bool(&json!("maybe")), None);
    }
}
