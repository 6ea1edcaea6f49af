//! Input filters applied while cleaning write payloads
//!
//! Filters transform scalar values before validation. Each one must be
//! idempotent: cleaning an already-clean payload must not change it.

use anyhow::Result;
use serde_json::{Value, json};
use std::sync::Arc;

/// A registered input filter
pub type InputFilter = Arc<dyn Fn(&str, Value) -> Result<Value> + Send + Sync>;

/// Filter: trim whitespace from string
pub fn trim() -> impl Fn(&str, Value) -> Result<Value> + Send + Sync + Clone {
    |_: &str, value: Value| match value {
        Value::String(s) => Ok(Value::String(s.trim().to_string())),
        other => Ok(other),
    }
}

/// Filter: convert string to uppercase
pub fn uppercase() -> impl Fn(&str, Value) -> Result<Value> + Send + Sync + Clone {
    |_: &str, value: Value| match value {
        Value::String(s) => Ok(Value::String(s.to_uppercase())),
        other => Ok(other),
    }
}

/// Filter: convert string to lowercase
pub fn lowercase() -> impl Fn(&str, Value) -> Result<Value> + Send + Sync + Clone {
    |_: &str, value: Value| match value {
        Value::String(s) => Ok(Value::String(s.to_lowercase())),
        other => Ok(other),
    }
}

/// Filter: round number to specified decimal places
pub fn round_decimals(decimals: u32) -> impl Fn(&str, Value) -> Result<Value> + Send + Sync + Clone {
    move |field: &str, value: Value| {
        if !value.is_number() {
            return Ok(value);
        }
        let num = value
            .as_f64()
            .ok_or_else(|| anyhow::anyhow!("'{}' is not representable as f64", field))?;
        let factor = 10_f64.powi(decimals as i32);
        Ok(json!((num * factor).round() / factor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim() {
        let f = trim();
        assert_eq!(f("name", json!("  hello  ")).unwrap(), json!("hello"));
        assert_eq!(f("age", json!(42)).unwrap(), json!(42));
        assert_eq!(f("name", json!(null)).unwrap(), json!(null));
    }

    #[test]
    fn test_case_filters() {
        assert_eq!(uppercase()("code", json!("Hello")).unwrap(), json!("HELLO"));
        assert_eq!(lowercase()("email", json!("Ada@EXAMPLE.com")).unwrap(), json!("ada@example.com"));
        assert_eq!(lowercase()("flag", json!(true)).unwrap(), json!(true));
    }

    #[test]
    fn test_round_decimals() {
        let f = round_decimals(2);
        assert_eq!(f("price", json!(3.14159)).unwrap(), json!(3.14));
        assert_eq!(f("name", json!("x")).unwrap(), json!("x"));
    }

    #[test]
    fn test_filters_are_idempotent() {
        let f = round_decimals(1);
        let once = f("price", json!(2.55)).unwrap();
        assert_eq!(f("price", once.clone()).unwrap(), once);

        let t = trim();
        let once = t("name", json!("  x ")).unwrap();
        assert_eq!(t("name", once.clone()).unwrap(), once);
    }
}
