//! Reusable field constraints
//!
//! Each constraint is a closure `(property, value) -> Result<(), message>`
//! registered per property with `EntityBuilder::constraint`. Constraints
//! only judge values of their own kind and let everything else through, so
//! they compose freely.

use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use validator::{ValidateEmail, ValidateUrl};

/// A registered field constraint
pub type FieldConstraint = Arc<dyn Fn(&str, &Value) -> Result<(), String> + Send + Sync>;

/// Constraint: value is present and not null
pub fn required() -> impl Fn(&str, &Value) -> Result<(), String> + Send + Sync + Clone {
    |field: &str, value: &Value| {
        if value.is_null() {
            Err(format!("'{}' should not be null", field))
        } else {
            Ok(())
        }
    }
}

/// Constraint: string is not empty once trimmed
pub fn not_blank() -> impl Fn(&str, &Value) -> Result<(), String> + Send + Sync + Clone {
    |field: &str, value: &Value| match value {
        Value::Null => Err(format!("'{}' should not be blank", field)),
        Value::String(s) if s.trim().is_empty() => {
            Err(format!("'{}' should not be blank", field))
        }
        _ => Ok(()),
    }
}

/// Constraint: number must be positive
pub fn positive() -> impl Fn(&str, &Value) -> Result<(), String> + Send + Sync + Clone {
    |field: &str, value: &Value| match value.as_f64() {
        Some(num) if num <= 0.0 => Err(format!(
            "'{}' should be positive (got {})",
            field, num
        )),
        _ => Ok(()),
    }
}

/// Constraint: string length (in characters) must be within range
pub fn string_length(
    min: usize,
    max: usize,
) -> impl Fn(&str, &Value) -> Result<(), String> + Send + Sync + Clone {
    move |field: &str, value: &Value| {
        let Some(s) = value.as_str() else {
            return Ok(());
        };
        let len = s.chars().count();
        if len < min {
            Err(format!(
                "'{}' should have at least {} characters (got {})",
                field, min, len
            ))
        } else if len > max {
            Err(format!(
                "'{}' should have at most {} characters (got {})",
                field, max, len
            ))
        } else {
            Ok(())
        }
    }
}

/// Constraint: number must not exceed maximum
pub fn max_value(max: f64) -> impl Fn(&str, &Value) -> Result<(), String> + Send + Sync + Clone {
    move |field: &str, value: &Value| match value.as_f64() {
        Some(num) if num > max => Err(format!(
            "'{}' should not exceed {} (got {})",
            field, max, num
        )),
        _ => Ok(()),
    }
}

/// Constraint: string must be one of the allowed values
pub fn in_list(
    allowed: Vec<String>,
) -> impl Fn(&str, &Value) -> Result<(), String> + Send + Sync + Clone {
    move |field: &str, value: &Value| match value.as_str() {
        Some(s) if !allowed.iter().any(|a| a == s) => Err(format!(
            "'{}' should be one of {:?} (got {})",
            field, allowed, s
        )),
        _ => Ok(()),
    }
}

/// Constraint: string must parse as a date with the given format
pub fn date_format(
    format: &'static str,
) -> impl Fn(&str, &Value) -> Result<(), String> + Send + Sync + Clone {
    move |field: &str, value: &Value| match value.as_str() {
        Some(s) if chrono::NaiveDate::parse_from_str(s, format).is_err() => Err(format!(
            "'{}' should match the date format {} (got {})",
            field, format, s
        )),
        _ => Ok(()),
    }
}

/// Constraint: string must be an email address
pub fn email() -> impl Fn(&str, &Value) -> Result<(), String> + Send + Sync + Clone {
    |field: &str, value: &Value| match value.as_str() {
        Some(s) if !s.validate_email() => {
            Err(format!("'{}' should be a valid email address", field))
        }
        _ => Ok(()),
    }
}

/// Constraint: string must be an absolute URL
pub fn url() -> impl Fn(&str, &Value) -> Result<(), String> + Send + Sync + Clone {
    |field: &str, value: &Value| match value.as_str() {
        Some(s) if !s.validate_url() => Err(format!("'{}' should be a valid URL", field)),
        _ => Ok(()),
    }
}

/// Constraint: string must match a regular expression
pub fn pattern(regex: Regex) -> impl Fn(&str, &Value) -> Result<(), String> + Send + Sync + Clone {
    move |field: &str, value: &Value| match value.as_str() {
        Some(s) if !regex.is_match(s) => Err(format!(
            "'{}' should match the pattern {}",
            field,
            regex.as_str()
        )),
        _ => Ok(()),
    }
}
