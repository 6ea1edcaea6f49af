//! Scalar column types and values

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use uuid::Uuid;

/// Storage type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    String,
    Integer,
    Float,
    Boolean,
    Uuid,
    DateTime,
    Json,
}

impl ScalarType {
    /// Postgres column type used by the SQL backend
    pub fn sql_type(&self) -> &'static str {
        match self {
            ScalarType::String => "TEXT",
            ScalarType::Integer => "BIGINT",
            ScalarType::Float => "DOUBLE PRECISION",
            ScalarType::Boolean => "BOOLEAN",
            ScalarType::Uuid => "UUID",
            ScalarType::DateTime => "TIMESTAMPTZ",
            ScalarType::Json => "JSONB",
        }
    }
}

/// A polymorphic column value
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Uuid(Uuid),
    DateTime(DateTime<Utc>),
    Json(Value),
    Null,
}

impl FieldValue {
    /// Get the value as a string if possible
    pub fn as_string(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get the value as an integer if possible
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Coerce a JSON value into the given column type
    ///
    /// Strings are accepted for every non-string type and parsed, which is
    /// what query-string filters and form-encoded clients send.
    pub fn from_json(value: &Value, ty: ScalarType) -> Result<FieldValue, String> {
        if value.is_null() {
            return Ok(FieldValue::Null);
        }
        let mismatch = || format!("expected {:?}, got {}", ty, value);

        match ty {
            ScalarType::String => value
                .as_str()
                .map(|s| FieldValue::String(s.to_string()))
                .ok_or_else(mismatch),
            ScalarType::Integer => match value {
                Value::Number(n) => n.as_i64().map(FieldValue::Integer).ok_or_else(mismatch),
                Value::String(s) => s.trim().parse().map(FieldValue::Integer).map_err(|_| mismatch()),
                _ => Err(mismatch()),
            },
            ScalarType::Float => match value {
                Value::Number(n) => n.as_f64().map(FieldValue::Float).ok_or_else(mismatch),
                Value::String(s) => s.trim().parse().map(FieldValue::Float).map_err(|_| mismatch()),
                _ => Err(mismatch()),
            },
            ScalarType::Boolean => match value {
                Value::Bool(b) => Ok(FieldValue::Boolean(*b)),
                Value::String(s) if s == "true" || s == "1" => Ok(FieldValue::Boolean(true)),
                Value::String(s) if s == "false" || s == "0" => Ok(FieldValue::Boolean(false)),
                _ => Err(mismatch()),
            },
            ScalarType::Uuid => value
                .as_str()
                .and_then(|s| Uuid::parse_str(s).ok())
                .map(FieldValue::Uuid)
                .ok_or_else(mismatch),
            ScalarType::DateTime => value
                .as_str()
                .and_then(parse_datetime)
                .map(FieldValue::DateTime)
                .ok_or_else(mismatch),
            ScalarType::Json => Ok(FieldValue::Json(value.clone())),
        }
    }

    /// Render the value the way the API emits it
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::String(s) => Value::String(s.clone()),
            FieldValue::Integer(i) => Value::from(*i),
            FieldValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            FieldValue::Boolean(b) => Value::Bool(*b),
            FieldValue::Uuid(u) => Value::String(u.to_string()),
            FieldValue::DateTime(d) => Value::String(d.to_rfc3339_opts(SecondsFormat::Secs, true)),
            FieldValue::Json(v) => v.clone(),
            FieldValue::Null => Value::Null,
        }
    }

    /// Textual form used by LIKE matching
    pub fn as_text(&self) -> Option<String> {
        match self {
            FieldValue::String(s) => Some(s.clone()),
            FieldValue::Null => None,
            FieldValue::Json(v) => Some(v.to_string()),
            other => match other.to_json() {
                Value::String(s) => Some(s),
                v => Some(v.to_string()),
            },
        }
    }

    /// Total ordering used for in-memory sorting; nulls sort first
    pub fn sort_cmp(&self, other: &FieldValue) -> Ordering {
        match (self, other) {
            (FieldValue::Null, FieldValue::Null) => Ordering::Equal,
            (FieldValue::Null, _) => Ordering::Less,
            (_, FieldValue::Null) => Ordering::Greater,
            (FieldValue::Integer(a), FieldValue::Integer(b)) => a.cmp(b),
            (FieldValue::Float(a), FieldValue::Float(b)) => a.total_cmp(b),
            (FieldValue::Integer(a), FieldValue::Float(b)) => (*a as f64).total_cmp(b),
            (FieldValue::Float(a), FieldValue::Integer(b)) => a.total_cmp(&(*b as f64)),
            (FieldValue::Boolean(a), FieldValue::Boolean(b)) => a.cmp(b),
            (FieldValue::DateTime(a), FieldValue::DateTime(b)) => a.cmp(b),
            (a, b) => a.as_text().cmp(&b.as_text()),
        }
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(d) = DateTime::parse_from_rfc3339(s) {
        return Some(d.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_string() {
        let value = FieldValue::from_json(&json!("hello"), ScalarType::String).unwrap();
        assert_eq!(value.as_string(), Some("hello"));
        assert!(FieldValue::from_json(&json!(3), ScalarType::String).is_err());
    }

    #[test]
    fn test_from_json_integer_accepts_numeric_strings() {
        assert_eq!(
            FieldValue::from_json(&json!(42), ScalarType::Integer).unwrap(),
            FieldValue::Integer(42)
        );
        assert_eq!(
            FieldValue::from_json(&json!(" 7 "), ScalarType::Integer).unwrap(),
            FieldValue::Integer(7)
        );
        assert!(FieldValue::from_json(&json!("seven"), ScalarType::Integer).is_err());
    }

    #[test]
    fn test_from_json_null_for_any_type() {
        for ty in [ScalarType::String, ScalarType::Integer, ScalarType::DateTime] {
            assert!(FieldValue::from_json(&Value::Null, ty).unwrap().is_null());
        }
    }

    #[test]
    fn test_datetime_parsing_and_rendering() {
        let value = FieldValue::from_json(&json!("2024-01-15T10:30:00Z"), ScalarType::DateTime).unwrap();
        assert_eq!(value.to_json(), json!("2024-01-15T10:30:00Z"));

        let day = FieldValue::from_json(&json!("2024-01-15"), ScalarType::DateTime).unwrap();
        assert_eq!(day.to_json(), json!("2024-01-15T00:00:00Z"));
    }

    #[test]
    fn test_boolean_from_strings() {
        assert_eq!(
            FieldValue::from_json(&json!("true"), ScalarType::Boolean).unwrap(),
            FieldValue::Boolean(true)
        );
        assert!(FieldValue::from_json(&json!("yes"), ScalarType::Boolean).is_err());
    }

    #[test]
    fn test_sort_cmp_nulls_first() {
        let mut values = vec![
            FieldValue::Integer(3),
            FieldValue::Null,
            FieldValue::Integer(1),
        ];
        values.sort_by(|a, b| a.sort_cmp(b));
        assert_eq!(
            values,
            vec![FieldValue::Null, FieldValue::Integer(1), FieldValue::Integer(3)]
        );
    }

    #[test]
    fn test_float_nan_renders_null() {
        assert_eq!(FieldValue::Float(f64::NAN).to_json(), Value::Null);
    }
}
