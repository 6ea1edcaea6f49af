//! External identifiers (IRIs) for entities
//!
//! Entities are referenced at the API boundary by a path-like IRI such as
//! `/api/users/42` instead of their internal key. The collection segment is
//! the English plural of the table name.

use crate::core::entity::EntityId;
use serde_json::Value;
use thiserror::Error;

/// Failure to turn an external identifier into an internal key
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IriError {
    #[error("'{0}' is not a valid identifier or IRI")]
    Malformed(String),

    #[error("IRI '{iri}' does not reference a {expected}")]
    WrongResource { iri: String, expected: String },
}

/// Renders and parses entity IRIs under a fixed API prefix
#[derive(Debug, Clone)]
pub struct IriConverter {
    prefix: String,
}

impl IriConverter {
    /// Create a converter for the given prefix (e.g. `/api`)
    pub fn new(prefix: &str) -> Self {
        let trimmed = prefix.trim_end_matches('/');
        let prefix = if trimmed.is_empty() || trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{}", trimmed)
        };
        Self { prefix }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Collection path of a table (e.g. `/api/comments`)
    pub fn collection_path(&self, table: &str) -> String {
        format!("{}/{}", self.prefix, route_segment(table))
    }

    /// IRI of one entity
    pub fn iri_for(&self, table: &str, id: EntityId) -> String {
        format!("{}/{}", self.collection_path(table), id)
    }

    /// Link to a subresource collection of one entity
    pub fn subresource_link(&self, table: &str, id: EntityId, segment: &str) -> String {
        format!("{}/{}", self.iri_for(table, id), segment)
    }

    /// Parse an IRI, or a bare numeric identifier, into an internal key
    ///
    /// When `expected_table` is given the collection segment must match it.
    pub fn parse(&self, value: &str, expected_table: Option<&str>) -> Result<EntityId, IriError> {
        let value = value.trim();
        if let Ok(id) = value.parse::<EntityId>() {
            return Ok(id);
        }

        let malformed = || IriError::Malformed(value.to_string());
        let rest = value
            .strip_prefix(self.prefix.as_str())
            .filter(|rest| rest.is_empty() || rest.starts_with('/'))
            .ok_or_else(malformed)?;
        let mut segments = rest.trim_start_matches('/').split('/');
        let (Some(collection), Some(id), None) = (segments.next(), segments.next(), segments.next())
        else {
            return Err(malformed());
        };

        if let Some(table) = expected_table
            && collection != route_segment(table)
        {
            return Err(IriError::WrongResource {
                iri: value.to_string(),
                expected: table.to_string(),
            });
        }

        id.parse().map_err(|_| malformed())
    }

    /// Parse any JSON shape a client may use to reference an entity
    ///
    /// Accepts integers, numeric strings, IRIs and `{ "id": ... }` objects.
    pub fn parse_value(
        &self,
        value: &Value,
        expected_table: Option<&str>,
    ) -> Result<EntityId, IriError> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .ok_or_else(|| IriError::Malformed(n.to_string())),
            Value::String(s) => self.parse(s, expected_table),
            Value::Object(map) => match map.get("id") {
                Some(inner) if !inner.is_object() => self.parse_value(inner, expected_table),
                _ => Err(IriError::Malformed(value.to_string())),
            },
            other => Err(IriError::Malformed(other.to_string())),
        }
    }
}

/// English plural of a snake_case table name, used as URL segment
///
/// Only the last word is pluralized: `blog_post` becomes `blog_posts`.
pub fn route_segment(table: &str) -> String {
    let (head, word) = match table.rfind('_') {
        Some(pos) => table.split_at(pos + 1),
        None => ("", table),
    };
    if word.is_empty() {
        return table.to_string();
    }

    let plural = match word {
        "person" => "people".to_string(),
        "child" => "children".to_string(),
        w if w.ends_with('y')
            && w.len() > 1
            && !matches!(w.as_bytes()[w.len() - 2], b'a' | b'e' | b'i' | b'o' | b'u') =>
        {
            format!("{}ies", &w[..w.len() - 1])
        }
        w if w.ends_with('s')
            || w.ends_with('x')
            || w.ends_with('z')
            || w.ends_with("ch")
            || w.ends_with("sh") =>
        {
            format!("{}es", w)
        }
        w => format!("{}s", w),
    };
    format!("{}{}", head, plural)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_route_segment() {
        assert_eq!(route_segment("user"), "users");
        assert_eq!(route_segment("category"), "categories");
        assert_eq!(route_segment("day"), "days");
        assert_eq!(route_segment("address"), "addresses");
        assert_eq!(route_segment("blog_post"), "blog_posts");
        assert_eq!(route_segment("person"), "people");
    }

    #[test]
    fn test_iri_round_trip() {
        let iri = IriConverter::new("/api");
        let rendered = iri.iri_for("user", 42);
        assert_eq!(rendered, "/api/users/42");
        assert_eq!(iri.parse(&rendered, Some("user")), Ok(42));
    }

    #[test]
    fn test_prefix_normalization() {
        assert_eq!(IriConverter::new("api/").prefix(), "/api");
        assert_eq!(IriConverter::new("").iri_for("tag", 1), "/tags/1");
    }

    #[test]
    fn test_parse_rejects_wrong_collection() {
        let iri = IriConverter::new("/api");
        let err = iri.parse("/api/memes/3", Some("user")).unwrap_err();
        assert!(matches!(err, IriError::WrongResource { .. }));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let iri = IriConverter::new("/api");
        assert!(iri.parse("/api/users/abc", None).is_err());
        assert!(iri.parse("/api/users/1/comments", None).is_err());
        assert!(iri.parse("users/1", None).is_err());
    }

    #[test]
    fn test_prefix_ends_at_segment_boundary() {
        let iri = IriConverter::new("/api");
        assert!(matches!(iri.parse("/apiusers/1", Some("user")), Err(IriError::Malformed(_))));
        assert_eq!(IriConverter::new("").parse("/tags/1", Some("tag")), Ok(1));
    }

    #[test]
    fn test_parse_value_shapes() {
        let iri = IriConverter::new("/api");
        assert_eq!(iri.parse_value(&json!(5), None), Ok(5));
        assert_eq!(iri.parse_value(&json!("5"), None), Ok(5));
        assert_eq!(iri.parse_value(&json!("/api/users/5"), Some("user")), Ok(5));
        assert_eq!(iri.parse_value(&json!({"id": "/api/users/5"}), Some("user")), Ok(5));
        assert!(iri.parse_value(&json!(true), None).is_err());
    }
}
