//! Validation and input filtering
//!
//! Write payloads are validated in two tiers: declarative per-property
//! constraints ([`validators`]) and asynchronous class-level validators
//! ([`class`]). Both report into a [`ValidationErrors`] collector keyed by
//! dotted path, so the final error map does not depend on the order in
//! which concurrent validators finish.

pub mod class;
pub mod filters;
pub mod validators;

pub use class::{ClassValidator, IsCurrentUser, IsUnique, ValidationTarget, Violation};
pub use filters::InputFilter;
pub use validators::FieldConstraint;

use crate::core::entity::EntityId;
use crate::core::iri::IriConverter;
use serde::Serialize;
use std::collections::BTreeMap;

/// Validation messages keyed by dotted property path
///
/// The root entity's properties use their bare name (`author`), nested
/// ones are prefixed with the relation (`image.name`) and collection items
/// with their index (`tags.1.name`). Class-level messages that target no
/// property are stored under the entity's own path.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    pub fn add(&mut self, path: impl Into<String>, message: impl Into<String>) {
        let messages = self.0.entry(path.into()).or_default();
        let message = message.into();
        if !messages.contains(&message) {
            messages.push(message);
        }
    }

    pub fn extend(&mut self, other: ValidationErrors) {
        for (path, messages) in other.0 {
            for message in messages {
                self.add(path.clone(), message);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, path: &str) -> Option<&[String]> {
        self.0.get(path).map(Vec::as_slice)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.0.contains_key(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }

    /// `Ok(())` when no message was collected
    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

/// Join a parent path and a child segment with a dot
pub fn join_path(base: &str, segment: &str) -> String {
    match (base.is_empty(), segment.is_empty()) {
        (true, _) => segment.to_string(),
        (_, true) => base.to_string(),
        _ => format!("{}.{}", base, segment),
    }
}

/// Per-request context threaded through validation
///
/// The principal identifier is opaque to the engine: it is whatever the
/// authentication layer put there (an id or an IRI). Validators never
/// read ambient state.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub principal_id: Option<String>,
}

impl RequestContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn for_principal(principal_id: impl Into<String>) -> Self {
        Self {
            principal_id: Some(principal_id.into()),
        }
    }

    /// Internal key of the principal, if it is a user reference
    pub fn principal_key(&self, iri: &IriConverter, user_table: &str) -> Option<EntityId> {
        self.principal_id
            .as_deref()
            .and_then(|p| iri.parse(p, Some(user_table)).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errors_dedupe_messages() {
        let mut errors = ValidationErrors::default();
        errors.add("name", "too short");
        errors.add("name", "too short");
        errors.add("name", "blank");
        assert_eq!(errors.get("name").unwrap().len(), 2);
    }

    #[test]
    fn test_errors_are_ordered_by_path() {
        let mut errors = ValidationErrors::default();
        errors.add("tags.1.name", "x");
        errors.add("author", "y");
        let paths: Vec<&String> = errors.iter().map(|(p, _)| p).collect();
        assert_eq!(paths, vec!["author", "tags.1.name"]);
        assert!(errors.into_result().is_err());
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("", "author"), "author");
        assert_eq!(join_path("tags", "0"), "tags.0");
        assert_eq!(join_path("image", ""), "image");
    }

    #[test]
    fn test_principal_key() {
        let iri = IriConverter::new("/api");
        assert_eq!(
            RequestContext::for_principal("/api/users/9").principal_key(&iri, "user"),
            Some(9)
        );
        assert_eq!(RequestContext::for_principal("9").principal_key(&iri, "user"), Some(9));
        assert_eq!(RequestContext::anonymous().principal_key(&iri, "user"), None);
    }
}
