//! Class-level validators
//!
//! Unlike field constraints these see the whole cleaned object and may
//! query storage, so they are asynchronous. The denormalizer runs every
//! validator of every object in the payload concurrently under one timeout.

use crate::core::entity::EntityId;
use crate::core::error::StorageError;
use crate::core::field::FieldValue;
use crate::core::iri::IriConverter;
use crate::core::operation::Operation;
use crate::core::store::EntityStore;
use crate::core::validation::RequestContext;
use crate::query::builder::{CompareOp, JoinOn, SelectQuery};
use crate::schema::EntityDescriptor;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt::Debug;

/// Everything a class validator may look at
pub struct ValidationTarget<'a> {
    pub entity: &'a EntityDescriptor,
    /// Dotted path of the object inside the payload (empty for the root)
    pub path: &'a str,
    /// Cleaned property values of the object
    pub values: &'a Map<String, Value>,
    pub operation: Operation,
    /// Key of the stored entity being modified, if any
    pub subject_id: Option<EntityId>,
    pub request: &'a RequestContext,
    pub store: &'a dyn EntityStore,
    pub iri: &'a IriConverter,
}

impl ValidationTarget<'_> {
    /// Internal key referenced by a cleaned to-one relation value
    pub fn reference(&self, relation: &str) -> Option<EntityId> {
        self.values
            .get(relation)
            .and_then(|v| v.get("id"))
            .and_then(Value::as_i64)
    }
}

/// One class-level rejection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Property the message belongs to; `None` targets the object itself
    pub property: Option<String>,
    pub message: String,
}

impl Violation {
    pub fn on(property: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            property: Some(property.into()),
            message: message.into(),
        }
    }
}

/// Asynchronous validator bound to an entity class
#[async_trait]
pub trait ClassValidator: Send + Sync + Debug {
    fn name(&self) -> &str;

    /// Inspect the object; storage failures abort the whole write
    async fn validate(&self, target: &ValidationTarget<'_>) -> Result<Vec<Violation>, StorageError>;
}

/// Rejects a value combination already used by another stored entity
///
/// Fields may be columns or owning to-one relations. Missing or null
/// values never collide.
#[derive(Debug, Clone)]
pub struct IsUnique {
    fields: Vec<String>,
    message: String,
}

impl IsUnique {
    pub fn new<S: Into<String>>(fields: impl IntoIterator<Item = S>) -> Self {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            message: "This value is already used.".to_string(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    fn build_query(&self, target: &ValidationTarget<'_>) -> Option<SelectQuery> {
        let entity = target.entity;
        let mut query = SelectQuery::new(&entity.name);
        let root = query.root_alias().to_string();

        for field in &self.fields {
            let value = target.values.get(field)?;
            if value.is_null() {
                return None;
            }
            if let Some(column) = entity.column(field) {
                let value = FieldValue::from_json(value, column.scalar).ok()?;
                query.and_where(&root, field, CompareOp::Eq, value);
            } else if let Some(relation) = entity.relation(field)
                && let JoinOn::ForeignKey { column } = relation.join_on(&entity.name)
            {
                let id = target.reference(field)?;
                query.and_where(&root, &column, CompareOp::Eq, FieldValue::Integer(id));
            } else {
                return None;
            }
        }

        if let Some(id) = target.subject_id {
            query.and_where(&root, "id", CompareOp::Ne, FieldValue::Integer(id));
        }
        Some(query)
    }
}

#[async_trait]
impl ClassValidator for IsUnique {
    fn name(&self) -> &str {
        "is_unique"
    }

    async fn validate(&self, target: &ValidationTarget<'_>) -> Result<Vec<Violation>, StorageError> {
        let Some(query) = self.build_query(target) else {
            return Ok(Vec::new());
        };
        let existing = target.store.count(&query).await?;
        if existing == 0 {
            return Ok(Vec::new());
        }
        let property = self.fields.first().cloned().unwrap_or_default();
        Ok(vec![Violation::on(property, self.message.clone())])
    }
}

/// Requires a to-one relation to reference the requesting principal
#[derive(Debug, Clone)]
pub struct IsCurrentUser {
    relation: String,
    message: String,
}

impl IsCurrentUser {
    pub fn new(relation: impl Into<String>) -> Self {
        Self {
            relation: relation.into(),
            message: "This value should be the current user.".to_string(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

#[async_trait]
impl ClassValidator for IsCurrentUser {
    fn name(&self) -> &str {
        "is_current_user"
    }

    async fn validate(&self, target: &ValidationTarget<'_>) -> Result<Vec<Violation>, StorageError> {
        // an update that leaves the relation alone keeps the stored owner
        if target.operation == Operation::Update && !target.values.contains_key(&self.relation) {
            return Ok(Vec::new());
        }
        let Some(relation) = target.entity.relation(&self.relation) else {
            return Ok(Vec::new());
        };

        let referenced = target.reference(&self.relation);
        let principal = target
            .request
            .principal_key(target.iri, &relation.target_table);
        match (referenced, principal) {
            (Some(a), Some(b)) if a == b => Ok(Vec::new()),
            _ => Ok(vec![Violation::on(&self.relation, self.message.clone())]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::{EntityStore as _, EntityWrite};
    use crate::schema::SchemaBuilder;
    use crate::storage::InMemoryStore;
    use indexmap::IndexMap;
    use serde_json::json;

    fn schema() -> crate::schema::Metadata {
        let mut builder = SchemaBuilder::new();
        builder.entity("user", |e| {
            e.column("email", crate::core::field::ScalarType::String);
        });
        builder.entity("comment", |e| {
            e.column("message", crate::core::field::ScalarType::String)
                .many_to_one("author", "user");
        });
        builder.build().unwrap()
    }

    async fn store_with_user(email: &str) -> InMemoryStore {
        let store = InMemoryStore::new();
        let mut columns = IndexMap::new();
        columns.insert("email".to_string(), FieldValue::String(email.into()));
        store
            .persist(&EntityWrite::insert("user", columns))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_is_unique_detects_collision() {
        let metadata = schema();
        let user = metadata.schema.by_name("user").unwrap();
        let store = store_with_user("ada@example.com").await;
        let iri = IriConverter::new("/api");
        let request = RequestContext::anonymous();
        let values = json!({"email": "ada@example.com"});

        let target = ValidationTarget {
            entity: user,
            path: "",
            values: values.as_object().unwrap(),
            operation: Operation::Create,
            subject_id: None,
            request: &request,
            store: &store,
            iri: &iri,
        };
        let violations = IsUnique::new(["email"]).validate(&target).await.unwrap();
        assert_eq!(violations, vec![Violation::on("email", "This value is already used.")]);
    }

    #[tokio::test]
    async fn test_is_unique_ignores_the_subject_itself() {
        let metadata = schema();
        let user = metadata.schema.by_name("user").unwrap();
        let store = store_with_user("ada@example.com").await;
        let iri = IriConverter::new("/api");
        let request = RequestContext::anonymous();
        let values = json!({"email": "ada@example.com"});

        let target = ValidationTarget {
            entity: user,
            path: "",
            values: values.as_object().unwrap(),
            operation: Operation::Update,
            subject_id: Some(1),
            request: &request,
            store: &store,
            iri: &iri,
        };
        assert!(IsUnique::new(["email"]).validate(&target).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_is_current_user() {
        let metadata = schema();
        let comment = metadata.schema.by_name("comment").unwrap();
        let store = InMemoryStore::new();
        let iri = IriConverter::new("/api");
        let values = json!({"message": "hi", "author": {"id": 4}});
        let validator = IsCurrentUser::new("author");

        let owner = RequestContext::for_principal("/api/users/4");
        let stranger = RequestContext::for_principal("/api/users/5");
        for (request, expected) in [(&owner, 0), (&stranger, 1)] {
            let target = ValidationTarget {
                entity: comment,
                path: "",
                values: values.as_object().unwrap(),
                operation: Operation::Create,
                subject_id: None,
                request,
                store: &store,
                iri: &iri,
            };
            assert_eq!(validator.validate(&target).await.unwrap().len(), expected);
        }
    }
}
