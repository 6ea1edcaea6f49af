//! Write payload handling
//!
//! A write goes through three steps, all driven by the routing map of the
//! operation:
//!
//! 1. [`Denormalizer::clean`] keeps only mapped keys, runs input filters and
//!    turns every entity reference (IRI, numeric string, number) into
//!    `{"id": key}`. Cleaning never fails and is idempotent.
//! 2. [`Denormalizer::validate`] checks scalar types and field constraints
//!    synchronously, then runs the class validators of every object in the
//!    payload concurrently under the configured timeout.
//! 3. [`Denormalizer::build_write`] and [`Denormalizer::persist`] turn the
//!    payload into one [`EntityWrite`] tree and hand it to the store, which
//!    persists it atomically. Constraint violations reported by the store
//!    come back as field errors.

use crate::core::entity::EntityId;
use crate::core::error::{ExposeError, StorageError, ValidationError};
use crate::core::field::FieldValue;
use crate::core::iri::IriConverter;
use crate::core::operation::Operation;
use crate::core::store::{EntityStore, EntityWrite, RelationValue, RelationWrite, WriteTarget};
use crate::core::validation::{RequestContext, ValidationErrors, ValidationTarget, join_path};
use crate::mapping::RoutingMap;
use crate::schema::{EntityDescriptor, RelationDescriptor, SchemaRegistry};
use futures::future::join_all;
use indexmap::IndexMap;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Duration;

const NOT_NULL: &str = "This value should not be null.";
const NOT_ARRAY: &str = "This value should be of type array.";
const ALREADY_USED: &str = "This value is already used.";
const MISSING_ITEM: &str = "Item not found for this identifier.";

static NULL: Value = Value::Null;

/// One object of the payload whose class validators still have to run
struct ClassCheck<'a> {
    entity: &'a EntityDescriptor,
    path: String,
    values: &'a Map<String, Value>,
    operation: Operation,
    subject_id: Option<EntityId>,
}

#[derive(Debug, Clone)]
pub struct Denormalizer {
    schema: Arc<SchemaRegistry>,
    iri: IriConverter,
    validation_timeout: Duration,
}

impl Denormalizer {
    pub fn new(schema: Arc<SchemaRegistry>, iri: IriConverter, validation_timeout: Duration) -> Self {
        Self {
            schema,
            iri,
            validation_timeout,
        }
    }

    // ---------------------------------------------------------------------
    // Cleaning
    // ---------------------------------------------------------------------

    /// Strip unmapped keys and normalize references
    ///
    /// The root `id` is dropped: the subject of an update comes from the
    /// route. A non-object payload cleans to an empty object.
    pub fn clean(&self, input: &Value, map: &RoutingMap) -> Value {
        let entity = self.schema.get(map.key);
        match input {
            Value::Object(object) => Value::Object(self.clean_node(entity, object, map, true)),
            _ => Value::Object(Map::new()),
        }
    }

    fn clean_node(
        &self,
        entity: &EntityDescriptor,
        object: &Map<String, Value>,
        map: &RoutingMap,
        root: bool,
    ) -> Map<String, Value> {
        let mut out = Map::new();
        let mut dropped = Vec::new();

        for (key, value) in object {
            if key == "id" {
                if !root {
                    out.insert(key.clone(), self.clean_identifier(value, &entity.name));
                }
                continue;
            }
            if map.select_props.contains(key) && entity.column(key).is_some() {
                out.insert(key.clone(), entity.filter_input(key, value.clone()));
                continue;
            }
            match entity.relation(key) {
                Some(relation)
                    if map.relation_props.contains(key) && !map.subresources.contains(key) =>
                {
                    out.insert(key.clone(), self.clean_relation(relation, value, map.child(key)));
                }
                _ => dropped.push(key.as_str()),
            }
        }

        if !dropped.is_empty() {
            tracing::debug!(entity = %entity.name, ?dropped, "unmapped input dropped");
        }
        out
    }

    fn clean_relation(&self, relation: &RelationDescriptor, value: &Value, child: Option<&RoutingMap>) -> Value {
        match value {
            Value::Array(items) if relation.is_many() => Value::Array(
                items
                    .iter()
                    .map(|item| self.clean_item(relation, item, child))
                    .collect(),
            ),
            Value::Null => Value::Null,
            _ if relation.is_many() => value.clone(),
            _ => self.clean_item(relation, value, child),
        }
    }

    fn clean_item(&self, relation: &RelationDescriptor, item: &Value, child: Option<&RoutingMap>) -> Value {
        let target = self.schema.target(relation);
        match (item, child) {
            (Value::Object(object), Some(child)) if !child.is_reference_only() && !is_reference(object) => {
                Value::Object(self.clean_node(target, object, child, false))
            }
            (Value::Object(object), _) if !is_reference(object) => item.clone(),
            _ => match self.iri.parse_value(item, Some(&target.name)) {
                Ok(id) => json!({ "id": id }),
                Err(e) => {
                    tracing::debug!(relation = %relation.name, error = %e, "reference left unresolved");
                    item.clone()
                }
            },
        }
    }

    fn clean_identifier(&self, value: &Value, table: &str) -> Value {
        match self.iri.parse_value(value, Some(table)) {
            Ok(id) => json!(id),
            Err(_) => value.clone(),
        }
    }

    // ---------------------------------------------------------------------
    // Validation
    // ---------------------------------------------------------------------

    /// Validate a cleaned payload
    ///
    /// Field errors of every branch are collected before class validators
    /// run, and all of them end up in one path-keyed map. A class validator
    /// failing on storage aborts validation with that storage error.
    pub async fn validate(
        &self,
        cleaned: &Value,
        map: &RoutingMap,
        operation: Operation,
        subject_id: Option<EntityId>,
        request: &RequestContext,
        store: &dyn EntityStore,
    ) -> Result<(), ExposeError> {
        let entity = self.schema.get(map.key);
        let mut errors = ValidationErrors::default();
        let mut checks = Vec::new();

        match cleaned {
            Value::Object(object) => self.validate_node(
                entity,
                object,
                map,
                "",
                operation,
                subject_id,
                &mut errors,
                &mut checks,
            ),
            _ => {
                return Err(ValidationError::InvalidJson {
                    message: "expected a JSON object".to_string(),
                }
                .into());
            }
        }

        self.run_class_checks(&checks, request, store, &mut errors).await?;
        errors
            .into_result()
            .map_err(|e| ValidationError::FieldErrors(e).into())
    }

    #[allow(clippy::too_many_arguments)]
    fn validate_node<'a>(
        &'a self,
        entity: &'a EntityDescriptor,
        object: &'a Map<String, Value>,
        map: &RoutingMap,
        path: &str,
        operation: Operation,
        subject_id: Option<EntityId>,
        errors: &mut ValidationErrors,
        checks: &mut Vec<ClassCheck<'a>>,
    ) {
        for name in &map.select_props {
            let Some(column) = entity.column(name) else {
                continue;
            };
            if column.name == "id" {
                continue;
            }
            let property_path = join_path(path, name);
            let value = match object.get(name) {
                Some(value) => value,
                // updates leave absent columns untouched
                None if operation == Operation::Update => continue,
                None => &NULL,
            };

            if value.is_null() {
                if !column.nullable {
                    errors.add(&property_path, NOT_NULL);
                }
            } else if let Err(message) = FieldValue::from_json(value, column.scalar) {
                errors.add(&property_path, message);
                continue;
            }

            if let Some(constraints) = entity.constraints.get(name) {
                for constraint in constraints {
                    if let Err(message) = constraint(name, value) {
                        errors.add(&property_path, message);
                    }
                }
            }
        }

        for name in &map.relation_props {
            if map.subresources.contains(name) {
                continue;
            }
            let (Some(relation), Some(value)) = (entity.relation(name), object.get(name)) else {
                continue;
            };
            let relation_path = join_path(path, name);
            let target = self.schema.target(relation);
            let child = map.child(name);

            match value {
                Value::Null if relation.is_many() => errors.add(&relation_path, NOT_ARRAY),
                Value::Null => {}
                Value::Array(items) if relation.is_many() => {
                    for (index, item) in items.iter().enumerate() {
                        let item_path = join_path(&relation_path, &index.to_string());
                        self.validate_item(relation, target, item, child, &item_path, errors, checks);
                    }
                }
                _ if relation.is_many() => errors.add(&relation_path, NOT_ARRAY),
                item => self.validate_item(relation, target, item, child, &relation_path, errors, checks),
            }
        }

        if !entity.class_validators.is_empty() {
            checks.push(ClassCheck {
                entity,
                path: path.to_string(),
                values: object,
                operation,
                subject_id,
            });
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn validate_item<'a>(
        &'a self,
        relation: &RelationDescriptor,
        target: &'a EntityDescriptor,
        item: &'a Value,
        child: Option<&RoutingMap>,
        path: &str,
        errors: &mut ValidationErrors,
        checks: &mut Vec<ClassCheck<'a>>,
    ) {
        let Value::Object(object) = item else {
            errors.add(path, format!("Invalid IRI \"{}\".", display(item)));
            return;
        };

        if is_reference(object) {
            if object.get("id").and_then(Value::as_i64).is_none() {
                errors.add(path, format!("Invalid IRI \"{}\".", display(&object["id"])));
            }
            return;
        }

        match child {
            Some(child) if !child.is_reference_only() => {
                let nested_id = object.get("id").and_then(Value::as_i64);
                if object.contains_key("id") && nested_id.is_none() {
                    errors.add(join_path(path, "id"), format!("Invalid IRI \"{}\".", display(&object["id"])));
                    return;
                }
                let operation = if nested_id.is_some() {
                    Operation::Update
                } else {
                    Operation::Create
                };
                self.validate_node(target, object, child, path, operation, nested_id, errors, checks);
            }
            _ => errors.add(
                path,
                format!(
                    "Nested documents for attribute \"{}\" are not allowed. Use IRIs instead.",
                    relation.name
                ),
            ),
        }
    }

    async fn run_class_checks(
        &self,
        checks: &[ClassCheck<'_>],
        request: &RequestContext,
        store: &dyn EntityStore,
        errors: &mut ValidationErrors,
    ) -> Result<(), ExposeError> {
        let runs = checks.iter().flat_map(move |check| {
            check.entity.class_validators.iter().map(move |validator| async move {
                let target = ValidationTarget {
                    entity: check.entity,
                    path: &check.path,
                    values: check.values,
                    operation: check.operation,
                    subject_id: check.subject_id,
                    request,
                    store,
                    iri: &self.iri,
                };
                (check.path.as_str(), validator.validate(&target).await)
            })
        });

        let Ok(outcomes) = tokio::time::timeout(self.validation_timeout, join_all(runs)).await else {
            let after_ms = u64::try_from(self.validation_timeout.as_millis()).unwrap_or(u64::MAX);
            tracing::warn!(after_ms, "class validation timed out");
            return Err(ValidationError::Timeout { after_ms }.into());
        };

        for (path, outcome) in outcomes {
            for violation in outcome? {
                let at = join_path(path, violation.property.as_deref().unwrap_or(""));
                errors.add(at, violation.message);
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Persistence
    // ---------------------------------------------------------------------

    /// Write tree for a validated payload
    pub fn build_write(
        &self,
        cleaned: &Value,
        map: &RoutingMap,
        subject_id: Option<EntityId>,
    ) -> Result<EntityWrite, ExposeError> {
        let entity = self.schema.get(map.key);
        let Value::Object(object) = cleaned else {
            return Err(ExposeError::Internal("write payload is not an object".to_string()));
        };
        self.build_node(entity, object, map, subject_id)
    }

    fn build_node(
        &self,
        entity: &EntityDescriptor,
        object: &Map<String, Value>,
        map: &RoutingMap,
        subject_id: Option<EntityId>,
    ) -> Result<EntityWrite, ExposeError> {
        let mut columns = IndexMap::new();
        for (key, value) in object {
            let Some(column) = entity.column(key) else {
                continue;
            };
            if key == "id" || !map.select_props.contains(key) {
                continue;
            }
            let value = FieldValue::from_json(value, column.scalar)
                .map_err(|e| ExposeError::Internal(format!("unvalidated value for {}: {}", key, e)))?;
            columns.insert(key.clone(), value);
        }

        let mut write = match subject_id {
            Some(id) => EntityWrite::update(&entity.name, id, columns),
            None => EntityWrite::insert(&entity.name, columns),
        };

        for name in &map.relation_props {
            let (Some(relation), Some(value)) = (entity.relation(name), object.get(name)) else {
                continue;
            };
            if map.subresources.contains(name) {
                continue;
            }
            let target = self.schema.target(relation);
            let child = map.child(name);
            let value = match value {
                Value::Array(items) if relation.is_many() => RelationValue::Many(
                    items
                        .iter()
                        .map(|item| self.write_target(target, item, child))
                        .collect::<Result<_, _>>()?,
                ),
                Value::Null if relation.is_many() => RelationValue::Many(Vec::new()),
                Value::Null => RelationValue::One(None),
                item => RelationValue::One(Some(self.write_target(target, item, child)?)),
            };
            write = write.with_relation(RelationWrite {
                relation: relation.name.clone(),
                target_table: relation.target_table.clone(),
                on: relation.join_on(&entity.name),
                value,
            });
        }

        for set in &entity.unique {
            let columns = set
                .iter()
                .map(|p| entity.relation(p).and_then(|r| r.foreign_key()).unwrap_or_else(|| p.clone()))
                .collect();
            write = write.with_unique(columns);
        }
        Ok(write)
    }

    fn write_target(
        &self,
        target: &EntityDescriptor,
        item: &Value,
        child: Option<&RoutingMap>,
    ) -> Result<WriteTarget, ExposeError> {
        match (item, child) {
            (Value::Object(object), Some(child)) if !is_reference(object) => {
                let id = object.get("id").and_then(Value::as_i64);
                Ok(WriteTarget::Nested(Box::new(self.build_node(target, object, child, id)?)))
            }
            _ => self
                .iri
                .parse_value(item, Some(&target.name))
                .map(WriteTarget::Reference)
                .map_err(|e| ExposeError::Internal(format!("unvalidated reference: {}", e))),
        }
    }

    /// Persist a write tree, translating constraint violations into field errors
    pub async fn persist(&self, write: &EntityWrite, store: &dyn EntityStore) -> Result<EntityId, ExposeError> {
        store.persist(write).await.map_err(|e| self.translate(write, e))
    }

    fn translate(&self, write: &EntityWrite, err: StorageError) -> ExposeError {
        let (table, column, message) = match &err {
            StorageError::UniqueViolation { table, columns } => (
                table.as_str(),
                columns.first().map(String::as_str).unwrap_or_default(),
                ALREADY_USED,
            ),
            StorageError::IntegrityError { table, column, .. } => (table.as_str(), column.as_str(), MISSING_ITEM),
            _ => ("", "", ""),
        };
        if message.is_empty() {
            tracing::warn!(table = %write.table, error = %err, "write failed");
            return ExposeError::Storage(err);
        }

        let base = locate(write, table, "").unwrap_or_default();
        let property = self
            .schema
            .by_name(table)
            .and_then(|entity| {
                entity
                    .relations
                    .iter()
                    .find(|r| r.name == column || r.foreign_key().as_deref() == Some(column))
            })
            .map(|r| r.name.clone())
            .unwrap_or_else(|| column.to_string());
        let path = if column == "id" { base } else { join_path(&base, &property) };
        tracing::warn!(table, column, path = %path, error = %err, "storage constraint rejected write");

        let mut errors = ValidationErrors::default();
        errors.add(path, message);
        ValidationError::FieldErrors(errors).into()
    }
}

/// `{"id": ...}` and nothing else
fn is_reference(object: &Map<String, Value>) -> bool {
    object.len() == 1 && object.contains_key("id")
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Dotted path of the first write on `table` inside the tree
fn locate(write: &EntityWrite, table: &str, base: &str) -> Option<String> {
    if write.table == table {
        return Some(base.to_string());
    }
    for relation in &write.relations {
        let many = matches!(relation.value, RelationValue::Many(_));
        for (index, target) in relation.value.targets().into_iter().enumerate() {
            let WriteTarget::Nested(nested) = target else {
                continue;
            };
            let segment = if many {
                join_path(&relation.relation, &index.to_string())
            } else {
                relation.relation.clone()
            };
            if let Some(found) = locate(nested, table, &join_path(base, &segment)) {
                return Some(found);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::field::ScalarType;
    use crate::core::validation::{IsCurrentUser, IsUnique, validators};
    use crate::schema::{Metadata, SchemaBuilder};
    use crate::storage::InMemoryStore;

    fn blog() -> (Metadata, Denormalizer) {
        let mut builder = SchemaBuilder::new();
        builder.entity("user", |e| {
            e.column("name", ScalarType::String)
                .column("email", ScalarType::String)
                .unique(&["email"])
                .expose("name", &["all"])
                .expose("email", &["create"])
                .class_validator(IsUnique::new(["email"]));
        });
        builder.entity("tag", |e| {
            e.column("name", ScalarType::String).expose("name", &["list"]);
        });
        builder.entity("image", |e| {
            e.column("url", ScalarType::String)
                .expose("url", &["create", "details"]);
        });
        builder.entity("comment", |e| {
            e.column("message", ScalarType::String)
                .nullable_column("score", ScalarType::Integer)
                .many_to_one("author", "user")
                .many_to_one("image", "image")
                .many_to_many("tags", "tag")
                .expose("message", &["create", "update", "list"])
                .expose("score", &["create", "update"])
                .expose("author", &["create", "update"])
                .expose("image", &["create"])
                .expose("tags", &["create"])
                .constraint("message", validators::not_blank())
                .input_filter("message", crate::core::validation::filters::trim())
                .class_validator(IsCurrentUser::new("author"));
        });
        let metadata = builder.build().unwrap();
        let denormalizer = Denormalizer::new(
            Arc::clone(&metadata.schema),
            IriConverter::new("/api"),
            Duration::from_secs(1),
        );
        (metadata, denormalizer)
    }

    #[test]
    fn test_clean_strips_and_resolves_references() {
        let (metadata, denormalizer) = blog();
        let map = metadata.mapper().build("comment", Operation::Create).unwrap();
        let input = json!({
            "id": 99,
            "message": "  hello ",
            "author": "/api/users/42",
            "image": {"url": "a.png", "secret": true},
            "unknown": 1
        });
        let cleaned = denormalizer.clean(&input, &map);
        assert_eq!(
            cleaned,
            json!({"message": "hello", "author": {"id": 42}, "image": {"url": "a.png"}})
        );
        assert_eq!(denormalizer.clean(&cleaned, &map), cleaned);
    }

    #[test]
    fn test_clean_keeps_unparseable_references_for_validation() {
        let (metadata, denormalizer) = blog();
        let map = metadata.mapper().build("comment", Operation::Create).unwrap();
        let cleaned = denormalizer.clean(&json!({"author": "/api/images/1"}), &map);
        assert_eq!(cleaned["author"], "/api/images/1");
    }

    #[tokio::test]
    async fn test_validate_collects_field_errors() {
        let (metadata, denormalizer) = blog();
        let store = InMemoryStore::new();
        let map = metadata.mapper().build("comment", Operation::Create).unwrap();
        let cleaned = denormalizer.clean(
            &json!({"message": " ", "score": "high", "author": "/api/images/1"}),
            &map,
        );
        let err = denormalizer
            .validate(&cleaned, &map, Operation::Create, None, &RequestContext::anonymous(), &store)
            .await
            .unwrap_err();
        let violations = err.violations().unwrap();
        assert!(violations.contains("message"));
        assert!(violations.contains("score"));
        assert!(violations.get("author").unwrap()[0].starts_with("Invalid IRI"));
    }

    #[tokio::test]
    async fn test_reference_only_relation_rejects_documents() {
        let (metadata, denormalizer) = blog();
        let store = InMemoryStore::new();
        let map = metadata.mapper().build("comment", Operation::Create).unwrap();
        let input = json!({"message": "hi", "author": 1, "tags": ["/api/tags/2", {"name": "rust"}]});
        let cleaned = denormalizer.clean(&input, &map);
        assert_eq!(cleaned["tags"][0], json!({"id": 2}));

        let err = denormalizer
            .validate(&cleaned, &map, Operation::Create, None, &RequestContext::for_principal("1"), &store)
            .await
            .unwrap_err();
        let violations = err.violations().unwrap();
        assert!(!violations.contains("tags.0"));
        let messages = violations.get("tags.1").unwrap();
        assert!(messages[0].contains("Nested documents for attribute \"tags\""));

        let cleaned = denormalizer.clean(&json!({"message": "hi", "author": 1, "tags": "/api/tags/2"}), &map);
        let err = denormalizer
            .validate(&cleaned, &map, Operation::Create, None, &RequestContext::for_principal("1"), &store)
            .await
            .unwrap_err();
        assert!(err.violations().unwrap().contains("tags"));
    }

    #[tokio::test]
    async fn test_class_validators_see_the_principal() {
        let (metadata, denormalizer) = blog();
        let store = InMemoryStore::new();
        let map = metadata.mapper().build("comment", Operation::Create).unwrap();
        let cleaned = denormalizer.clean(&json!({"message": "hi", "author": "/api/users/4"}), &map);

        let ok = denormalizer
            .validate(&cleaned, &map, Operation::Create, None, &RequestContext::for_principal("/api/users/4"), &store)
            .await;
        assert!(ok.is_ok());

        let err = denormalizer
            .validate(&cleaned, &map, Operation::Create, None, &RequestContext::for_principal("/api/users/5"), &store)
            .await
            .unwrap_err();
        assert!(err.violations().unwrap().contains("author"));
    }

    #[tokio::test]
    async fn test_persist_nested_create_and_translate_unique() {
        let (metadata, denormalizer) = blog();
        let store = InMemoryStore::new();
        let users = metadata.mapper().build("user", Operation::Create).unwrap();

        let cleaned = denormalizer.clean(&json!({"name": "Ada", "email": "ada@example.com"}), &users);
        let write = denormalizer.build_write(&cleaned, &users, None).unwrap();
        assert_eq!(write.unique, vec![vec!["email".to_string()]]);
        let id = denormalizer.persist(&write, &store).await.unwrap();
        assert_eq!(id, 1);

        // bypasses IsUnique, as a concurrent request would
        let err = denormalizer.persist(&write, &store).await.unwrap_err();
        assert_eq!(
            err.violations().unwrap().get("email").unwrap(),
            &["This value is already used.".to_string()]
        );
        assert_eq!(store.len("user"), 1);

        let comments = metadata.mapper().build("comment", Operation::Create).unwrap();
        let cleaned = denormalizer.clean(
            &json!({"message": "hi", "author": "/api/users/1", "image": {"url": "a.png"}}),
            &comments,
        );
        let write = denormalizer.build_write(&cleaned, &comments, None).unwrap();
        let comment = denormalizer.persist(&write, &store).await.unwrap();
        let row = store.row("comment", comment).unwrap();
        assert_eq!(row.get("author_id"), Some(&FieldValue::Integer(1)));
        assert_eq!(row.get("image_id"), Some(&FieldValue::Integer(1)));
        assert_eq!(store.len("image"), 1);
    }

    #[tokio::test]
    async fn test_dangling_reference_becomes_field_error() {
        let (metadata, denormalizer) = blog();
        let store = InMemoryStore::new();
        let map = metadata.mapper().build("comment", Operation::Create).unwrap();
        let cleaned = denormalizer.clean(&json!({"message": "hi", "author": 77}), &map);
        let write = denormalizer.build_write(&cleaned, &map, None).unwrap();
        let err = denormalizer.persist(&write, &store).await.unwrap_err();
        assert!(err.violations().unwrap().contains("author"));
        assert!(store.is_empty("comment"));
    }
}
