//! Response shaping
//!
//! The normalizer walks a hydrated [`Record`] alongside its [`RoutingMap`]
//! and emits only what the map allows, whatever the backend loaded. It
//! holds no mutable state: formatting the same record twice yields the
//! same value.

use crate::core::entity::{Entity, EntityId, RawValue, Record};
use crate::core::field::FieldValue;
use crate::core::iri::IriConverter;
use crate::core::operation::Operation;
use crate::mapping::{RoutingMap, SubresourceManager};
use crate::schema::{ComputeContext, EntityDescriptor, SchemaRegistry};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Normalizer {
    schema: Arc<SchemaRegistry>,
    iri: IriConverter,
    subresources: Arc<SubresourceManager>,
    flatten_singleton_to_iri: bool,
}

impl Normalizer {
    pub fn new(
        schema: Arc<SchemaRegistry>,
        iri: IriConverter,
        subresources: Arc<SubresourceManager>,
        flatten_singleton_to_iri: bool,
    ) -> Self {
        Self {
            schema,
            iri,
            subresources,
            flatten_singleton_to_iri,
        }
    }

    pub fn iri(&self) -> &IriConverter {
        &self.iri
    }

    /// Shape one record for `operation` following `map`
    pub fn format(&self, record: &Record, operation: Operation, map: &RoutingMap) -> Value {
        if operation != map.operation {
            tracing::debug!(
                entity = %map.entity,
                requested = %operation,
                mapped = %map.operation,
                "formatting with a map built for another operation"
            );
        }
        Value::Object(self.format_node(record, map))
    }

    pub fn format_many(&self, records: &[Record], operation: Operation, map: &RoutingMap) -> Vec<Value> {
        records
            .iter()
            .map(|record| self.format(record, operation, map))
            .collect()
    }

    fn format_node(&self, record: &Record, map: &RoutingMap) -> Map<String, Value> {
        let entity = self.schema.get(map.key);
        let mut out = Map::new();

        for property in &map.select_props {
            let value = record
                .get_scalar(property)
                .map(FieldValue::to_json)
                .unwrap_or(Value::Null);
            out.insert(property.clone(), value);
        }

        for name in &map.relation_props {
            if map.subresources.contains(name) {
                if let Some(link) = record
                    .id()
                    .and_then(|id| self.subresources.link(&self.iri, &entity.name, id, name))
                {
                    out.insert(name.clone(), Value::String(link));
                }
                continue;
            }
            let many = entity.relation(name).is_some_and(|r| r.is_many());
            let raw = record.get(name);
            let value = match map.child(name) {
                Some(child) => self.format_relation(raw, child, many),
                None => self.format_references(raw, many),
            };
            out.insert(name.clone(), value);
        }

        self.attach_computed(entity, record, map, &mut out);
        sort_keys(out)
    }

    fn format_relation(&self, raw: Option<&RawValue>, child: &RoutingMap, many: bool) -> Value {
        match raw {
            Some(RawValue::Entity(record)) => self.format_child(record, child),
            Some(RawValue::EntityList(records)) => Value::Array(
                records
                    .iter()
                    .map(|record| self.format_child(record, child))
                    .collect(),
            ),
            _ if many => Value::Array(Vec::new()),
            _ => Value::Null,
        }
    }

    /// Nested object, or its IRI when only the identifier remains
    fn format_child(&self, record: &Record, child: &RoutingMap) -> Value {
        let object = self.format_node(record, child);
        if self.flatten_singleton_to_iri
            && object.len() == 1
            && let Some(id) = object.get("id").and_then(Value::as_i64)
        {
            return Value::String(self.iri.iri_for(&child.entity, id));
        }
        Value::Object(object)
    }

    /// Identifier-only rendering of a relation cut by the depth guard
    fn format_references(&self, raw: Option<&RawValue>, many: bool) -> Value {
        match raw {
            Some(RawValue::Entity(record)) => self.reference(record),
            Some(RawValue::EntityList(records)) => {
                Value::Array(records.iter().map(|r| self.reference(r)).collect())
            }
            _ if many => Value::Array(Vec::new()),
            _ => Value::Null,
        }
    }

    fn reference(&self, record: &Record) -> Value {
        match record.id() {
            Some(id) => self.reference_to(record.type_name(), id),
            None => Value::Null,
        }
    }

    /// How a reference to an existing entity is rendered
    pub fn reference_to(&self, table: &str, id: EntityId) -> Value {
        if self.flatten_singleton_to_iri {
            Value::String(self.iri.iri_for(table, id))
        } else {
            json!({ "id": id })
        }
    }

    fn attach_computed(
        &self,
        entity: &EntityDescriptor,
        record: &Record,
        map: &RoutingMap,
        out: &mut Map<String, Value>,
    ) {
        if map.computed_props.is_empty() {
            return;
        }
        // every computed value sees the same sibling map
        let values: Vec<(String, Value)> = {
            let ctx = ComputeContext {
                record,
                normalized: &*out,
                iri: &self.iri,
            };
            map.computed_props
                .iter()
                .filter_map(|name| {
                    let computed = entity.computed_property(name)?;
                    Some((name.clone(), (computed.compute)(&ctx)))
                })
                .collect()
        };
        out.extend(values);
    }
}

fn sort_keys(map: Map<String, Value>) -> Map<String, Value> {
    let sorted: BTreeMap<String, Value> = map.into_iter().collect();
    sorted.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::field::ScalarType;
    use crate::schema::{Metadata, SchemaBuilder};

    fn blog(flatten: bool) -> (Metadata, Normalizer) {
        let mut builder = SchemaBuilder::new();
        builder.entity("user", |e| {
            e.column("name", ScalarType::String)
                .column("password", ScalarType::String)
                .one_to_many("comments", "comment", "author")
                .expose("name", &["details"])
                .subresource("comments");
        });
        builder.entity("comment", |e| {
            e.column("message", ScalarType::String)
                .many_to_one("author", "user")
                .many_to_one("parent", "comment")
                .computed("shout", &["message"], |ctx| {
                    ctx.record
                        .get_scalar("message")
                        .and_then(FieldValue::as_string)
                        .map(|m| json!(m.to_uppercase()))
                        .unwrap_or(Value::Null)
                })
                .expose("id", &["details"])
                .expose("author", &["details"])
                .expose("parent", &["details"])
                .expose("shout", &["details"]);
        });
        let metadata = builder.build().unwrap();
        let normalizer = Normalizer::new(
            Arc::clone(&metadata.schema),
            IriConverter::new("/api"),
            Arc::clone(&metadata.subresources),
            flatten,
        );
        (metadata, normalizer)
    }

    fn chain(length: i64) -> Record {
        let author = Record::with_id("user", 9)
            .scalar("name", FieldValue::String("Ada".into()))
            .scalar("password", FieldValue::String("secret".into()));
        let mut current: Option<Record> = None;
        for id in 1..=length {
            let record = Record::with_id("comment", id)
                .scalar("message", FieldValue::String(format!("m{}", id)))
                .related("author", Some(author.clone()))
                .related("parent", current.take());
            current = Some(record);
        }
        current.unwrap_or_else(|| Record::new("comment"))
    }

    #[test]
    fn test_strips_unmapped_data_and_sorts_keys() {
        let (metadata, normalizer) = blog(true);
        let map = metadata.mapper().build("comment", Operation::Details).unwrap();
        let value = normalizer.format(&chain(1), Operation::Details, &map);

        let keys: Vec<&String> = value.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["author", "id", "parent", "shout"]);
        assert_eq!(value["shout"], "M1");
        assert_eq!(value["author"]["name"], "Ada");
        assert!(value["author"].get("password").is_none());
        assert_eq!(value["author"]["comments"], "/api/users/9/comments");
        assert_eq!(value["parent"], Value::Null);
    }

    #[test]
    fn test_depth_truncation_renders_identifiers() {
        let (metadata, normalizer) = blog(true);
        let map = metadata.mapper().build("comment", Operation::Details).unwrap();
        let value = normalizer.format(&chain(5), Operation::Details, &map);

        assert_eq!(value["id"], 5);
        assert_eq!(value["parent"]["id"], 4);
        assert_eq!(value["parent"]["parent"], "/api/comments/3");
    }

    #[test]
    fn test_reference_rendering_without_flattening() {
        let (metadata, normalizer) = blog(false);
        let map = metadata.mapper().build("comment", Operation::Details).unwrap();
        let value = normalizer.format(&chain(5), Operation::Details, &map);
        assert_eq!(value["parent"]["parent"], json!({"id": 3}));
    }

    #[test]
    fn test_format_is_deterministic() {
        let (metadata, normalizer) = blog(true);
        let map = metadata.mapper().build("comment", Operation::Details).unwrap();
        let record = chain(3);
        let first = serde_json::to_string(&normalizer.format(&record, Operation::Details, &map)).unwrap();
        let second = serde_json::to_string(&normalizer.format(&record, Operation::Details, &map)).unwrap();
        assert_eq!(first, second);
    }
}
