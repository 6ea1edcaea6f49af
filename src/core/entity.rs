//! Hydrated entity graphs as returned by storage backends

use crate::core::field::FieldValue;
use crate::core::iri::IriConverter;
use indexmap::IndexMap;

/// Internal primary key of every entity
pub type EntityId = i64;

/// Capabilities every entity representation provides
///
/// Identifier lookup, external identifier computation and type name
/// lookup are the only behaviours the engine needs from an entity; they
/// are implemented per representation instead of being inherited.
pub trait Entity {
    /// Internal key, if the entity has been persisted
    fn id(&self) -> Option<EntityId>;

    /// Table/type name of the entity
    fn type_name(&self) -> &str;

    /// External identifier (IRI) of the entity
    fn external_id(&self, iri: &IriConverter) -> Option<String> {
        self.id().map(|id| iri.iri_for(self.type_name(), id))
    }
}

/// Value held by one property of a hydrated record
///
/// Backends decide the variant from relation metadata, so consumers never
/// have to inspect the runtime shape of a value.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    /// Column value (dates included)
    Scalar(FieldValue),
    /// Loaded to-one relation
    Entity(Box<Record>),
    /// Loaded to-many relation
    EntityList(Vec<Record>),
    /// To-one relation that points nowhere
    Null,
    /// Relation known to exist but not loaded
    Omitted,
}

/// A hydrated entity as produced by an [`EntityStore`](crate::core::store::EntityStore)
///
/// Records may carry more than the routing map asked for (bookkeeping
/// columns, relations an ORM loaded on its own); the normalizer only
/// emits what is mapped.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub entity: String,
    pub fields: IndexMap<String, RawValue>,
}

impl Record {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            fields: IndexMap::new(),
        }
    }

    /// Create a record with only its identifier set
    pub fn with_id(entity: impl Into<String>, id: EntityId) -> Self {
        Self::new(entity).scalar("id", FieldValue::Integer(id))
    }

    /// Builder-style scalar setter
    pub fn scalar(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(name.into(), RawValue::Scalar(value));
        self
    }

    /// Builder-style to-one relation setter
    pub fn related(mut self, name: impl Into<String>, record: Option<Record>) -> Self {
        let value = match record {
            Some(r) => RawValue::Entity(Box::new(r)),
            None => RawValue::Null,
        };
        self.fields.insert(name.into(), value);
        self
    }

    /// Builder-style to-many relation setter
    pub fn related_many(mut self, name: impl Into<String>, records: Vec<Record>) -> Self {
        self.fields.insert(name.into(), RawValue::EntityList(records));
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: RawValue) {
        self.fields.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&RawValue> {
        self.fields.get(name)
    }

    pub fn get_scalar(&self, name: &str) -> Option<&FieldValue> {
        match self.fields.get(name) {
            Some(RawValue::Scalar(v)) => Some(v),
            _ => None,
        }
    }

    /// Collect the scalar values reachable through a dotted path
    ///
    /// To-many hops fan out, so `tags.name` yields one value per tag.
    pub fn values_at(&self, path: &str) -> Vec<&FieldValue> {
        let mut out = Vec::new();
        let segments: Vec<&str> = path.split('.').collect();
        collect_values(self, &segments, &mut out);
        out
    }
}

fn collect_values<'a>(record: &'a Record, segments: &[&str], out: &mut Vec<&'a FieldValue>) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    match record.fields.get(*head) {
        Some(RawValue::Scalar(v)) if rest.is_empty() => out.push(v),
        Some(RawValue::Entity(child)) if !rest.is_empty() => collect_values(child, rest, out),
        Some(RawValue::EntityList(children)) if !rest.is_empty() => {
            for child in children {
                collect_values(child, rest, out);
            }
        }
        _ => {}
    }
}

impl Entity for Record {
    fn id(&self) -> Option<EntityId> {
        self.get_scalar("id").and_then(FieldValue::as_integer)
    }

    fn type_name(&self) -> &str {
        &self.entity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comment_chain() -> Record {
        let author = Record::with_id("user", 42).scalar("name", FieldValue::String("Ada".into()));
        let tags = vec![
            Record::with_id("tag", 1).scalar("name", FieldValue::String("rust".into())),
            Record::with_id("tag", 2).scalar("name", FieldValue::String("orm".into())),
        ];
        Record::with_id("comment", 7)
            .scalar("message", FieldValue::String("hi".into()))
            .related("author", Some(author))
            .related_many("tags", tags)
    }

    #[test]
    fn test_entity_capabilities() {
        let record = comment_chain();
        assert_eq!(record.id(), Some(7));
        assert_eq!(record.type_name(), "comment");

        let iri = IriConverter::new("/api");
        assert_eq!(record.external_id(&iri).as_deref(), Some("/api/comments/7"));
    }

    #[test]
    fn test_unsaved_record_has_no_external_id() {
        let record = Record::new("comment");
        assert_eq!(record.id(), None);
        assert!(record.external_id(&IriConverter::new("/api")).is_none());
    }

    #[test]
    fn test_values_at_follows_relations() {
        let record = comment_chain();
        let names = record.values_at("author.name");
        assert_eq!(names, vec![&FieldValue::String("Ada".into())]);

        let tags = record.values_at("tags.name");
        assert_eq!(tags.len(), 2);
        assert!(record.values_at("author.missing").is_empty());
    }
}
