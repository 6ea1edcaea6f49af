//! Static description of entity classes
//!
//! Descriptors are produced once by the [`SchemaBuilder`](super::SchemaBuilder)
//! and never change afterwards. Entities refer to each other through
//! [`EntityKey`] indices into the [`SchemaRegistry`] arena, so cyclic
//! relation graphs need no shared ownership.

use crate::core::entity::Record;
use crate::core::field::ScalarType;
use crate::core::iri::IriConverter;
use crate::core::validation::{ClassValidator, FieldConstraint, InputFilter};
use crate::query::builder::JoinOn;
use crate::query::filter::Filter;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Index of an entity in the schema arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey(pub usize);

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub scalar: ScalarType,
    pub nullable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    ManyToOne,
    OneToOne,
    OneToMany,
    ManyToMany,
}

impl RelationKind {
    pub fn is_many(&self) -> bool {
        matches!(self, RelationKind::OneToMany | RelationKind::ManyToMany)
    }
}

/// A resolved relation between two entity classes
#[derive(Debug, Clone, PartialEq)]
pub struct RelationDescriptor {
    pub name: String,
    pub kind: RelationKind,
    pub target: EntityKey,
    pub target_table: String,
    /// Name of the relation on the target pointing back, if declared
    pub inverse: Option<String>,
    /// Whether this side stores the link (foreign key or pivot rows)
    pub owning: bool,
}

impl RelationDescriptor {
    pub fn is_many(&self) -> bool {
        self.kind.is_many()
    }

    /// Foreign key column on the owner's table for owning to-one sides
    pub fn foreign_key(&self) -> Option<String> {
        match self.kind {
            RelationKind::ManyToOne => Some(format!("{}_id", self.name)),
            RelationKind::OneToOne if self.owning => Some(format!("{}_id", self.name)),
            _ => None,
        }
    }

    /// How a query joins the target from an alias of `owner_table`
    ///
    /// Pivot rows store the owning side in `source_id` and the other side
    /// in `target_id`.
    pub fn join_on(&self, owner_table: &str) -> JoinOn {
        if let Some(column) = self.foreign_key() {
            return JoinOn::ForeignKey { column };
        }
        match self.kind {
            RelationKind::ManyToMany if self.owning => JoinOn::Pivot {
                table: format!("{}_{}", owner_table, self.name),
                owner_column: "source_id".to_string(),
                target_column: "target_id".to_string(),
            },
            RelationKind::ManyToMany => JoinOn::Pivot {
                table: format!(
                    "{}_{}",
                    self.target_table,
                    self.inverse.as_deref().unwrap_or(owner_table)
                ),
                owner_column: "target_id".to_string(),
                target_column: "source_id".to_string(),
            },
            _ => JoinOn::Inverse {
                column: format!("{}_id", self.inverse.as_deref().unwrap_or(owner_table)),
            },
        }
    }
}

/// What a computed property sees when it is evaluated
pub struct ComputeContext<'a> {
    /// The hydrated record, including hidden dependency properties
    pub record: &'a Record,
    /// The object normalized so far (mapped properties only)
    pub normalized: &'a Map<String, Value>,
    pub iri: &'a IriConverter,
}

pub type ComputeFn = Arc<dyn Fn(&ComputeContext<'_>) -> Value + Send + Sync>;

/// Read-only property derived from other properties at normalization time
#[derive(Clone)]
pub struct ComputedProperty {
    pub name: String,
    /// Properties (dotted paths allowed) the computation reads
    pub depends_on: Vec<String>,
    pub compute: ComputeFn,
}

impl fmt::Debug for ComputedProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedProperty")
            .field("name", &self.name)
            .field("depends_on", &self.depends_on)
            .finish()
    }
}

/// A property of an entity, whichever kind it is
#[derive(Debug, Clone, Copy)]
pub enum Property<'a> {
    Column(&'a ColumnDescriptor),
    Relation(&'a RelationDescriptor),
    Computed(&'a ComputedProperty),
}

/// Fully resolved entity class
///
/// Inherited declarations are already folded in: a child class carries its
/// ancestors' columns, relations, computed properties and validation rules.
#[derive(Clone)]
pub struct EntityDescriptor {
    pub key: EntityKey,
    /// Table name, also the type name
    pub name: String,
    /// This class followed by its ancestors, nearest first
    pub ancestors: Vec<String>,
    /// Declaration order, `id` first
    pub columns: Vec<ColumnDescriptor>,
    pub relations: Vec<RelationDescriptor>,
    pub computed: Vec<ComputedProperty>,
    /// Storage-level unique column sets
    pub unique: Vec<Vec<String>>,
    pub constraints: IndexMap<String, Vec<FieldConstraint>>,
    pub input_filters: IndexMap<String, Vec<InputFilter>>,
    pub class_validators: Vec<Arc<dyn ClassValidator>>,
    pub filters: Vec<Arc<dyn Filter>>,
}

impl fmt::Debug for EntityDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityDescriptor")
            .field("key", &self.key)
            .field("name", &self.name)
            .field("ancestors", &self.ancestors)
            .field("columns", &self.columns)
            .field("relations", &self.relations)
            .field("computed", &self.computed)
            .field("filters", &self.filters)
            .finish_non_exhaustive()
    }
}

impl EntityDescriptor {
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn relation(&self, name: &str) -> Option<&RelationDescriptor> {
        self.relations.iter().find(|r| r.name == name)
    }

    pub fn computed_property(&self, name: &str) -> Option<&ComputedProperty> {
        self.computed.iter().find(|c| c.name == name)
    }

    pub fn property(&self, name: &str) -> Option<Property<'_>> {
        if let Some(column) = self.column(name) {
            return Some(Property::Column(column));
        }
        if let Some(relation) = self.relation(name) {
            return Some(Property::Relation(relation));
        }
        self.computed_property(name).map(Property::Computed)
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.property(name).is_some()
    }

    /// Property names in declaration order: columns, relations, computed
    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.columns
            .iter()
            .map(|c| c.name.as_str())
            .chain(self.relations.iter().map(|r| r.name.as_str()))
            .chain(self.computed.iter().map(|c| c.name.as_str()))
    }

    /// Whether this class is `table` or inherits from it
    pub fn is_a(&self, table: &str) -> bool {
        self.ancestors.iter().any(|a| a == table)
    }

    /// Run the input filters registered for a property
    ///
    /// A failing filter leaves the value as it was; validation reports it.
    pub fn filter_input(&self, property: &str, value: Value) -> Value {
        let Some(filters) = self.input_filters.get(property) else {
            return value;
        };
        filters.iter().fold(value, |current, filter| {
            match filter(property, current.clone()) {
                Ok(filtered) => filtered,
                Err(e) => {
                    tracing::debug!(entity = %self.name, property, error = %e, "input filter rejected value");
                    current
                }
            }
        })
    }
}

/// Arena of every entity class, indexed by [`EntityKey`]
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    entities: Vec<EntityDescriptor>,
    by_name: HashMap<String, EntityKey>,
}

impl SchemaRegistry {
    pub(crate) fn from_descriptors(entities: Vec<EntityDescriptor>) -> Self {
        let by_name = entities
            .iter()
            .map(|e| (e.name.clone(), e.key))
            .collect();
        Self { entities, by_name }
    }

    /// Descriptor behind a key handed out by this registry
    pub fn get(&self, key: EntityKey) -> &EntityDescriptor {
        &self.entities[key.0]
    }

    pub fn by_name(&self, name: &str) -> Option<&EntityDescriptor> {
        self.key_of(name).map(|key| self.get(key))
    }

    pub fn key_of(&self, name: &str) -> Option<EntityKey> {
        self.by_name.get(name).copied()
    }

    pub fn target(&self, relation: &RelationDescriptor) -> &EntityDescriptor {
        self.get(relation.target)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityDescriptor> {
        self.entities.iter()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Follow the relation segments of a dotted path
    ///
    /// Returns the relations crossed, the entity owning the last segment
    /// and the last segment itself. `None` when an inner segment is not a
    /// relation.
    pub fn walk_path<'a, 'p>(
        &'a self,
        entity: &'a EntityDescriptor,
        path: &'p str,
    ) -> Option<(Vec<&'a RelationDescriptor>, &'a EntityDescriptor, &'p str)> {
        let mut segments: Vec<&str> = path.split('.').collect();
        let last = segments.pop()?;
        let mut current = entity;
        let mut crossed = Vec::with_capacity(segments.len());
        for segment in segments {
            let relation = current.relation(segment)?;
            crossed.push(relation);
            current = self.target(relation);
        }
        Some((crossed, current, last))
    }
}
