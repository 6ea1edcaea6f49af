//! Storage abstraction
//!
//! The engine never talks to a database directly: reads are expressed as a
//! [`SelectQuery`] and writes as an [`EntityWrite`] tree, and any backend
//! implementing [`EntityStore`] executes them.

use crate::core::entity::{EntityId, Record};
use crate::core::error::StorageError;
use crate::core::field::FieldValue;
use crate::query::builder::{JoinOn, SelectQuery};
use async_trait::async_trait;
use indexmap::IndexMap;

/// A storage backend able to run planned queries and persist write trees
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Backend name used in logs and errors
    fn backend(&self) -> &'static str;

    /// Execute a select and hydrate one record per root row
    ///
    /// Joined relations come back as nested records (`RawValue::Entity`
    /// or `RawValue::EntityList`) under the relation name.
    async fn fetch(&self, query: &SelectQuery) -> Result<Vec<Record>, StorageError>;

    /// Count root rows matching the query's conditions
    async fn count(&self, query: &SelectQuery) -> Result<usize, StorageError>;

    /// Persist a write tree in one transaction and return the root key
    ///
    /// Nothing is written when an error is returned.
    async fn persist(&self, write: &EntityWrite) -> Result<EntityId, StorageError>;

    /// Delete one row; returns `false` when it did not exist
    async fn delete(&self, table: &str, id: EntityId) -> Result<bool, StorageError>;
}

/// Insert or update of one entity, with its relation changes
#[derive(Debug, Clone, PartialEq)]
pub struct EntityWrite {
    pub table: String,
    /// `None` inserts a new row
    pub id: Option<EntityId>,
    /// Column values to set; columns not listed are left untouched
    pub columns: IndexMap<String, FieldValue>,
    pub relations: Vec<RelationWrite>,
    /// Column sets that must stay unique across the table
    pub unique: Vec<Vec<String>>,
}

impl EntityWrite {
    pub fn insert(table: impl Into<String>, columns: IndexMap<String, FieldValue>) -> Self {
        Self {
            table: table.into(),
            id: None,
            columns,
            relations: Vec::new(),
            unique: Vec::new(),
        }
    }

    pub fn update(
        table: impl Into<String>,
        id: EntityId,
        columns: IndexMap<String, FieldValue>,
    ) -> Self {
        Self {
            table: table.into(),
            id: Some(id),
            columns,
            relations: Vec::new(),
            unique: Vec::new(),
        }
    }

    pub fn with_relation(mut self, relation: RelationWrite) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn with_unique(mut self, columns: Vec<String>) -> Self {
        self.unique.push(columns);
        self
    }

    /// Nested writes of the whole tree, this one included, depth first
    pub fn walk(&self) -> Vec<&EntityWrite> {
        let mut out = vec![self];
        for relation in &self.relations {
            for target in relation.value.targets() {
                if let WriteTarget::Nested(nested) = target {
                    out.extend(nested.walk());
                }
            }
        }
        out
    }
}

/// New state of one relation of an [`EntityWrite`]
#[derive(Debug, Clone, PartialEq)]
pub struct RelationWrite {
    pub relation: String,
    pub target_table: String,
    pub on: JoinOn,
    pub value: RelationValue,
}

/// Relation content: a to-one slot or the complete to-many list
///
/// A to-many list replaces the previous links entirely.
#[derive(Debug, Clone, PartialEq)]
pub enum RelationValue {
    One(Option<WriteTarget>),
    Many(Vec<WriteTarget>),
}

impl RelationValue {
    pub fn targets(&self) -> Vec<&WriteTarget> {
        match self {
            RelationValue::One(target) => target.iter().collect(),
            RelationValue::Many(targets) => targets.iter().collect(),
        }
    }
}

/// A related entity: an existing row or a nested write
#[derive(Debug, Clone, PartialEq)]
pub enum WriteTarget {
    Reference(EntityId),
    Nested(Box<EntityWrite>),
}
