//! In-memory implementation of EntityStore for testing and development

use crate::core::entity::{EntityId, RawValue, Record};
use crate::core::error::StorageError;
use crate::core::field::FieldValue;
use crate::core::store::{EntityStore, EntityWrite, RelationValue, WriteTarget};
use crate::query::builder::{CompareOp, Condition, Direction, Join, JoinOn, SelectQuery};
use async_trait::async_trait;
use indexmap::IndexMap;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

type Row = IndexMap<String, FieldValue>;

static NULL: FieldValue = FieldValue::Null;

/// Everything the store holds; cloned for each write transaction
#[derive(Debug, Clone, Default)]
struct Tables {
    rows: HashMap<String, BTreeMap<EntityId, Row>>,
    /// Pivot rows as `(source_id, target_id)`
    pivots: HashMap<String, BTreeSet<(EntityId, EntityId)>>,
    next_id: HashMap<String, EntityId>,
    /// `table -> column -> referenced table`, learned from writes
    foreign_keys: HashMap<String, HashMap<String, String>>,
    /// `pivot -> (source table, target table)`
    pivot_tables: HashMap<String, (String, String)>,
}

/// In-memory entity store
///
/// Useful for testing and development. Writes run against a copy of the
/// tables that replaces the live state only once the whole write tree
/// succeeded, so a failed write leaves nothing behind.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows in a table
    pub fn len(&self, table: &str) -> usize {
        self.tables
            .read()
            .map(|t| t.rows.get(table).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, table: &str) -> bool {
        self.len(table) == 0
    }

    /// Raw column values of one row
    pub fn row(&self, table: &str, id: EntityId) -> Option<IndexMap<String, FieldValue>> {
        let tables = self.tables.read().ok()?;
        tables.rows.get(table)?.get(&id).cloned()
    }

    /// Pairs stored in a pivot table
    pub fn links(&self, pivot: &str) -> Vec<(EntityId, EntityId)> {
        self.tables
            .read()
            .map(|t| {
                t.pivots
                    .get(pivot)
                    .map(|set| set.iter().copied().collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    fn lock_error(backend: &str) -> StorageError {
        StorageError::TransactionError {
            message: format!("{} store lock poisoned", backend),
        }
    }
}

#[async_trait]
impl EntityStore for InMemoryStore {
    fn backend(&self) -> &'static str {
        "in-memory"
    }

    async fn fetch(&self, query: &SelectQuery) -> Result<Vec<Record>, StorageError> {
        let tables = self
            .tables
            .read()
            .map_err(|_| Self::lock_error(self.backend()))?;

        let mut matching = tables.matching_rows(query);
        tables.sort_rows(query, &mut matching);

        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(matching
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|row| tables.hydrate(query, query.root_alias(), &query.root.table, row))
            .collect())
    }

    async fn count(&self, query: &SelectQuery) -> Result<usize, StorageError> {
        let tables = self
            .tables
            .read()
            .map_err(|_| Self::lock_error(self.backend()))?;
        Ok(tables.matching_rows(query).len())
    }

    async fn persist(&self, write: &EntityWrite) -> Result<EntityId, StorageError> {
        let mut live = self
            .tables
            .write()
            .map_err(|_| Self::lock_error(self.backend()))?;

        let mut tx = live.clone();
        let id = tx.apply(write)?;
        *live = tx;
        tracing::debug!(table = %write.table, id, "in-memory write committed");
        Ok(id)
    }

    async fn delete(&self, table: &str, id: EntityId) -> Result<bool, StorageError> {
        let mut live = self
            .tables
            .write()
            .map_err(|_| Self::lock_error(self.backend()))?;

        let removed = live
            .rows
            .get_mut(table)
            .and_then(|rows| rows.remove(&id))
            .is_some();
        if removed {
            live.detach_references(table, id);
        }
        Ok(removed)
    }
}

impl Tables {
    fn row(&self, table: &str, id: EntityId) -> Option<&Row> {
        self.rows.get(table)?.get(&id)
    }

    /// Rows of `join.table` attached to `parent` through `join`
    fn related<'a>(&'a self, join: &Join, parent: &'a Row) -> Vec<&'a Row> {
        let Some(parent_id) = row_id(parent) else {
            return Vec::new();
        };
        match &join.on {
            JoinOn::ForeignKey { column } => parent
                .get(column)
                .and_then(FieldValue::as_integer)
                .and_then(|id| self.row(&join.table, id))
                .into_iter()
                .collect(),
            JoinOn::Inverse { column } => self
                .rows
                .get(&join.table)
                .map(|rows| {
                    rows.values()
                        .filter(|row| row.get(column).and_then(FieldValue::as_integer) == Some(parent_id))
                        .collect()
                })
                .unwrap_or_default(),
            JoinOn::Pivot {
                table,
                owner_column,
                ..
            } => {
                let from_source = owner_column == "source_id";
                self.pivots
                    .get(table)
                    .map(|pairs| {
                        pairs
                            .iter()
                            .filter_map(|(source, target)| match from_source {
                                true if *source == parent_id => Some(*target),
                                false if *target == parent_id => Some(*source),
                                _ => None,
                            })
                            .filter_map(|id| self.row(&join.table, id))
                            .collect()
                    })
                    .unwrap_or_default()
            }
        }
    }

    /// Rows reachable from a root row under `alias`
    fn reachable<'a>(&'a self, query: &SelectQuery, root: &'a Row, alias: &str) -> Vec<&'a Row> {
        let mut chain = Vec::new();
        let mut current = alias;
        while current != query.root_alias() {
            let Some(join) = query.join_for(current) else {
                return Vec::new();
            };
            chain.push(join);
            current = join.parent_alias.as_str();
        }

        let mut rows = vec![root];
        for join in chain.into_iter().rev() {
            rows = rows
                .into_iter()
                .flat_map(|parent| self.related(join, parent))
                .collect();
        }
        rows
    }

    /// Root rows satisfying every condition, in key order
    ///
    /// Conditions on one alias must hold for a single joined row.
    fn matching_rows<'a>(&'a self, query: &SelectQuery) -> Vec<&'a Row> {
        let mut by_alias: IndexMap<&str, Vec<&Condition>> = IndexMap::new();
        for condition in &query.conditions {
            by_alias.entry(condition.alias.as_str()).or_default().push(condition);
        }

        let Some(rows) = self.rows.get(&query.root.table) else {
            return Vec::new();
        };
        rows.values()
            .filter(|root| {
                by_alias.iter().all(|(alias, conditions)| {
                    let candidates = self.reachable(query, root, alias);
                    if candidates.is_empty() {
                        // a left join without match yields nulls
                        return conditions.iter().all(|c| evaluate(c, &NULL, query));
                    }
                    candidates.iter().any(|row| {
                        conditions.iter().all(|c| {
                            let value = row.get(&c.column).unwrap_or(&NULL);
                            evaluate(c, value, query)
                        })
                    })
                })
            })
            .collect()
    }

    fn sort_rows(&self, query: &SelectQuery, rows: &mut [&Row]) {
        if query.order_by.is_empty() {
            return;
        }
        rows.sort_by(|a, b| {
            for order in &query.order_by {
                let left = self.sort_value(query, a, &order.alias, &order.column);
                let right = self.sort_value(query, b, &order.alias, &order.column);
                let ordering = match order.direction {
                    Direction::Asc => left.sort_cmp(&right),
                    Direction::Desc => right.sort_cmp(&left),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
    }

    fn sort_value(&self, query: &SelectQuery, root: &Row, alias: &str, column: &str) -> FieldValue {
        self.reachable(query, root, alias)
            .first()
            .and_then(|row| row.get(column))
            .cloned()
            .unwrap_or(FieldValue::Null)
    }

    /// Build the record for `row` and everything joined below `alias`
    fn hydrate(&self, query: &SelectQuery, alias: &str, table: &str, row: &Row) -> Record {
        let mut record = Record::new(table);
        let selected: Vec<&str> = query.selects_for(alias).collect();
        for (column, value) in row {
            if column == "id" || selected.is_empty() || selected.contains(&column.as_str()) {
                record.set(column.clone(), RawValue::Scalar(value.clone()));
            }
        }

        for join in query.joins_from(alias) {
            let related = self.related(join, row);
            let value = if join.many {
                RawValue::EntityList(
                    related
                        .into_iter()
                        .map(|r| self.hydrate(query, &join.alias, &join.table, r))
                        .collect(),
                )
            } else {
                match related.first() {
                    Some(r) => RawValue::Entity(Box::new(self.hydrate(query, &join.alias, &join.table, r))),
                    None => RawValue::Null,
                }
            };
            record.set(join.relation.clone(), value);
        }
        record
    }

    fn apply(&mut self, write: &EntityWrite) -> Result<EntityId, StorageError> {
        let id = match write.id {
            Some(id) => {
                if self.row(&write.table, id).is_none() {
                    return Err(StorageError::IntegrityError {
                        table: write.table.clone(),
                        column: "id".to_string(),
                        message: format!("row {} does not exist", id),
                    });
                }
                id
            }
            None => {
                let next = self.next_id.entry(write.table.clone()).or_insert(0);
                *next += 1;
                *next
            }
        };

        let mut row: Row = self
            .row(&write.table, id)
            .cloned()
            .unwrap_or_else(|| IndexMap::from([("id".to_string(), FieldValue::Integer(id))]));
        for (column, value) in &write.columns {
            row.insert(column.clone(), value.clone());
        }

        // owning to-one sides must exist before the row references them
        for relation in &write.relations {
            let JoinOn::ForeignKey { column } = &relation.on else {
                continue;
            };
            self.foreign_keys
                .entry(write.table.clone())
                .or_default()
                .insert(column.clone(), relation.target_table.clone());
            let value = match &relation.value {
                RelationValue::One(Some(target)) => {
                    FieldValue::Integer(self.resolve_target(write, column, &relation.target_table, target)?)
                }
                _ => FieldValue::Null,
            };
            row.insert(column.clone(), value);
        }
        self.rows
            .entry(write.table.clone())
            .or_default()
            .insert(id, row);

        for relation in &write.relations {
            if matches!(relation.on, JoinOn::ForeignKey { .. }) {
                continue;
            }
            let mut targets = Vec::new();
            for target in relation.value.targets() {
                targets.push(self.resolve_target(write, &relation.relation, &relation.target_table, target)?);
            }
            match &relation.on {
                JoinOn::ForeignKey { .. } => {}
                JoinOn::Inverse { column } => {
                    self.foreign_keys
                        .entry(relation.target_table.clone())
                        .or_default()
                        .insert(column.clone(), write.table.clone());
                    self.relink_inverse(&relation.target_table, column, id, &targets);
                }
                JoinOn::Pivot {
                    table,
                    owner_column,
                    ..
                } => {
                    let from_source = owner_column == "source_id";
                    let tables = if from_source {
                        (write.table.clone(), relation.target_table.clone())
                    } else {
                        (relation.target_table.clone(), write.table.clone())
                    };
                    self.pivot_tables.insert(table.clone(), tables);
                    let pairs = self.pivots.entry(table.clone()).or_default();
                    pairs.retain(|(source, target)| if from_source { *source != id } else { *target != id });
                    for target in targets {
                        pairs.insert(if from_source { (id, target) } else { (target, id) });
                    }
                }
            }
        }

        self.check_unique(write, id)?;
        Ok(id)
    }

    /// Key of a relation target, persisting nested writes first
    fn resolve_target(
        &mut self,
        owner: &EntityWrite,
        column: &str,
        table: &str,
        target: &WriteTarget,
    ) -> Result<EntityId, StorageError> {
        match target {
            WriteTarget::Reference(id) => {
                if self.row(table, *id).is_none() {
                    return Err(StorageError::IntegrityError {
                        table: owner.table.clone(),
                        column: column.to_string(),
                        message: format!("referenced {} {} does not exist", table, id),
                    });
                }
                Ok(*id)
            }
            WriteTarget::Nested(nested) => self.apply(nested),
        }
    }

    /// Point exactly `targets` at `owner_id` through `column`
    fn relink_inverse(&mut self, table: &str, column: &str, owner_id: EntityId, targets: &[EntityId]) {
        let Some(rows) = self.rows.get_mut(table) else {
            return;
        };
        for (id, row) in rows.iter_mut() {
            let linked = row.get(column).and_then(FieldValue::as_integer) == Some(owner_id);
            if targets.contains(id) {
                row.insert(column.to_string(), FieldValue::Integer(owner_id));
            } else if linked {
                row.insert(column.to_string(), FieldValue::Null);
            }
        }
    }

    fn check_unique(&self, write: &EntityWrite, id: EntityId) -> Result<(), StorageError> {
        let Some(rows) = self.rows.get(&write.table) else {
            return Ok(());
        };
        let Some(current) = rows.get(&id) else {
            return Ok(());
        };
        for columns in &write.unique {
            let values: Vec<&FieldValue> = columns
                .iter()
                .map(|c| current.get(c).unwrap_or(&NULL))
                .collect();
            if values.iter().any(|v| v.is_null()) {
                continue;
            }
            let clash = rows.iter().any(|(other_id, other)| {
                *other_id != id
                    && columns
                        .iter()
                        .zip(&values)
                        .all(|(c, v)| other.get(c) == Some(*v))
            });
            if clash {
                return Err(StorageError::UniqueViolation {
                    table: write.table.clone(),
                    columns: columns.clone(),
                });
            }
        }
        Ok(())
    }

    /// Null out foreign keys and drop pivot rows pointing at a deleted row
    fn detach_references(&mut self, table: &str, id: EntityId) {
        for (owner, columns) in &self.foreign_keys {
            let Some(rows) = self.rows.get_mut(owner) else {
                continue;
            };
            for (column, target) in columns {
                if target != table {
                    continue;
                }
                for row in rows.values_mut() {
                    if row.get(column).and_then(FieldValue::as_integer) == Some(id) {
                        row.insert(column.clone(), FieldValue::Null);
                    }
                }
            }
        }
        for (pivot, (source, target)) in &self.pivot_tables {
            if let Some(pairs) = self.pivots.get_mut(pivot) {
                pairs.retain(|(s, t)| !((source == table && *s == id) || (target == table && *t == id)));
            }
        }
    }
}

fn row_id(row: &Row) -> Option<EntityId> {
    row.get("id").and_then(FieldValue::as_integer)
}

fn evaluate(condition: &Condition, value: &FieldValue, query: &SelectQuery) -> bool {
    let param = condition
        .param
        .as_deref()
        .and_then(|name| query.params.get(name))
        .filter(|p| !p.is_null());
    match condition.op {
        CompareOp::IsNull => value.is_null(),
        CompareOp::Eq => param.is_some_and(|p| !value.is_null() && value.sort_cmp(p) == Ordering::Equal),
        CompareOp::Ne => param.is_some_and(|p| !value.is_null() && value.sort_cmp(p) != Ordering::Equal),
        CompareOp::Like => match (value.as_text(), param.and_then(FieldValue::as_string)) {
            (Some(text), Some(pattern)) => like_matches(&text, pattern),
            _ => false,
        },
    }
}

enum LikeToken {
    Any,
    One,
    Literal(char),
}

/// Case-sensitive LIKE with `\` as escape character
fn like_matches(text: &str, pattern: &str) -> bool {
    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            '%' => LikeToken::Any,
            '_' => LikeToken::One,
            '\\' => LikeToken::Literal(chars.next().unwrap_or('\\')),
            c => LikeToken::Literal(c),
        });
    }
    let text: Vec<char> = text.chars().collect();

    // matched[j]: the first i chars of text match the first j tokens
    let mut matched = vec![false; tokens.len() + 1];
    matched[0] = true;
    for (j, token) in tokens.iter().enumerate() {
        if matches!(token, LikeToken::Any) {
            matched[j + 1] = matched[j];
        }
    }
    for ch in &text {
        let mut next = vec![false; tokens.len() + 1];
        for (j, token) in tokens.iter().enumerate() {
            next[j + 1] = match token {
                LikeToken::Any => next[j] || matched[j + 1],
                LikeToken::One => matched[j],
                LikeToken::Literal(l) => matched[j] && l == ch,
            };
        }
        matched = next;
    }
    matched[tokens.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::RelationWrite;

    fn columns(pairs: &[(&str, FieldValue)]) -> IndexMap<String, FieldValue> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn text(s: &str) -> FieldValue {
        FieldValue::String(s.to_string())
    }

    fn author_relation(target: WriteTarget) -> RelationWrite {
        RelationWrite {
            relation: "author".into(),
            target_table: "user".into(),
            on: JoinOn::ForeignKey {
                column: "author_id".into(),
            },
            value: RelationValue::One(Some(target)),
        }
    }

    fn author_join() -> Join {
        Join {
            parent_alias: "comment".into(),
            relation: "author".into(),
            table: "user".into(),
            alias: "comment_author_1".into(),
            on: JoinOn::ForeignKey {
                column: "author_id".into(),
            },
            many: false,
        }
    }

    #[test]
    fn test_like_matches() {
        assert!(like_matches("hello world", "%wor%"));
        assert!(like_matches("hello", "h_llo"));
        assert!(like_matches("50%", "50\\%"));
        assert!(!like_matches("500", "50\\%"));
        assert!(!like_matches("Hello", "hello"));
        assert!(like_matches("", "%"));
    }

    #[tokio::test]
    async fn test_nested_write_and_join_fetch() {
        let store = InMemoryStore::new();
        let user = EntityWrite::insert("user", columns(&[("name", text("Ada"))]));
        let comment = EntityWrite::insert("comment", columns(&[("message", text("hi"))]))
            .with_relation(author_relation(WriteTarget::Nested(Box::new(user))));
        let id = store.persist(&comment).await.unwrap();
        assert_eq!(id, 1);
        assert_eq!(store.len("user"), 1);

        let mut query = SelectQuery::new("comment");
        query
            .select("comment", "message")
            .select("comment_author_1", "name")
            .left_join(author_join())
            .and_where("comment_author_1", "name", CompareOp::Like, text("A%"));
        let records = store.fetch(&query).await.unwrap();
        assert_eq!(records.len(), 1);
        let Some(RawValue::Entity(author)) = records[0].get("author") else {
            panic!("author not hydrated");
        };
        assert_eq!(author.get_scalar("name"), Some(&text("Ada")));
    }

    #[tokio::test]
    async fn test_failed_write_leaves_no_trace() {
        let store = InMemoryStore::new();
        let comment = EntityWrite::insert("comment", columns(&[("message", text("hi"))]))
            .with_relation(author_relation(WriteTarget::Reference(42)));
        let err = store.persist(&comment).await.unwrap_err();
        assert!(matches!(err, StorageError::IntegrityError { ref column, .. } if column == "author_id"));
        assert!(store.is_empty("comment"));
    }

    #[tokio::test]
    async fn test_unique_violation() {
        let store = InMemoryStore::new();
        let write = EntityWrite::insert("user", columns(&[("email", text("a@b.c"))]))
            .with_unique(vec!["email".into()]);
        store.persist(&write).await.unwrap();
        let err = store.persist(&write).await.unwrap_err();
        assert!(matches!(err, StorageError::UniqueViolation { .. }));
        assert_eq!(store.len("user"), 1);
    }

    #[tokio::test]
    async fn test_order_limit_and_count() {
        let store = InMemoryStore::new();
        for score in [3, 1, 2] {
            store
                .persist(&EntityWrite::insert("meme", columns(&[("score", FieldValue::Integer(score))])))
                .await
                .unwrap();
        }
        let mut query = SelectQuery::new("meme");
        query.order_by("meme", "score", Direction::Desc).set_limit(2);
        let records = store.fetch(&query).await.unwrap();
        let scores: Vec<_> = records.iter().map(|r| r.get_scalar("score").cloned()).collect();
        assert_eq!(scores, vec![Some(FieldValue::Integer(3)), Some(FieldValue::Integer(2))]);
        assert_eq!(store.count(&query.for_count()).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_pivot_and_delete_cleanup() {
        let store = InMemoryStore::new();
        let tag = store
            .persist(&EntityWrite::insert("tag", columns(&[("name", text("rust"))])))
            .await
            .unwrap();
        let meme = EntityWrite::insert("meme", columns(&[("name", text("crab"))])).with_relation(RelationWrite {
            relation: "tags".into(),
            target_table: "tag".into(),
            on: JoinOn::Pivot {
                table: "meme_tags".into(),
                owner_column: "source_id".into(),
                target_column: "target_id".into(),
            },
            value: RelationValue::Many(vec![WriteTarget::Reference(tag)]),
        });
        let meme_id = store.persist(&meme).await.unwrap();
        assert_eq!(store.links("meme_tags"), vec![(meme_id, tag)]);

        assert!(store.delete("tag", tag).await.unwrap());
        assert!(store.links("meme_tags").is_empty());
        assert!(!store.delete("tag", tag).await.unwrap());
    }
}
