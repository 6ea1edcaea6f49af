//! Query planning from routing maps
//!
//! The planner turns a [`RoutingMap`] into selects and left joins on a
//! [`SelectQuery`]. Join aliases are `{table}_{relation}_{n}` with `n` a
//! counter per (table, relation) scoped to one query, and every joined
//! relation path is remembered so filters and ordering on dotted paths
//! reuse the join the map already created.

use crate::core::field::ScalarType;
use crate::core::operation::Operation;
use crate::core::validation::join_path;
use crate::mapping::RoutingMap;
use crate::query::builder::{Join, SelectQuery};
use crate::schema::{EntityDescriptor, RelationDescriptor, SchemaRegistry};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// A dotted property path that cannot be turned into a column
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("unknown property '{property}' on {entity}")]
    UnknownProperty { entity: String, property: String },

    #[error("'{property}' on {entity} is not stored in a column")]
    NotStored { entity: String, property: String },
}

/// Per-query join alias bookkeeping; never shared between queries
#[derive(Debug, Clone, Default)]
pub struct JoinAliases {
    counters: HashMap<(String, String), u32>,
    by_path: HashMap<String, String>,
}

impl JoinAliases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Alias already joined for a relation path, if any
    pub fn alias_for_path(&self, path: &str) -> Option<&str> {
        self.by_path.get(path).map(String::as_str)
    }

    /// Fresh alias for joining `table.relation`
    pub fn next_alias(&mut self, table: &str, relation: &str) -> String {
        let counter = self
            .counters
            .entry((table.to_string(), relation.to_string()))
            .or_insert(0);
        *counter += 1;
        format!("{}_{}_{}", table, relation, counter)
    }

    pub fn remember(&mut self, path: &str, alias: &str) {
        self.by_path.insert(path.to_string(), alias.to_string());
    }
}

/// The column a dotted path resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedColumn {
    pub alias: String,
    pub column: String,
    pub scalar: ScalarType,
    /// Set when the path ends on a relation: `column` is then the target id
    pub target_table: Option<String>,
}

#[derive(Debug, Clone)]
pub struct QueryPlanner {
    schema: Arc<SchemaRegistry>,
    return_id_on_depth_stop: bool,
}

impl QueryPlanner {
    pub fn new(schema: Arc<SchemaRegistry>, return_id_on_depth_stop: bool) -> Self {
        Self {
            schema,
            return_id_on_depth_stop,
        }
    }

    /// Add the selects and joins `map` needs to `query`
    pub fn plan(
        &self,
        query: &mut SelectQuery,
        root: &EntityDescriptor,
        operation: Operation,
        map: &RoutingMap,
        aliases: &mut JoinAliases,
    ) {
        let root_alias = query.root_alias().to_string();
        aliases.remember("", &root_alias);
        self.plan_node(query, aliases, root, &root_alias, "", map);
        tracing::debug!(
            entity = %root.name,
            operation = %operation,
            joins = query.joins.len(),
            selects = query.selects.len(),
            "query planned"
        );
    }

    fn plan_node(
        &self,
        query: &mut SelectQuery,
        aliases: &mut JoinAliases,
        entity: &EntityDescriptor,
        alias: &str,
        path: &str,
        node: &RoutingMap,
    ) {
        query.select(alias, "id");
        for property in &node.select_props {
            if entity.column(property).is_some() {
                query.select(alias, property);
            }
        }

        for name in &node.relation_props {
            if node.subresources.contains(name) {
                continue;
            }
            let Some(relation) = entity.relation(name) else {
                continue;
            };
            if let Some(child) = node.child(name) {
                let child_alias = self.join_relation(query, aliases, entity, alias, path, relation);
                let target = self.schema.target(relation);
                let child_path = join_path(path, name);
                self.plan_node(query, aliases, target, &child_alias, &child_path, child);
            } else if node.truncated.contains(name) && self.return_id_on_depth_stop {
                let child_alias = self.join_relation(query, aliases, entity, alias, path, relation);
                query.select(&child_alias, "id");
            }
        }

        for dependency in &node.hidden_props {
            if let Err(e) = self.select_dependency(query, aliases, entity, alias, path, dependency) {
                // registration already checked dependencies
                tracing::warn!(entity = %entity.name, dependency, error = %e, "skipping dependency");
            }
        }
    }

    /// Left join `relation` under `parent_alias`, reusing an existing join
    pub fn join_relation(
        &self,
        query: &mut SelectQuery,
        aliases: &mut JoinAliases,
        owner: &EntityDescriptor,
        parent_alias: &str,
        parent_path: &str,
        relation: &RelationDescriptor,
    ) -> String {
        let path = join_path(parent_path, &relation.name);
        if let Some(alias) = aliases.alias_for_path(&path) {
            return alias.to_string();
        }
        let alias = aliases.next_alias(&owner.name, &relation.name);
        query.left_join(Join {
            parent_alias: parent_alias.to_string(),
            relation: relation.name.clone(),
            table: relation.target_table.clone(),
            alias: alias.clone(),
            on: relation.join_on(&owner.name),
            many: relation.is_many(),
        });
        aliases.remember(&path, &alias);
        tracing::debug!(path, alias, "join added");
        alias
    }

    /// Resolve a dotted path from the root to a column, joining as needed
    pub fn resolve_path(
        &self,
        query: &mut SelectQuery,
        aliases: &mut JoinAliases,
        root: &EntityDescriptor,
        path: &str,
    ) -> Result<ResolvedColumn, PathError> {
        let root_alias = query.root_alias().to_string();
        self.resolve_from(query, aliases, root, &root_alias, "", path)
    }

    fn resolve_from(
        &self,
        query: &mut SelectQuery,
        aliases: &mut JoinAliases,
        entity: &EntityDescriptor,
        alias: &str,
        base: &str,
        path: &str,
    ) -> Result<ResolvedColumn, PathError> {
        let mut current = entity;
        let mut alias = alias.to_string();
        let mut current_path = base.to_string();
        let segments: Vec<&str> = path.split('.').collect();

        for (i, segment) in segments.iter().enumerate() {
            let last = i + 1 == segments.len();
            if last && let Some(column) = current.column(segment) {
                return Ok(ResolvedColumn {
                    alias,
                    column: column.name.clone(),
                    scalar: column.scalar,
                    target_table: None,
                });
            }
            let Some(relation) = current.relation(segment) else {
                return Err(if current.has_property(segment) {
                    PathError::NotStored {
                        entity: current.name.clone(),
                        property: segment.to_string(),
                    }
                } else {
                    PathError::UnknownProperty {
                        entity: current.name.clone(),
                        property: segment.to_string(),
                    }
                });
            };
            alias = self.join_relation(query, aliases, current, &alias, &current_path, relation);
            current_path = join_path(&current_path, segment);
            current = self.schema.target(relation);
            if last {
                return Ok(ResolvedColumn {
                    alias,
                    column: "id".to_string(),
                    scalar: ScalarType::Integer,
                    target_table: Some(current.name.clone()),
                });
            }
        }
        Err(PathError::UnknownProperty {
            entity: entity.name.clone(),
            property: path.to_string(),
        })
    }

    /// Select what a computed property reads; relations bring every column
    fn select_dependency(
        &self,
        query: &mut SelectQuery,
        aliases: &mut JoinAliases,
        entity: &EntityDescriptor,
        alias: &str,
        path: &str,
        dependency: &str,
    ) -> Result<(), PathError> {
        if let Some((_, owner, last)) = self.schema.walk_path(entity, dependency)
            && owner.computed_property(last).is_some()
        {
            return Ok(());
        }
        let resolved = self.resolve_from(query, aliases, entity, alias, path, dependency)?;
        match &resolved.target_table {
            Some(table) => {
                if let Some(target) = self.schema.by_name(table) {
                    for column in &target.columns {
                        query.select(&resolved.alias, &column.name);
                    }
                }
            }
            None => {
                query.select(&resolved.alias, &resolved.column);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Metadata, SchemaBuilder};
    use serde_json::json;

    fn blog() -> Metadata {
        let mut builder = SchemaBuilder::new();
        builder.entity("user", |e| {
            e.column("name", ScalarType::String)
                .column("email", ScalarType::String)
                .expose("id", &["list"])
                .expose("name", &["list"]);
        });
        builder.entity("comment", |e| {
            e.column("message", ScalarType::String)
                .many_to_one("author", "user")
                .many_to_one("parent", "comment")
                .computed("author_email", &["author.email"], |ctx| {
                    ctx.record
                        .values_at("author.email")
                        .first()
                        .map(|v| v.to_json())
                        .unwrap_or(json!(null))
                })
                .expose("id", &["list"])
                .expose("message", &["list"])
                .expose("author", &["list"])
                .expose("parent", &["list"])
                .expose("author_email", &["list"]);
        });
        builder.build().unwrap()
    }

    #[test]
    fn test_aliases_are_unique_per_relation() {
        let mut aliases = JoinAliases::new();
        assert_eq!(aliases.next_alias("comment", "parent"), "comment_parent_1");
        assert_eq!(aliases.next_alias("comment", "parent"), "comment_parent_2");
        assert_eq!(aliases.next_alias("comment", "author"), "comment_author_1");
    }

    #[test]
    fn test_plan_joins_every_expanded_relation_once() {
        let metadata = blog();
        let comment = metadata.schema.by_name("comment").unwrap();
        let map = metadata.mapper().build("comment", Operation::List).unwrap();
        let planner = QueryPlanner::new(Arc::clone(&metadata.schema), true);

        let mut query = SelectQuery::new("comment");
        let mut aliases = JoinAliases::new();
        planner.plan(&mut query, comment, Operation::List, &map, &mut aliases);

        let joined: Vec<&str> = query.joins.iter().map(|j| j.alias.as_str()).collect();
        assert_eq!(
            joined,
            vec![
                "comment_author_1",
                "comment_parent_1",
                "comment_author_2",
                "comment_parent_2"
            ]
        );
        // the computed dependency reuses the author join
        assert!(query.has_select("comment_author_1", "email"));
        assert!(query.has_select("comment_author_2", "email"));
        // truncated parent of the nested comment only brings its id
        assert!(query.has_select("comment_parent_2", "id"));
        assert!(!query.has_select("comment_parent_2", "message"));
    }

    #[test]
    fn test_dotted_path_reuses_join() {
        let metadata = blog();
        let comment = metadata.schema.by_name("comment").unwrap();
        let map = metadata.mapper().build("comment", Operation::List).unwrap();
        let planner = QueryPlanner::new(Arc::clone(&metadata.schema), true);

        let mut query = SelectQuery::new("comment");
        let mut aliases = JoinAliases::new();
        planner.plan(&mut query, comment, Operation::List, &map, &mut aliases);
        let joins_before = query.joins.len();

        let resolved = planner
            .resolve_path(&mut query, &mut aliases, comment, "author.name")
            .unwrap();
        assert_eq!(resolved.alias, "comment_author_1");
        assert_eq!(resolved.column, "name");
        assert_eq!(query.joins.len(), joins_before);
    }

    #[test]
    fn test_resolve_path_errors() {
        let metadata = blog();
        let comment = metadata.schema.by_name("comment").unwrap();
        let planner = QueryPlanner::new(Arc::clone(&metadata.schema), true);
        let mut query = SelectQuery::new("comment");
        let mut aliases = JoinAliases::new();

        let err = planner
            .resolve_path(&mut query, &mut aliases, comment, "author.nope")
            .unwrap_err();
        assert!(matches!(err, PathError::UnknownProperty { .. }));
        let err = planner
            .resolve_path(&mut query, &mut aliases, comment, "author_email")
            .unwrap_err();
        assert!(matches!(err, PathError::NotStored { .. }));

        let relation = planner
            .resolve_path(&mut query, &mut aliases, comment, "author")
            .unwrap();
        assert_eq!(relation.column, "id");
        assert_eq!(relation.target_table.as_deref(), Some("user"));
    }
}
