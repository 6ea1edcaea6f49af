//! Routing map construction
//!
//! The mapper walks the relation graph from a root entity, asking the
//! exposure registry which properties the operation sees and the depth
//! guard whether each relation may be followed. Maps are memoized per
//! (entity, operation); rebuilding is deterministic, so concurrent builds
//! of the same key are harmless and the last insert wins.

use crate::core::error::EntityError;
use crate::core::operation::Operation;
use crate::exposure::{DepthGuard, ExposureRegistry};
use crate::mapping::routing_map::RoutingMap;
use crate::mapping::subresource::SubresourceManager;
use crate::schema::{EntityDescriptor, EntityKey, Property, SchemaRegistry};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapperOptions {
    /// List relations cut by the depth guard so their ids are still emitted
    pub return_id_on_depth_stop: bool,
    /// Ceiling on nesting levels, used when depth limiting is disabled
    pub max_nesting: usize,
}

impl Default for MapperOptions {
    fn default() -> Self {
        Self {
            return_id_on_depth_stop: true,
            max_nesting: 16,
        }
    }
}

pub struct RouteMapper {
    schema: Arc<SchemaRegistry>,
    exposure: Arc<ExposureRegistry>,
    depth: Arc<DepthGuard>,
    subresources: Arc<SubresourceManager>,
    options: MapperOptions,
    cache: RwLock<HashMap<(EntityKey, Operation), Arc<RoutingMap>>>,
}

impl RouteMapper {
    pub fn new(
        schema: Arc<SchemaRegistry>,
        exposure: Arc<ExposureRegistry>,
        depth: Arc<DepthGuard>,
        subresources: Arc<SubresourceManager>,
        options: MapperOptions,
    ) -> Self {
        Self {
            schema,
            exposure,
            depth,
            subresources,
            options,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Routing map of `entity` for `operation`, from cache when possible
    pub fn build(&self, entity: &str, operation: Operation) -> Result<Arc<RoutingMap>, EntityError> {
        let root = self
            .schema
            .by_name(entity)
            .ok_or_else(|| EntityError::UnknownType {
                entity_type: entity.to_string(),
            })?;
        let key = (root.key, operation);

        if let Ok(cache) = self.cache.read()
            && let Some(map) = cache.get(&key)
        {
            return Ok(Arc::clone(map));
        }

        let map = Arc::new(self.build_uncached(root, operation));
        tracing::debug!(
            entity,
            operation = %operation,
            height = map.height(),
            "routing map built"
        );
        // a poisoned cache only costs a rebuild next time
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(key, Arc::clone(&map));
        }
        Ok(map)
    }

    /// Build a map without touching the cache
    pub fn build_uncached(&self, root: &EntityDescriptor, operation: Operation) -> RoutingMap {
        let mut path = Vec::new();
        self.build_node(root, operation, &root.name, &mut path)
    }

    pub fn cached_len(&self) -> usize {
        self.cache.read().map(|c| c.len()).unwrap_or(0)
    }

    fn build_node(
        &self,
        entity: &EntityDescriptor,
        operation: Operation,
        route_context: &str,
        path: &mut Vec<String>,
    ) -> RoutingMap {
        path.push(entity.name.clone());
        let mut node = RoutingMap::new(&entity.name, entity.key, operation);
        let exposed = self.exposure.resolve(&entity.name, operation, route_context);

        let names: Vec<&str> = entity
            .property_names()
            .filter(|name| exposed.contains(*name))
            .collect();
        for name in names {
            match entity.property(name) {
                Some(Property::Column(column)) => {
                    node.select_props.insert(column.name.clone());
                }
                Some(Property::Computed(computed)) => {
                    node.computed_props.insert(computed.name.clone());
                    node.hidden_props.extend(computed.depends_on.iter().cloned());
                }
                Some(Property::Relation(relation)) => {
                    let target = self.schema.target(relation);
                    let stop = self
                        .depth
                        .should_stop(path, &entity.name, &relation.name, &target.name);
                    let too_deep = path.len() >= self.options.max_nesting;
                    if stop || too_deep {
                        if too_deep && !stop {
                            tracing::warn!(
                                entity = %entity.name,
                                relation = %relation.name,
                                max_nesting = self.options.max_nesting,
                                "nesting ceiling reached"
                            );
                        }
                        node.truncated.insert(relation.name.clone());
                        if self.options.return_id_on_depth_stop {
                            node.relation_props.insert(relation.name.clone());
                        }
                        continue;
                    }

                    let mut child = self.build_node(target, operation, route_context, path);
                    if child.is_empty() {
                        child.select_props.insert("id".to_string());
                    }
                    node.relation_props.insert(relation.name.clone());
                    node.children.insert(relation.name.clone(), child);
                }
                None => {}
            }
        }

        // dependencies already emitted need no hidden copy
        let selected = node.select_props.clone();
        node.hidden_props.retain(|p| !selected.contains(p));

        if !operation.is_write() {
            for subresource in self.subresources.for_entity(&entity.name) {
                if !node.relation_props.contains(&subresource.relation) {
                    node.subresources.insert(subresource.relation.clone());
                    node.relation_props.insert(subresource.relation.clone());
                }
            }
        }

        path.pop();
        node
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::field::ScalarType;
    use crate::schema::SchemaBuilder;

    fn comment_schema(depth: Option<u32>) -> crate::schema::Metadata {
        let mut builder = SchemaBuilder::new();
        builder.entity("user", |e| {
            e.column("name", ScalarType::String)
                .expose("id", &["list"])
                .expose("name", &["list"]);
        });
        builder.entity("comment", |e| {
            e.column("message", ScalarType::String)
                .many_to_one("author", "user")
                .many_to_one("parent", "comment")
                .expose("id", &["list"])
                .expose("message", &["list"])
                .expose("author", &["list"])
                .expose("parent", &["list"]);
            if let Some(depth) = depth {
                e.max_depth(depth);
            }
        });
        builder.build().unwrap()
    }

    #[test]
    fn test_self_reference_is_bounded() {
        let metadata = comment_schema(None);
        let map = metadata.mapper().build("comment", Operation::List).unwrap();
        assert_eq!(map.max_occurrences(), 2);
        let child = map.child("parent").unwrap();
        assert!(child.truncated.contains("parent"));
        assert!(child.relation_props.contains("parent"));
        assert!(child.child("author").is_some());
    }

    #[test]
    fn test_class_depth_override() {
        let metadata = comment_schema(Some(4));
        let map = metadata.mapper().build("comment", Operation::List).unwrap();
        assert_eq!(map.max_occurrences(), 4);
    }

    #[test]
    fn test_cache_returns_same_map() {
        let metadata = comment_schema(None);
        let mapper = metadata.mapper();
        let first = mapper.build("comment", Operation::List).unwrap();
        let second = mapper.build("comment", Operation::List).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(mapper.cached_len(), 1);

        let comment = metadata.schema.by_name("comment").unwrap();
        assert_eq!(mapper.build_uncached(comment, Operation::List), *first);
    }

    #[test]
    fn test_unknown_entity() {
        let metadata = comment_schema(None);
        let err = metadata.mapper().build("nope", Operation::List).unwrap_err();
        assert!(matches!(err, EntityError::UnknownType { .. }));
    }

    #[test]
    fn test_unexposed_operation_yields_empty_map() {
        let metadata = comment_schema(None);
        let map = metadata.mapper().build("comment", Operation::Create).unwrap();
        assert!(map.is_empty());
    }
}
