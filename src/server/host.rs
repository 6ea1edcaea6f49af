//! Server host for transport-agnostic API exposure
//!
//! `ServerHost` owns everything a request needs: the frozen metadata, the
//! routing map cache, the serializers and the store. Its `handle_*`
//! methods are the inbound contract of the engine; exposures (REST today)
//! only translate transport details into calls on the host.

use crate::config::ExposeConfig;
use crate::core::entity::EntityId;
use crate::core::error::{EntityError, ExposeError, RequestError, ValidationError};
use crate::core::events::{EntityEvent, EventBus};
use crate::core::field::FieldValue;
use crate::core::iri::IriConverter;
use crate::core::operation::Operation;
use crate::core::query::{PaginationMeta, QueryParams};
use crate::core::store::{EntityStore, RelationValue, RelationWrite, WriteTarget};
use crate::core::validation::RequestContext;
use crate::mapping::{RouteMapper, RoutingMap, SubresourceRoute};
use crate::query::{
    CompareOp, Direction, Filter, FilterContext, JoinAliases, PaginationFilter, QueryPlanner,
    SelectQuery,
};
use crate::schema::{EntityDescriptor, Metadata};
use crate::serializer::{Denormalizer, Normalizer};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// One page of a collection
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResult {
    pub items: Vec<Value>,
    pub total_items: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<PaginationMeta>,
}

/// Host context containing all engine state
///
/// # Example
///
/// ```rust,ignore
/// let host = ServerBuilder::new()
///     .with_schema(metadata)
///     .with_store(InMemoryStore::new())
///     .build_host()?;
///
/// let page = host.handle_list("comment", &QueryParams::default()).await?;
/// let rest_app = RestExposure::build_router(Arc::new(host), vec![])?;
/// ```
pub struct ServerHost {
    pub config: Arc<ExposeConfig>,
    pub metadata: Metadata,
    pub store: Arc<dyn EntityStore>,
    mapper: RouteMapper,
    planner: QueryPlanner,
    normalizer: Normalizer,
    denormalizer: Denormalizer,

    /// Optional event bus for write notifications
    ///
    /// Only searchable entities publish, and only after their write
    /// committed.
    pub event_bus: Option<Arc<EventBus>>,
}

impl ServerHost {
    pub fn new(config: ExposeConfig, metadata: Metadata, store: Arc<dyn EntityStore>) -> Self {
        let iri = IriConverter::new(&config.api_prefix);
        let normalizer = Normalizer::new(
            Arc::clone(&metadata.schema),
            iri.clone(),
            Arc::clone(&metadata.subresources),
            config.flatten_singleton_to_iri,
        );
        let denormalizer = Denormalizer::new(
            Arc::clone(&metadata.schema),
            iri,
            Duration::from_millis(config.validation_timeout_ms),
        );
        let planner = QueryPlanner::new(Arc::clone(&metadata.schema), config.return_id_on_depth_stop);

        Self {
            mapper: metadata.mapper(),
            config: Arc::new(config),
            metadata,
            store,
            planner,
            normalizer,
            denormalizer,
            event_bus: None,
        }
    }

    /// Set the event bus for write notifications
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(Arc::new(event_bus));
        self
    }

    pub fn event_bus(&self) -> Option<&Arc<EventBus>> {
        self.event_bus.as_ref()
    }

    /// Entity types served by the host, declaration order
    pub fn entity_types(&self) -> Vec<&str> {
        self.metadata.schema.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn iri(&self) -> &IriConverter {
        self.normalizer.iri()
    }

    pub fn subresource_routes(&self) -> &[SubresourceRoute] {
        self.metadata.subresources.routes()
    }

    fn descriptor(&self, entity: &str) -> Result<&EntityDescriptor, ExposeError> {
        self.metadata.schema.by_name(entity).ok_or_else(|| {
            EntityError::UnknownType {
                entity_type: entity.to_string(),
            }
            .into()
        })
    }

    // ---------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------

    /// `GET /{plural}`
    pub async fn handle_list(&self, entity: &str, params: &QueryParams) -> Result<ListResult, ExposeError> {
        self.list_where(entity, params, |_, _, _| Ok(())).await
    }

    /// `GET /{plural}/{id}`
    pub async fn handle_details(&self, entity: &str, id: EntityId) -> Result<Value, ExposeError> {
        let descriptor = self.descriptor(entity)?;
        let map = self.mapper.build(entity, Operation::Details)?;
        let (mut query, _) = self.planned_query(descriptor, Operation::Details, &map);
        let root = query.root_alias().to_string();
        query.and_where(&root, "id", CompareOp::Eq, FieldValue::Integer(id));

        let records = self.store.fetch(&query).await?;
        let record = records.first().ok_or_else(|| EntityError::NotFound {
            entity_type: entity.to_string(),
            id,
        })?;
        Ok(self.normalizer.format(record, Operation::Details, &map))
    }

    /// Exposure map of one operation, for client introspection
    pub fn handle_mapping(&self, entity: &str, operation: Operation) -> Result<Arc<RoutingMap>, ExposeError> {
        Ok(self.mapper.build(entity, operation)?)
    }

    /// `GET /{root}/{p0}/.../{segment}`
    ///
    /// `ids` holds one identifier per hop, outermost first. The innermost
    /// parent must exist.
    pub async fn handle_subresource_list(
        &self,
        route: &SubresourceRoute,
        ids: &[EntityId],
        params: &QueryParams,
    ) -> Result<ListResult, ExposeError> {
        self.check_subresource(route, Operation::List, ids).await?;
        let target = route.target().to_string();
        self.list_where(&target, params, |query, aliases, descriptor| {
            for (path, index) in route.parent_paths() {
                let resolved = self
                    .planner
                    .resolve_path(query, aliases, descriptor, &path)
                    .map_err(|e| ExposeError::Internal(e.to_string()))?;
                query.and_where(
                    &resolved.alias,
                    &resolved.column,
                    CompareOp::Eq,
                    FieldValue::Integer(ids[index]),
                );
            }
            Ok(())
        })
        .await
    }

    async fn list_where<F>(&self, entity: &str, params: &QueryParams, restrict: F) -> Result<ListResult, ExposeError>
    where
        F: FnOnce(&mut SelectQuery, &mut JoinAliases, &EntityDescriptor) -> Result<(), ExposeError>,
    {
        let descriptor = self.descriptor(entity)?;
        let map = self.mapper.build(entity, Operation::List)?;
        let (mut query, mut aliases) = self.planned_query(descriptor, Operation::List, &map);
        restrict(&mut query, &mut aliases, descriptor)?;
        self.apply_filters(descriptor, &mut query, &mut aliases, params)?;

        let total_items = self.store.count(&query.for_count()).await?;
        let records = self.store.fetch(&query).await?;
        let pagination = query.limit.map(|limit| {
            let page = query.offset.unwrap_or(0) / limit.max(1) + 1;
            PaginationMeta::new(page, limit, total_items)
        });
        tracing::debug!(entity, total_items, returned = records.len(), "list served");

        Ok(ListResult {
            items: self.normalizer.format_many(&records, Operation::List, &map),
            total_items,
            pagination,
        })
    }

    fn planned_query(
        &self,
        descriptor: &EntityDescriptor,
        operation: Operation,
        map: &RoutingMap,
    ) -> (SelectQuery, JoinAliases) {
        let mut query = SelectQuery::new(&descriptor.name);
        let mut aliases = JoinAliases::new();
        self.planner.plan(&mut query, descriptor, operation, map, &mut aliases);
        (query, aliases)
    }

    /// Registered filters, then default paging and `id ASC` ordering
    fn apply_filters(
        &self,
        descriptor: &EntityDescriptor,
        query: &mut SelectQuery,
        aliases: &mut JoinAliases,
        params: &QueryParams,
    ) -> Result<(), RequestError> {
        let ctx = FilterContext {
            entity: descriptor,
            planner: &self.planner,
            iri: self.normalizer.iri(),
            pagination: &self.config.pagination,
        };
        for filter in &descriptor.filters {
            filter.apply(query, aliases, params, &ctx)?;
        }
        if !descriptor.filters.iter().any(|f| f.name() == "pagination") {
            PaginationFilter::new().apply(query, aliases, params, &ctx)?;
        }
        if query.order_by.is_empty() {
            let root = query.root_alias().to_string();
            query.order_by(&root, "id", Direction::Asc);
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Writes
    // ---------------------------------------------------------------------

    /// `POST /{plural}`; returns the `details` view of the new entity
    pub async fn handle_create(
        &self,
        entity: &str,
        body: &Value,
        request: &RequestContext,
    ) -> Result<Value, ExposeError> {
        self.descriptor(entity)?;
        let map = self.mapper.build(entity, Operation::Create)?;
        let cleaned = self.clean(body, &map)?;
        self.denormalizer
            .validate(&cleaned, &map, Operation::Create, None, request, self.store.as_ref())
            .await?;
        let write = self.denormalizer.build_write(&cleaned, &map, None)?;
        let id = self.denormalizer.persist(&write, self.store.as_ref()).await?;
        tracing::info!(entity, id, "entity created");

        let item = self.handle_details(entity, id).await?;
        self.publish(entity, || EntityEvent::Created {
            entity_type: entity.to_string(),
            entity_id: id,
            data: item.clone(),
        });
        Ok(item)
    }

    /// `PUT /{plural}/{id}`; absent properties keep their stored value
    pub async fn handle_update(
        &self,
        entity: &str,
        id: EntityId,
        body: &Value,
        request: &RequestContext,
    ) -> Result<Value, ExposeError> {
        self.ensure_exists(entity, id).await?;
        let map = self.mapper.build(entity, Operation::Update)?;
        let cleaned = self.clean(body, &map)?;
        self.denormalizer
            .validate(&cleaned, &map, Operation::Update, Some(id), request, self.store.as_ref())
            .await?;
        let write = self.denormalizer.build_write(&cleaned, &map, Some(id))?;
        self.denormalizer.persist(&write, self.store.as_ref()).await?;
        tracing::info!(entity, id, "entity updated");

        let item = self.handle_details(entity, id).await?;
        self.publish(entity, || EntityEvent::Updated {
            entity_type: entity.to_string(),
            entity_id: id,
            data: item.clone(),
        });
        Ok(item)
    }

    /// `DELETE /{plural}/{id}`; returns the deleted key
    pub async fn handle_delete(&self, entity: &str, id: EntityId) -> Result<EntityId, ExposeError> {
        self.descriptor(entity)?;
        if !self.store.delete(entity, id).await? {
            return Err(EntityError::NotFound {
                entity_type: entity.to_string(),
                id,
            }
            .into());
        }
        tracing::info!(entity, id, "entity deleted");
        self.publish(entity, || EntityEvent::Deleted {
            entity_type: entity.to_string(),
            entity_id: id,
        });
        Ok(id)
    }

    /// `POST /{root}/{p0}/.../{segment}`
    ///
    /// The new entity is attached to the innermost parent through the
    /// inverse relation, whether or not that relation is writable.
    pub async fn handle_subresource_create(
        &self,
        route: &SubresourceRoute,
        ids: &[EntityId],
        body: &Value,
        request: &RequestContext,
    ) -> Result<Value, ExposeError> {
        self.check_subresource(route, Operation::Create, ids).await?;
        let hop = route.last();
        let parent_id = ids[ids.len() - 1];
        let target = self.descriptor(&hop.target)?;
        let inverse = target
            .relation(&hop.inverse)
            .ok_or_else(|| ExposeError::Internal(format!("{}.{} is not a relation", hop.target, hop.inverse)))?;

        let map = self.mapper.build(&hop.target, Operation::Create)?;
        let cleaned = self.clean(body, &map)?;
        self.denormalizer
            .validate(&cleaned, &map, Operation::Create, None, request, self.store.as_ref())
            .await?;
        let mut write = self.denormalizer.build_write(&cleaned, &map, None)?;
        write.relations.retain(|r| r.relation != inverse.name);
        let parent = WriteTarget::Reference(parent_id);
        write.relations.push(RelationWrite {
            relation: inverse.name.clone(),
            target_table: inverse.target_table.clone(),
            on: inverse.join_on(&target.name),
            value: if hop.inverse_many {
                RelationValue::Many(vec![parent])
            } else {
                RelationValue::One(Some(parent))
            },
        });

        let id = self.denormalizer.persist(&write, self.store.as_ref()).await?;
        tracing::info!(entity = %hop.target, id, parent = parent_id, "subresource created");
        let item = self.handle_details(&hop.target, id).await?;
        self.publish(&hop.target, || EntityEvent::Created {
            entity_type: hop.target.clone(),
            entity_id: id,
            data: item.clone(),
        });
        Ok(item)
    }

    // ---------------------------------------------------------------------
    // Helpers
    // ---------------------------------------------------------------------

    fn clean(&self, body: &Value, map: &RoutingMap) -> Result<Value, ExposeError> {
        if !body.is_object() {
            return Err(ValidationError::InvalidJson {
                message: "expected a JSON object".to_string(),
            }
            .into());
        }
        Ok(self.denormalizer.clean(body, map))
    }

    async fn ensure_exists(&self, entity: &str, id: EntityId) -> Result<(), ExposeError> {
        self.descriptor(entity)?;
        let mut query = SelectQuery::new(entity);
        let root = query.root_alias().to_string();
        query.and_where(&root, "id", CompareOp::Eq, FieldValue::Integer(id));
        if self.store.count(&query).await? == 0 {
            return Err(EntityError::NotFound {
                entity_type: entity.to_string(),
                id,
            }
            .into());
        }
        Ok(())
    }

    async fn check_subresource(
        &self,
        route: &SubresourceRoute,
        operation: Operation,
        ids: &[EntityId],
    ) -> Result<(), ExposeError> {
        if !route.serves(operation) {
            return Err(EntityError::OperationNotAllowed {
                entity_type: route.target().to_string(),
                operation: operation.to_string(),
            }
            .into());
        }
        if ids.len() != route.hops.len() {
            return Err(ExposeError::Internal(format!(
                "{} expects {} identifiers",
                route.path_template(),
                route.hops.len()
            )));
        }
        let hop = route.last();
        self.ensure_exists(&hop.owner, ids[ids.len() - 1]).await
    }

    fn publish(&self, entity: &str, event: impl FnOnce() -> EntityEvent) {
        if !self.metadata.is_searchable(entity) {
            return;
        }
        if let Some(bus) = &self.event_bus {
            let receivers = bus.publish(event());
            tracing::debug!(entity, receivers, "event published");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::field::ScalarType;
    use crate::query::{SearchFilter, SearchStrategy};
    use crate::schema::SchemaBuilder;
    use crate::storage::InMemoryStore;
    use serde_json::json;

    fn make_host() -> ServerHost {
        let mut builder = SchemaBuilder::new();
        builder.entity("user", |e| {
            e.column("name", ScalarType::String)
                .one_to_many("comments", "comment", "author")
                .expose("id", &["all"])
                .expose("name", &["all"])
                .subresource("comments");
        });
        builder.entity("comment", |e| {
            e.column("message", ScalarType::String)
                .many_to_one("author", "user")
                .expose("id", &["all"])
                .expose("message", &["all"])
                .expose("author", &["create", "details"])
                .filter(SearchFilter::new().property("message", SearchStrategy::Partial))
                .searchable();
        });
        let metadata = builder.build().unwrap();
        ServerHost::new(ExposeConfig::default(), metadata, Arc::new(InMemoryStore::new()))
    }

    #[tokio::test]
    async fn test_create_then_list_and_details() {
        let host = make_host().with_event_bus(EventBus::new(16));
        let mut events = host.event_bus().unwrap().subscribe();
        let ctx = RequestContext::anonymous();

        let user = host.handle_create("user", &json!({"name": "Ada"}), &ctx).await.unwrap();
        assert_eq!(user["id"], 1);

        let comment = host
            .handle_create("comment", &json!({"message": "hello", "author": "/api/users/1"}), &ctx)
            .await
            .unwrap();
        assert_eq!(comment["author"]["name"], "Ada");

        let envelope = events.recv().await.unwrap();
        assert_eq!(envelope.event.entity_type(), "comment");
        assert_eq!(envelope.event.action(), "created");

        let page = host
            .handle_list("comment", &QueryParams::from_pairs([("message", "ell")]))
            .await
            .unwrap();
        assert_eq!(page.total_items, 1);
        assert_eq!(page.items[0]["message"], "hello");
        assert!(page.items[0].get("author").is_none());
        assert_eq!(page.pagination.unwrap().items_per_page, 30);
    }

    #[tokio::test]
    async fn test_missing_entity_is_not_found() {
        let host = make_host();
        let err = host.handle_details("comment", 9).await.unwrap_err();
        assert!(matches!(err, ExposeError::Entity(EntityError::NotFound { .. })));
        let err = host.handle_delete("comment", 9).await.unwrap_err();
        assert!(matches!(err, ExposeError::Entity(EntityError::NotFound { .. })));
        let err = host
            .handle_update("comment", 9, &json!({}), &RequestContext::anonymous())
            .await
            .unwrap_err();
        assert!(matches!(err, ExposeError::Entity(EntityError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_subresource_list_and_create() {
        let host = make_host();
        let ctx = RequestContext::anonymous();
        host.handle_create("user", &json!({"name": "Ada"}), &ctx).await.unwrap();
        host.handle_create("user", &json!({"name": "Bob"}), &ctx).await.unwrap();
        host.handle_create("comment", &json!({"message": "a", "author": 1}), &ctx)
            .await
            .unwrap();

        let route = host.subresource_routes()[0].clone();
        let created = host
            .handle_subresource_create(&route, &[2], &json!({"message": "b"}), &ctx)
            .await
            .unwrap();
        assert_eq!(created["author"]["id"], 2);

        let page = host
            .handle_subresource_list(&route, &[2], &QueryParams::default())
            .await
            .unwrap();
        assert_eq!(page.total_items, 1);
        assert_eq!(page.items[0]["message"], "b");

        let err = host
            .handle_subresource_list(&route, &[7], &QueryParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ExposeError::Entity(EntityError::NotFound { .. })));
    }

    #[test]
    fn test_mapping_is_cached() {
        let host = make_host();
        let first = host.handle_mapping("comment", Operation::Details).unwrap();
        let second = host.handle_mapping("comment", Operation::Details).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(host.handle_mapping("nope", Operation::List).is_err());
    }
}
