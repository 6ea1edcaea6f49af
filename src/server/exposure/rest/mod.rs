//! REST API exposure
//!
//! Consumes a `ServerHost` and produces an Axum `Router`. Handlers only
//! translate HTTP details (paths, query strings, headers, status codes)
//! into host calls; all engine behavior lives in the host.

use super::super::host::{ListResult, ServerHost};
use crate::core::entity::EntityId;
use crate::core::error::{ExposeError, RequestError};
use crate::core::operation::Operation;
use crate::core::query::QueryParams;
use crate::core::validation::RequestContext;
use crate::mapping::{RoutingMap, SubresourceRoute};
use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Header carrying the authenticated principal's identifier
pub const PRINCIPAL_HEADER: &str = "x-principal-id";

/// REST API exposure implementation
pub struct RestExposure;

#[derive(Clone)]
struct EntityState {
    host: Arc<ServerHost>,
    entity: Arc<str>,
}

#[derive(Clone)]
struct SubresourceState {
    host: Arc<ServerHost>,
    route: Arc<SubresourceRoute>,
}

impl RestExposure {
    /// Build the REST router from a host
    ///
    /// Mounts, for every entity, the collection and item routes plus the
    /// mapping introspection route, then every subresource route and the
    /// health checks. Item routes name their identifier `{p0}` like the
    /// first parameter of subresource routes, since sibling routes must
    /// agree on parameter names.
    pub fn build_router(host: Arc<ServerHost>, custom_routes: Vec<Router>) -> Result<Router> {
        let mut app = Self::health_routes();

        for entity in host.entity_types() {
            let collection = host.iri().collection_path(entity);
            let state = EntityState {
                host: Arc::clone(&host),
                entity: Arc::from(entity),
            };
            let routes = Router::new()
                .route(&collection, get(list).post(create))
                .route(
                    &format!("{}/{{p0}}", collection),
                    get(details).put(update).delete(remove),
                )
                .route(&format!("{}/mapping/{{operation}}", collection), get(mapping))
                .with_state(state);
            app = app.merge(routes);
            tracing::debug!(entity, path = %collection, "entity routes mounted");
        }

        for route in host.subresource_routes() {
            let path = format!("{}{}", host.iri().prefix(), route.path_template());
            let state = SubresourceState {
                host: Arc::clone(&host),
                route: Arc::new(route.clone()),
            };
            app = app.merge(
                Router::new()
                    .route(&path, get(subresource_list).post(subresource_create))
                    .with_state(state),
            );
            tracing::debug!(%path, "subresource route mounted");
        }

        for custom_router in custom_routes {
            app = app.merge(custom_router);
        }

        Ok(app.layer(TraceLayer::new_for_http()))
    }

    fn health_routes() -> Router {
        Router::new()
            .route("/health", get(Self::health_check))
            .route("/healthz", get(Self::health_check))
    }

    async fn health_check() -> Json<Value> {
        Json(json!({
            "status": "ok",
            "service": "this-expose"
        }))
    }
}

fn request_context(headers: &HeaderMap) -> RequestContext {
    match headers.get(PRINCIPAL_HEADER).and_then(|v| v.to_str().ok()) {
        Some(principal) if !principal.is_empty() => RequestContext::for_principal(principal),
        _ => RequestContext::anonymous(),
    }
}

fn parse_id(raw: &str) -> Result<EntityId, RequestError> {
    raw.parse().map_err(|_| RequestError::InvalidPath {
        value: raw.to_string(),
        message: "identifier must be an integer".to_string(),
    })
}

async fn list(
    State(state): State<EntityState>,
    Query(params): Query<QueryParams>,
) -> Result<Json<ListResult>, ExposeError> {
    Ok(Json(state.host.handle_list(&state.entity, &params).await?))
}

async fn details(State(state): State<EntityState>, Path(id): Path<String>) -> Result<Json<Value>, ExposeError> {
    let id = parse_id(&id)?;
    Ok(Json(state.host.handle_details(&state.entity, id).await?))
}

async fn create(
    State(state): State<EntityState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Value>), ExposeError> {
    let item = state
        .host
        .handle_create(&state.entity, &body, &request_context(&headers))
        .await?;
    Ok((StatusCode::CREATED, Json(item)))
}

async fn update(
    State(state): State<EntityState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ExposeError> {
    let id = parse_id(&id)?;
    let item = state
        .host
        .handle_update(&state.entity, id, &body, &request_context(&headers))
        .await?;
    Ok(Json(item))
}

async fn remove(State(state): State<EntityState>, Path(id): Path<String>) -> Result<StatusCode, ExposeError> {
    let id = parse_id(&id)?;
    state.host.handle_delete(&state.entity, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn mapping(
    State(state): State<EntityState>,
    Path(operation): Path<String>,
) -> Result<Json<RoutingMap>, ExposeError> {
    let operation: Operation = operation.parse().map_err(|message| RequestError::InvalidPath {
        value: operation.clone(),
        message,
    })?;
    let map = state.host.handle_mapping(&state.entity, operation)?;
    Ok(Json(RoutingMap::clone(&map)))
}

fn route_ids(route: &SubresourceRoute, params: &HashMap<String, String>) -> Result<Vec<EntityId>, RequestError> {
    route
        .parameters()
        .iter()
        .map(|name| match params.get(name) {
            Some(raw) => parse_id(raw),
            None => Err(RequestError::InvalidPath {
                value: name.clone(),
                message: "missing identifier".to_string(),
            }),
        })
        .collect()
}

async fn subresource_list(
    State(state): State<SubresourceState>,
    Path(params): Path<HashMap<String, String>>,
    Query(query): Query<QueryParams>,
) -> Result<Json<ListResult>, ExposeError> {
    let ids = route_ids(&state.route, &params)?;
    Ok(Json(state.host.handle_subresource_list(&state.route, &ids, &query).await?))
}

async fn subresource_create(
    State(state): State<SubresourceState>,
    Path(params): Path<HashMap<String, String>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Value>), ExposeError> {
    let ids = route_ids(&state.route, &params)?;
    let item = state
        .host
        .handle_subresource_create(&state.route, &ids, &body, &request_context(&headers))
        .await?;
    Ok((StatusCode::CREATED, Json(item)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_context_from_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(request_context(&headers).principal_id, None);
        headers.insert(PRINCIPAL_HEADER, "/api/users/3".parse().unwrap());
        assert_eq!(request_context(&headers).principal_id.as_deref(), Some("/api/users/3"));
    }

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("42").unwrap(), 42);
        assert!(matches!(parse_id("abc"), Err(RequestError::InvalidPath { .. })));
    }
}
