//! Collection filters
//!
//! Filters are registered per entity and applied to list queries after
//! planning. Each one reads the query-string parameters it understands and
//! adds conditions, ordering or paging; conditions of different filters
//! compose conjunctively.

use crate::config::PaginationConfig;
use crate::core::error::{ConfigError, RequestError};
use crate::core::field::{FieldValue, ScalarType};
use crate::core::iri::IriConverter;
use crate::core::query::QueryParams;
use crate::query::builder::{CompareOp, Direction, SelectQuery};
use crate::query::planner::{JoinAliases, QueryPlanner};
use crate::schema::{EntityDescriptor, SchemaRegistry};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Debug;

/// What a filter may use while applying itself
pub struct FilterContext<'a> {
    pub entity: &'a EntityDescriptor,
    pub planner: &'a QueryPlanner,
    pub iri: &'a IriConverter,
    pub pagination: &'a PaginationConfig,
}

pub trait Filter: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    /// Validate the filter against its entity at registration time
    fn check(&self, _entity: &EntityDescriptor, _schema: &SchemaRegistry) -> Result<(), ConfigError> {
        Ok(())
    }

    fn apply(
        &self,
        query: &mut SelectQuery,
        aliases: &mut JoinAliases,
        params: &QueryParams,
        ctx: &FilterContext<'_>,
    ) -> Result<(), RequestError>;
}

/// Escape LIKE wildcards in user input
fn like_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '%' | '_' | '\\' => {
                out.push('\\');
                out.push(ch);
            }
            c => out.push(c),
        }
    }
    out
}

fn check_path(
    entity: &EntityDescriptor,
    schema: &SchemaRegistry,
    path: &str,
    columns_only: bool,
    context: &str,
) -> Result<(), ConfigError> {
    let resolved = schema.walk_path(entity, path).is_some_and(|(_, owner, last)| {
        owner.column(last).is_some() || (!columns_only && owner.relation(last).is_some())
    });
    if resolved {
        Ok(())
    } else {
        Err(ConfigError::UnknownProperty {
            entity: entity.name.clone(),
            property: path.to_string(),
            context: context.to_string(),
        })
    }
}

fn invalid(parameter: &str, message: impl Into<String>) -> RequestError {
    RequestError::InvalidQuery {
        parameter: parameter.to_string(),
        message: message.into(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchStrategy {
    Exact,
    Partial,
    Start,
    End,
}

impl SearchStrategy {
    fn pattern(&self, value: &str) -> String {
        let escaped = like_escape(value);
        match self {
            SearchStrategy::Exact => escaped,
            SearchStrategy::Partial => format!("%{}%", escaped),
            SearchStrategy::Start => format!("{}%", escaped),
            SearchStrategy::End => format!("%{}", escaped),
        }
    }
}

/// `?<path>=<value>` matching on columns and relations
///
/// Relation paths compare identifiers and accept IRIs. Text columns use
/// the property's strategy; other scalar types always match exactly.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    properties: IndexMap<String, SearchStrategy>,
}

impl SearchFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn property(mut self, path: &str, strategy: SearchStrategy) -> Self {
        self.properties.insert(path.to_string(), strategy);
        self
    }
}

impl Filter for SearchFilter {
    fn name(&self) -> &'static str {
        "search"
    }

    fn check(&self, entity: &EntityDescriptor, schema: &SchemaRegistry) -> Result<(), ConfigError> {
        for path in self.properties.keys() {
            check_path(entity, schema, path, false, "search filter")?;
        }
        Ok(())
    }

    fn apply(
        &self,
        query: &mut SelectQuery,
        aliases: &mut JoinAliases,
        params: &QueryParams,
        ctx: &FilterContext<'_>,
    ) -> Result<(), RequestError> {
        for (path, strategy) in &self.properties {
            let Some(raw) = params.get(path) else {
                continue;
            };
            let resolved = ctx
                .planner
                .resolve_path(query, aliases, ctx.entity, path)
                .map_err(|e| invalid(path, e.to_string()))?;

            if let Some(target) = &resolved.target_table {
                let id = ctx
                    .iri
                    .parse(raw, Some(target.as_str()))
                    .map_err(|e| invalid(path, e.to_string()))?;
                query.and_where(&resolved.alias, "id", CompareOp::Eq, FieldValue::Integer(id));
            } else if resolved.scalar == ScalarType::String && *strategy != SearchStrategy::Exact {
                query.and_where(
                    &resolved.alias,
                    &resolved.column,
                    CompareOp::Like,
                    FieldValue::String(strategy.pattern(raw)),
                );
            } else {
                let value = FieldValue::from_json(&Value::String(raw.to_string()), resolved.scalar)
                    .map_err(|e| invalid(path, e))?;
                query.and_where(&resolved.alias, &resolved.column, CompareOp::Eq, value);
            }
        }
        Ok(())
    }
}

/// `?order[<path>]=asc|desc` on whitelisted properties
#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    properties: Vec<String>,
    defaults: Vec<(String, Direction)>,
}

impl OrderFilter {
    pub fn new(properties: &[&str]) -> Self {
        Self {
            properties: properties.iter().map(|p| p.to_string()).collect(),
            defaults: Vec::new(),
        }
    }

    /// Ordering used when the request asks for none
    pub fn default_order(mut self, path: &str, direction: Direction) -> Self {
        self.defaults.push((path.to_string(), direction));
        self
    }
}

impl Filter for OrderFilter {
    fn name(&self) -> &'static str {
        "order"
    }

    fn check(&self, entity: &EntityDescriptor, schema: &SchemaRegistry) -> Result<(), ConfigError> {
        for path in self
            .properties
            .iter()
            .chain(self.defaults.iter().map(|(p, _)| p))
        {
            check_path(entity, schema, path, true, "order filter")?;
        }
        Ok(())
    }

    fn apply(
        &self,
        query: &mut SelectQuery,
        aliases: &mut JoinAliases,
        params: &QueryParams,
        ctx: &FilterContext<'_>,
    ) -> Result<(), RequestError> {
        let mut requested = Vec::new();
        for (path, raw) in params.order_params() {
            if !self.properties.contains(&path) {
                tracing::debug!(path, "ignoring order on a non-orderable property");
                continue;
            }
            let parameter = format!("order[{}]", path);
            let direction = Direction::parse(&raw)
                .ok_or_else(|| invalid(&parameter, format!("expected asc or desc, got '{}'", raw)))?;
            requested.push((path, direction));
        }
        if requested.is_empty() {
            requested = self.defaults.clone();
        }

        for (path, direction) in requested {
            let resolved = ctx
                .planner
                .resolve_path(query, aliases, ctx.entity, &path)
                .map_err(|e| invalid(&format!("order[{}]", path), e.to_string()))?;
            query.order_by(&resolved.alias, &resolved.column, direction);
        }
        Ok(())
    }
}

/// `?page=<n>&itemsPerPage=<n>` paging
///
/// Unset fields fall back to the engine-wide pagination settings.
#[derive(Debug, Clone, Default)]
pub struct PaginationFilter {
    pub items_per_page: Option<usize>,
    pub max_items_per_page: Option<usize>,
    pub client_items_per_page: Option<bool>,
}

impl PaginationFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items_per_page(mut self, items: usize) -> Self {
        self.items_per_page = Some(items);
        self
    }

    pub fn max_items_per_page(mut self, items: usize) -> Self {
        self.max_items_per_page = Some(items);
        self
    }
}

impl Filter for PaginationFilter {
    fn name(&self) -> &'static str {
        "pagination"
    }

    fn apply(
        &self,
        query: &mut SelectQuery,
        _aliases: &mut JoinAliases,
        params: &QueryParams,
        ctx: &FilterContext<'_>,
    ) -> Result<(), RequestError> {
        let max = self
            .max_items_per_page
            .unwrap_or(ctx.pagination.max_items_per_page)
            .max(1);
        let mut per_page = self
            .items_per_page
            .unwrap_or(ctx.pagination.items_per_page);
        if self
            .client_items_per_page
            .unwrap_or(ctx.pagination.client_items_per_page)
            && let Some(requested) = params.positive("itemsPerPage")?
        {
            per_page = requested;
        }
        let per_page = per_page.clamp(1, max);
        let page = params.positive("page")?.unwrap_or(1);

        let offset = (page - 1)
            .checked_mul(per_page)
            .ok_or_else(|| RequestError::InvalidQuery {
                parameter: "page".to_string(),
                message: "page is out of range".to_string(),
            })?;

        query.set_limit(per_page);
        query.set_offset(offset);
        Ok(())
    }
}
