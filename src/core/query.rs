//! Query-string parameters and pagination utilities

use crate::core::error::RequestError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Raw query-string parameters of a collection request
///
/// Parameters are kept verbatim; the filters registered on an entity decide
/// which ones they understand. Unknown parameters are ignored.
///
/// # Example
/// ```rust,ignore
/// // GET /api/comments?message=hello&order[id]=desc&page=2&itemsPerPage=10
/// let params: QueryParams = Query::from_query(uri.query().unwrap())?.0;
/// assert_eq!(params.get("message"), Some("hello"));
/// assert_eq!(params.order_params(), vec![("id".into(), "desc".into())]);
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct QueryParams(IndexMap<String, String>);

impl QueryParams {
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Set a parameter, replacing any previous value
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    /// Parse an optional positive integer parameter
    pub fn positive(&self, name: &str) -> Result<Option<usize>, RequestError> {
        let Some(raw) = self.get(name) else {
            return Ok(None);
        };
        match raw.trim().parse::<usize>() {
            Ok(n) if n >= 1 => Ok(Some(n)),
            _ => Err(RequestError::InvalidQuery {
                parameter: name.to_string(),
                message: format!("expected a positive integer, got '{}'", raw),
            }),
        }
    }

    /// `order[<path>]=<direction>` pairs, in query-string order
    pub fn order_params(&self) -> Vec<(String, String)> {
        self.0
            .iter()
            .filter_map(|(k, v)| {
                let path = k.strip_prefix("order[")?.strip_suffix(']')?;
                Some((path.to_string(), v.clone()))
            })
            .collect()
    }
}

/// Pagination metadata of a collection response
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationMeta {
    /// Current page number (starts at 1)
    pub page: usize,

    pub items_per_page: usize,

    /// Total number of items (after filters)
    pub total_items: usize,

    pub total_pages: usize,

    pub has_next: bool,

    pub has_prev: bool,
}

impl PaginationMeta {
    pub fn new(page: usize, items_per_page: usize, total_items: usize) -> Self {
        let page = page.max(1);
        // avoid division by zero
        let items_per_page = items_per_page.max(1);
        let total_pages = if total_items == 0 {
            0
        } else {
            total_items.div_ceil(items_per_page)
        };
        let end = (page - 1)
            .saturating_mul(items_per_page)
            .saturating_add(items_per_page);

        Self {
            page,
            items_per_page,
            total_items,
            total_pages,
            has_next: end < total_items,
            has_prev: page > 1,
        }
    }
}
