//! Backend-neutral select query
//!
//! `SelectQuery` is the query-builder abstraction the planner writes into
//! and storage backends execute. It keeps just enough relational detail
//! (join conditions, pivot tables) for a backend to run it without access
//! to the schema, and renders itself as SQL for logging and tests.

use crate::core::field::FieldValue;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Table in the FROM clause
#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
    pub table: String,
    pub alias: String,
}

/// How a joined table is attached to its parent alias
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOn {
    /// `parent.column = alias.id` (owning to-one side)
    ForeignKey { column: String },
    /// `alias.column = parent.id` (inverse to-many/to-one side)
    Inverse { column: String },
    /// Many-to-many through a pivot table
    Pivot {
        table: String,
        owner_column: String,
        target_column: String,
    },
}

/// One LEFT JOIN
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub parent_alias: String,
    pub relation: String,
    pub table: String,
    pub alias: String,
    pub on: JoinOn,
    /// Whether the relation yields a collection
    pub many: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectColumn {
    pub alias: String,
    pub column: String,
}

/// Comparison operators the planner and filters emit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Like,
    IsNull,
}

/// `alias.column <op> :param`
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub alias: String,
    pub column: String,
    pub op: CompareOp,
    pub param: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "asc" => Some(Direction::Asc),
            "desc" => Some(Direction::Desc),
            _ => None,
        }
    }

    pub fn sql(&self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub alias: String,
    pub column: String,
    pub direction: Direction,
}

/// A select statement over one root table and a tree of left joins
///
/// Conditions compose conjunctively.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    pub root: TableRef,
    pub selects: Vec<SelectColumn>,
    pub joins: Vec<Join>,
    pub conditions: Vec<Condition>,
    pub params: IndexMap<String, FieldValue>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl SelectQuery {
    /// Start a query on `table`, aliased by its own name
    pub fn new(table: &str) -> Self {
        Self {
            root: TableRef {
                table: table.to_string(),
                alias: table.to_string(),
            },
            selects: Vec::new(),
            joins: Vec::new(),
            conditions: Vec::new(),
            params: IndexMap::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn root_alias(&self) -> &str {
        &self.root.alias
    }

    /// Add `alias.column` to the select list (no duplicates)
    pub fn select(&mut self, alias: &str, column: &str) -> &mut Self {
        if !self.has_select(alias, column) {
            self.selects.push(SelectColumn {
                alias: alias.to_string(),
                column: column.to_string(),
            });
        }
        self
    }

    pub fn has_select(&self, alias: &str, column: &str) -> bool {
        self.selects
            .iter()
            .any(|s| s.alias == alias && s.column == column)
    }

    /// Columns selected under one alias, in select order
    pub fn selects_for<'a>(&'a self, alias: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.selects
            .iter()
            .filter(move |s| s.alias == alias)
            .map(|s| s.column.as_str())
    }

    /// Add a left join; a join re-using an existing alias is ignored
    pub fn left_join(&mut self, join: Join) -> &mut Self {
        if self.join_for(&join.alias).is_none() {
            self.joins.push(join);
        }
        self
    }

    pub fn join_for(&self, alias: &str) -> Option<&Join> {
        self.joins.iter().find(|j| j.alias == alias)
    }

    /// Joins hanging directly off `parent_alias`
    pub fn joins_from<'a>(&'a self, parent_alias: &'a str) -> impl Iterator<Item = &'a Join> + 'a {
        self.joins.iter().filter(move |j| j.parent_alias == parent_alias)
    }

    /// Register a named parameter and return its placeholder name
    pub fn bind(&mut self, base: &str, value: FieldValue) -> String {
        let name = format!("{}_{}", base.replace('.', "_"), self.params.len());
        self.params.insert(name.clone(), value);
        name
    }

    /// AND a comparison against a freshly bound parameter
    pub fn and_where(
        &mut self,
        alias: &str,
        column: &str,
        op: CompareOp,
        value: FieldValue,
    ) -> &mut Self {
        let param = self.bind(column, value);
        self.conditions.push(Condition {
            alias: alias.to_string(),
            column: column.to_string(),
            op,
            param: Some(param),
        });
        self
    }

    /// AND `alias.column IS NULL`
    pub fn and_where_null(&mut self, alias: &str, column: &str) -> &mut Self {
        self.conditions.push(Condition {
            alias: alias.to_string(),
            column: column.to_string(),
            op: CompareOp::IsNull,
            param: None,
        });
        self
    }

    pub fn order_by(&mut self, alias: &str, column: &str, direction: Direction) -> &mut Self {
        self.order_by.push(OrderBy {
            alias: alias.to_string(),
            column: column.to_string(),
            direction,
        });
        self
    }

    pub fn set_limit(&mut self, limit: usize) -> &mut Self {
        self.limit = Some(limit);
        self
    }

    pub fn set_offset(&mut self, offset: usize) -> &mut Self {
        self.offset = Some(offset);
        self
    }

    /// Same query without ordering and paging, for counting
    pub fn for_count(&self) -> SelectQuery {
        let mut query = self.clone();
        query.order_by.clear();
        query.limit = None;
        query.offset = None;
        query
    }

    /// Path of relation names from the root to `alias`
    ///
    /// Returns `None` for unknown aliases.
    pub fn relation_path(&self, alias: &str) -> Option<Vec<&str>> {
        let mut path = Vec::new();
        let mut current = alias;
        while current != self.root.alias {
            let join = self.join_for(current)?;
            path.push(join.relation.as_str());
            current = &join.parent_alias;
        }
        path.reverse();
        Some(path)
    }

    /// Render the statement with `:name` placeholders
    pub fn to_sql(&self) -> String {
        let mut sql = format!("SELECT {}", self.select_sql());
        sql.push_str(&self.from_sql());
        sql.push_str(&self.where_sql());
        sql.push_str(&self.order_sql());
        if let Some(limit) = self.limit {
            let _ = write!(sql, " LIMIT {}", limit);
        }
        if let Some(offset) = self.offset {
            let _ = write!(sql, " OFFSET {}", offset);
        }
        sql
    }

    /// Select list; every column is aliased `"alias.column"`
    pub fn select_sql(&self) -> String {
        if self.selects.is_empty() {
            return format!("{}.*", quote(&self.root.alias));
        }
        self.selects
            .iter()
            .map(|s| {
                format!(
                    "{}.{} AS {}",
                    quote(&s.alias),
                    quote(&s.column),
                    quote(&format!("{}.{}", s.alias, s.column))
                )
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// ` FROM` clause with every left join
    pub fn from_sql(&self) -> String {
        let mut sql = format!(" FROM {} {}", quote(&self.root.table), quote(&self.root.alias));
        for join in &self.joins {
            let table = quote(&join.table);
            let alias = quote(&join.alias);
            let parent = quote(&join.parent_alias);
            match &join.on {
                JoinOn::ForeignKey { column } => {
                    let _ = write!(
                        sql,
                        " LEFT JOIN {} {} ON {}.\"id\" = {}.{}",
                        table,
                        alias,
                        alias,
                        parent,
                        quote(column)
                    );
                }
                JoinOn::Inverse { column } => {
                    let _ = write!(
                        sql,
                        " LEFT JOIN {} {} ON {}.{} = {}.\"id\"",
                        table,
                        alias,
                        alias,
                        quote(column),
                        parent
                    );
                }
                JoinOn::Pivot {
                    table: pivot_table,
                    owner_column,
                    target_column,
                } => {
                    let pivot = quote(&format!("{}_pivot", join.alias));
                    let _ = write!(
                        sql,
                        " LEFT JOIN {} {} ON {}.{} = {}.\"id\" LEFT JOIN {} {} ON {}.\"id\" = {}.{}",
                        quote(pivot_table),
                        pivot,
                        pivot,
                        quote(owner_column),
                        parent,
                        table,
                        alias,
                        alias,
                        pivot,
                        quote(target_column)
                    );
                }
            }
        }
        sql
    }

    /// ` WHERE` clause, empty without conditions
    pub fn where_sql(&self) -> String {
        if self.conditions.is_empty() {
            return String::new();
        }
        let clauses: Vec<String> = self
            .conditions
            .iter()
            .map(|c| {
                let target = format!("{}.{}", quote(&c.alias), quote(&c.column));
                let param = c.param.as_deref().unwrap_or_default();
                match c.op {
                    CompareOp::Eq => format!("{} = :{}", target, param),
                    CompareOp::Ne => format!("{} <> :{}", target, param),
                    CompareOp::Like => format!("{} LIKE :{}", target, param),
                    CompareOp::IsNull => format!("{} IS NULL", target),
                }
            })
            .collect();
        format!(" WHERE {}", clauses.join(" AND "))
    }

    /// ` ORDER BY` clause, empty without ordering
    pub fn order_sql(&self) -> String {
        if self.order_by.is_empty() {
            return String::new();
        }
        let orders: Vec<String> = self
            .order_by
            .iter()
            .map(|o| format!("{}.{} {}", quote(&o.alias), quote(&o.column), o.direction.sql()))
            .collect();
        format!(" ORDER BY {}", orders.join(", "))
    }
}

/// Double-quote an SQL identifier
pub fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}
