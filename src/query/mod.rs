//! Query building, planning and collection filters

pub mod builder;
pub mod filter;
pub mod planner;

pub use builder::{
    CompareOp, Condition, Direction, Join, JoinOn, OrderBy, SelectColumn, SelectQuery, TableRef,
};
pub use filter::{
    Filter, FilterContext, OrderFilter, PaginationFilter, SearchFilter, SearchStrategy,
};
pub use planner::{JoinAliases, PathError, QueryPlanner, ResolvedColumn};
