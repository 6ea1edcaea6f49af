//! # This-Expose
//!
//! An exposure, mapping and serialization engine for relational entity
//! graphs served over REST.
//!
//! ## Features
//!
//! - **Per-operation exposure**: each property declares the operations
//!   (`list`, `details`, `create`, `update`) it is visible in, optionally
//!   scoped to the root entity of the route
//! - **Routing maps**: one cached tree per entity and operation, driving
//!   query planning, response shaping and input cleaning alike
//! - **Depth limiting**: per-relation, per-class and global limits stop
//!   self-referential graphs from recursing
//! - **Subresources**: nested collection routes such as
//!   `/users/{p0}/comments/{p1}/answers`
//! - **Validation**: field constraints, input filters and async class
//!   validators, reported per property path
//! - **Pluggable storage**: in-memory for tests, PostgreSQL through `sqlx`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use expose::prelude::*;
//!
//! let mut schema = SchemaBuilder::new();
//! schema.entity("user", |e| {
//!     e.column("name", ScalarType::String)
//!         .one_to_many("comments", "comment", "author")
//!         .expose("name", &["all"])
//!         .subresource("comments");
//! });
//! schema.entity("comment", |e| {
//!     e.column("message", ScalarType::String)
//!         .many_to_one("author", "user")
//!         .expose("message", &["all"])
//!         .expose("author", &["create", "details"]);
//! });
//!
//! ServerBuilder::new()
//!     .with_schema(schema)
//!     .with_store(InMemoryStore::new())
//!     .serve("127.0.0.1:3000")
//!     .await?;
//! ```

pub mod config;
pub mod core;
pub mod exposure;
pub mod mapping;
pub mod query;
pub mod schema;
pub mod serializer;
pub mod server;
pub mod storage;

/// Re-exports of commonly used types and traits
pub mod prelude {
    // === Core ===
    pub use crate::core::{
        ConfigError, Entity, EntityError, EntityEvent, EntityId, EntityStore, EntityWrite,
        EventBus, EventEnvelope, ExposeError, FieldValue, IriConverter, Operation, QueryParams,
        RawValue, Record, RequestContext, RequestError, ScalarType, StorageError,
        ValidationError, ValidationErrors,
    };
    pub use crate::core::validation::{ClassValidator, IsCurrentUser, IsUnique, filters, validators};

    // === Config ===
    pub use crate::config::{ExposeConfig, MaxDepthConfig, PaginationConfig};

    // === Schema and mapping ===
    pub use crate::mapping::{RouteMapper, RoutingMap, SubresourceRoute};
    pub use crate::schema::{ComputeContext, EntityBuilder, Metadata, SchemaBuilder, SubresourceOptions};

    // === Query ===
    pub use crate::query::{
        Direction, Filter, OrderFilter, PaginationFilter, SearchFilter, SearchStrategy,
    };

    // === Serialization ===
    pub use crate::serializer::{Denormalizer, Normalizer};

    // === Storage ===
    pub use crate::storage::InMemoryStore;
    #[cfg(feature = "postgres")]
    pub use crate::storage::{PostgresStore, ensure_schema};

    // === Server ===
    pub use crate::server::{ListResult, RestExposure, ServerBuilder, ServerHost};

    // === External dependencies ===
    pub use anyhow::Result;
    pub use async_trait::async_trait;
    pub use serde::{Deserialize, Serialize};
    pub use serde_json::{Value, json};
}
