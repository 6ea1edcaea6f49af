//! Core module containing the fundamental types of the engine

pub mod entity;
pub mod error;
pub mod events;
pub mod field;
pub mod iri;
pub mod operation;
pub mod query;
pub mod store;
pub mod validation;

pub use entity::{Entity, EntityId, RawValue, Record};
pub use error::{
    ConfigError, EntityError, ExposeError, RequestError, StorageError, ValidationError,
};
pub use events::{EntityEvent, EventBus, EventEnvelope};
pub use field::{FieldValue, ScalarType};
pub use iri::{IriConverter, IriError};
pub use operation::Operation;
pub use query::{PaginationMeta, QueryParams};
pub use store::{EntityStore, EntityWrite, RelationValue, RelationWrite, WriteTarget};
pub use validation::{RequestContext, ValidationErrors};
