//! Typed error handling for the exposure engine
//!
//! # Error Categories
//!
//! - [`EntityError`]: missing entities and unknown entity routes
//! - [`ConfigError`]: startup-time registration problems (fatal)
//! - [`ValidationError`]: per-request payload rejections, keyed by path
//! - [`StorageError`]: backend failures, always after a rollback
//! - [`RequestError`]: malformed query strings or bodies
//!
//! Depth truncation of self-referential graphs is *not* an error and has no
//! variant here: it only ever shows up as a shorter routing map.
//!
//! # Example
//!
//! ```rust,ignore
//! match host.handle_details("comment", 5).await {
//!     Ok(item) => println!("{}", item),
//!     Err(ExposeError::Entity(EntityError::NotFound { id, .. })) => {
//!         println!("comment {} does not exist", id);
//!     }
//!     Err(e) => eprintln!("other error: {}", e),
//! }
//! ```

use crate::core::entity::EntityId;
use crate::core::validation::ValidationErrors;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::fmt;

/// The main error type of the engine
#[derive(Debug)]
pub enum ExposeError {
    /// Entity lookups (details/update/delete on a missing id, unknown route)
    Entity(EntityError),

    /// Registration/configuration errors
    Config(ConfigError),

    /// Payload validation errors
    Validation(ValidationError),

    /// Storage backend errors
    Storage(StorageError),

    /// Malformed request input
    Request(RequestError),

    /// Internal engine errors (should not happen in normal operation)
    Internal(String),
}

impl fmt::Display for ExposeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExposeError::Entity(e) => write!(f, "{}", e),
            ExposeError::Config(e) => write!(f, "{}", e),
            ExposeError::Validation(e) => write!(f, "{}", e),
            ExposeError::Storage(e) => write!(f, "{}", e),
            ExposeError::Request(e) => write!(f, "{}", e),
            ExposeError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ExposeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExposeError::Entity(e) => Some(e),
            ExposeError::Config(e) => Some(e),
            ExposeError::Validation(e) => Some(e),
            ExposeError::Storage(e) => Some(e),
            ExposeError::Request(e) => Some(e),
            ExposeError::Internal(_) => None,
        }
    }
}

/// Error response structure for HTTP responses
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ExposeError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ExposeError::Entity(e) => e.status_code(),
            ExposeError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ExposeError::Validation(e) => e.status_code(),
            ExposeError::Storage(e) => e.status_code(),
            ExposeError::Request(_) => StatusCode::BAD_REQUEST,
            ExposeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            ExposeError::Entity(e) => e.error_code(),
            ExposeError::Config(_) => "CONFIG_ERROR",
            ExposeError::Validation(e) => e.error_code(),
            ExposeError::Storage(e) => e.error_code(),
            ExposeError::Request(_) => "INVALID_REQUEST",
            ExposeError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Convert to an error response
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            code: self.error_code().to_string(),
            message: self.to_string(),
            details: self.details(),
        }
    }

    /// Field-scoped violations, if this is a validation rejection
    pub fn violations(&self) -> Option<&ValidationErrors> {
        match self {
            ExposeError::Validation(ValidationError::FieldErrors(errors)) => Some(errors),
            _ => None,
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            ExposeError::Entity(EntityError::NotFound { entity_type, id }) => {
                Some(serde_json::json!({
                    "entity_type": entity_type,
                    "id": id
                }))
            }
            ExposeError::Validation(ValidationError::FieldErrors(errors)) => {
                Some(serde_json::json!({ "violations": errors }))
            }
            ExposeError::Request(RequestError::InvalidQuery { parameter, .. }) => {
                Some(serde_json::json!({ "parameter": parameter }))
            }
            _ => None,
        }
    }
}

impl IntoResponse for ExposeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.error_code(), "{}", self);
        }
        let body = Json(self.to_response());
        (status, body).into_response()
    }
}

// =============================================================================
// Entity Errors
// =============================================================================

/// Errors related to entity lookups
#[derive(Debug)]
pub enum EntityError {
    /// Entity was not found
    NotFound { entity_type: String, id: EntityId },

    /// No route is registered for this entity type
    UnknownType { entity_type: String },

    /// The route does not serve this operation
    OperationNotAllowed {
        entity_type: String,
        operation: String,
    },
}

impl fmt::Display for EntityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityError::NotFound { entity_type, id } => {
                write!(f, "{} with id '{}' not found", entity_type, id)
            }
            EntityError::UnknownType { entity_type } => {
                write!(f, "Unknown entity type: {}", entity_type)
            }
            EntityError::OperationNotAllowed {
                entity_type,
                operation,
            } => {
                write!(f, "Operation '{}' is not allowed on {}", operation, entity_type)
            }
        }
    }
}

impl std::error::Error for EntityError {}

impl EntityError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            EntityError::NotFound { .. } => StatusCode::NOT_FOUND,
            EntityError::UnknownType { .. } => StatusCode::NOT_FOUND,
            EntityError::OperationNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            EntityError::NotFound { .. } => "ENTITY_NOT_FOUND",
            EntityError::UnknownType { .. } => "UNKNOWN_ENTITY_TYPE",
            EntityError::OperationNotAllowed { .. } => "OPERATION_NOT_ALLOWED",
        }
    }
}

impl From<EntityError> for ExposeError {
    fn from(err: EntityError) -> Self {
        ExposeError::Entity(err)
    }
}

// =============================================================================
// Config Errors
// =============================================================================

/// Errors raised while loading configuration or freezing registrations
///
/// All of them are fatal: the host refuses to start.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to parse configuration file
    ParseError {
        file: Option<String>,
        message: String,
    },

    /// Configuration file not found
    FileNotFound { path: String },

    /// IO error while reading configuration
    IoError { message: String },

    /// Invalid value in configuration
    InvalidValue {
        field: String,
        value: String,
        message: String,
    },

    /// The same entity was declared twice
    DuplicateEntity { entity: String },

    /// A declaration references an entity that was never registered
    UnknownEntity { entity: String, context: String },

    /// A declaration references a property the entity does not have
    UnknownProperty {
        entity: String,
        property: String,
        context: String,
    },

    /// A declaration references a relation the entity does not have
    UnknownRelation {
        entity: String,
        relation: String,
        context: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ParseError { file, message } => {
                if let Some(file) = file {
                    write!(f, "Failed to parse config file '{}': {}", file, message)
                } else {
                    write!(f, "Failed to parse config: {}", message)
                }
            }
            ConfigError::FileNotFound { path } => {
                write!(f, "Configuration file not found: {}", path)
            }
            ConfigError::IoError { message } => {
                write!(f, "IO error: {}", message)
            }
            ConfigError::InvalidValue {
                field,
                value,
                message,
            } => {
                write!(f, "Invalid value '{}' for field '{}': {}", value, field, message)
            }
            ConfigError::DuplicateEntity { entity } => {
                write!(f, "Entity '{}' is registered twice", entity)
            }
            ConfigError::UnknownEntity { entity, context } => {
                write!(f, "Unknown entity '{}' referenced by {}", entity, context)
            }
            ConfigError::UnknownProperty {
                entity,
                property,
                context,
            } => {
                write!(
                    f,
                    "Unknown property '{}.{}' referenced by {}",
                    entity, property, context
                )
            }
            ConfigError::UnknownRelation {
                entity,
                relation,
                context,
            } => {
                write!(
                    f,
                    "Unknown relation '{}.{}' referenced by {}",
                    entity, relation, context
                )
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for ExposeError {
    fn from(err: ConfigError) -> Self {
        ExposeError::Config(err)
    }
}

// =============================================================================
// Validation Errors
// =============================================================================

/// Errors related to payload validation
#[derive(Debug)]
pub enum ValidationError {
    /// Field- and class-level violations keyed by dotted path
    FieldErrors(ValidationErrors),

    /// Body is not a JSON object
    InvalidJson { message: String },

    /// Validators did not finish in time; nothing was persisted
    Timeout { after_ms: u64 },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::FieldErrors(errors) => {
                let msgs: Vec<String> = errors
                    .iter()
                    .flat_map(|(path, messages)| {
                        messages.iter().map(move |m| format!("{}: {}", path, m))
                    })
                    .collect();
                write!(f, "Validation errors: {}", msgs.join(", "))
            }
            ValidationError::InvalidJson { message } => {
                write!(f, "Invalid JSON: {}", message)
            }
            ValidationError::Timeout { after_ms } => {
                write!(f, "Validation did not complete within {} ms", after_ms)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

impl ValidationError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ValidationError::FieldErrors(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ValidationError::InvalidJson { .. } => StatusCode::BAD_REQUEST,
            ValidationError::Timeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ValidationError::FieldErrors(_) => "VALIDATION_ERROR",
            ValidationError::InvalidJson { .. } => "INVALID_JSON",
            ValidationError::Timeout { .. } => "VALIDATION_TIMEOUT",
        }
    }
}

impl From<ValidationError> for ExposeError {
    fn from(err: ValidationError) -> Self {
        ExposeError::Validation(err)
    }
}

impl From<ValidationErrors> for ExposeError {
    fn from(errors: ValidationErrors) -> Self {
        ExposeError::Validation(ValidationError::FieldErrors(errors))
    }
}

// =============================================================================
// Storage Errors
// =============================================================================

/// Errors reported by storage backends
///
/// Backends roll the enclosing transaction back before returning any of
/// these.
#[derive(Debug)]
pub enum StorageError {
    /// Connection error
    ConnectionError { backend: String, message: String },

    /// Query execution error
    QueryError { backend: String, message: String },

    /// Transaction error
    TransactionError { message: String },

    /// A unique constraint rejected the write
    UniqueViolation { table: String, columns: Vec<String> },

    /// A foreign key or not-null constraint rejected the write
    IntegrityError {
        table: String,
        column: String,
        message: String,
    },

    /// Backend not available
    Unavailable { backend: String },
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ConnectionError { backend, message } => {
                write!(f, "Failed to connect to {}: {}", backend, message)
            }
            StorageError::QueryError { backend, message } => {
                write!(f, "{} query error: {}", backend, message)
            }
            StorageError::TransactionError { message } => {
                write!(f, "Transaction error: {}", message)
            }
            StorageError::UniqueViolation { table, columns } => {
                write!(
                    f,
                    "Unique constraint on {}({}) violated",
                    table,
                    columns.join(", ")
                )
            }
            StorageError::IntegrityError {
                table,
                column,
                message,
            } => {
                write!(f, "Integrity error on {}.{}: {}", table, column, message)
            }
            StorageError::Unavailable { backend } => {
                write!(f, "Storage backend '{}' is unavailable", backend)
            }
        }
    }
}

impl std::error::Error for StorageError {}

impl StorageError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            StorageError::UniqueViolation { .. } => StatusCode::CONFLICT,
            StorageError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            StorageError::UniqueViolation { .. } => "UNIQUE_VIOLATION",
            StorageError::IntegrityError { .. } => "INTEGRITY_ERROR",
            StorageError::Unavailable { .. } => "STORAGE_UNAVAILABLE",
            _ => "STORAGE_ERROR",
        }
    }
}

impl From<StorageError> for ExposeError {
    fn from(err: StorageError) -> Self {
        ExposeError::Storage(err)
    }
}

// =============================================================================
// Request Errors
// =============================================================================

/// Errors related to malformed request input
#[derive(Debug)]
pub enum RequestError {
    /// A query-string parameter could not be applied
    InvalidQuery { parameter: String, message: String },

    /// A path parameter could not be parsed
    InvalidPath { value: String, message: String },
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::InvalidQuery { parameter, message } => {
                write!(f, "Invalid query parameter '{}': {}", parameter, message)
            }
            RequestError::InvalidPath { value, message } => {
                write!(f, "Invalid path segment '{}': {}", value, message)
            }
        }
    }
}

impl std::error::Error for RequestError {}

impl From<RequestError> for ExposeError {
    fn from(err: RequestError) -> Self {
        ExposeError::Request(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_maps_to_404() {
        let err = ExposeError::from(EntityError::NotFound {
            entity_type: "comment".into(),
            id: 3,
        });
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.error_code(), "ENTITY_NOT_FOUND");
        let response = err.to_response();
        assert_eq!(response.details.unwrap()["id"], 3);
    }

    #[test]
    fn test_field_errors_map_to_422_with_violations() {
        let mut errors = ValidationErrors::default();
        errors.add("author", "This value should not be null.");
        let err = ExposeError::from(errors);
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(err.violations().is_some());
        let details = err.to_response().details.unwrap();
        assert_eq!(details["violations"]["author"][0], "This value should not be null.");
    }

    #[test]
    fn test_unique_violation_is_conflict() {
        let err = ExposeError::from(StorageError::UniqueViolation {
            table: "user".into(),
            columns: vec!["email".into()],
        });
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert!(err.to_string().contains("user(email)"));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::UnknownRelation {
            entity: "comment".into(),
            relation: "replies".into(),
            context: "depth override".into(),
        };
        assert_eq!(
            err.to_string(),
            "Unknown relation 'comment.replies' referenced by depth override"
        );
    }
}
