//! ServerBuilder for fluent API to build HTTP servers

use super::exposure::RestExposure;
use super::host::ServerHost;
use crate::config::ExposeConfig;
use crate::core::error::ConfigError;
use crate::core::events::EventBus;
use crate::core::store::EntityStore;
use crate::schema::{Metadata, SchemaBuilder};
use anyhow::Result;
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Builder for creating HTTP servers from a declared schema
///
/// # Example
///
/// ```ignore
/// let app = ServerBuilder::new()
///     .with_config(ExposeConfig::from_yaml_file("expose.yaml")?)
///     .with_schema(schema)
///     .with_store(InMemoryStore::new())
///     .build()?;
/// ```
pub struct ServerBuilder {
    config: ExposeConfig,
    schema: Option<SchemaBuilder>,
    metadata: Option<Metadata>,
    store: Option<Arc<dyn EntityStore>>,
    custom_routes: Vec<Router>,
    event_bus: Option<EventBus>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ExposeConfig::default(),
            schema: None,
            metadata: None,
            store: None,
            custom_routes: Vec::new(),
            event_bus: None,
        }
    }

    pub fn with_config(mut self, config: ExposeConfig) -> Self {
        self.config = config;
        self
    }

    /// Declared entities, resolved against the config at build time
    pub fn with_schema(mut self, schema: SchemaBuilder) -> Self {
        self.schema = Some(schema);
        self.metadata = None;
        self
    }

    /// Already-built metadata, replacing any declared schema
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self.schema = None;
        self
    }

    /// Set the storage backend (required)
    pub fn with_store(mut self, store: impl EntityStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Add custom routes to the server
    ///
    /// Use this for endpoints outside the entity routes, such as
    /// authentication or webhooks.
    pub fn with_custom_routes(mut self, routes: Router) -> Self {
        self.custom_routes.push(routes);
        self
    }

    /// Enable the event bus for write notifications
    ///
    /// `capacity` is the broadcast buffer size; lagging subscribers lose
    /// the oldest events.
    pub fn with_event_bus(mut self, capacity: usize) -> Self {
        self.event_bus = Some(EventBus::new(capacity));
        self
    }

    /// Build the transport-agnostic host
    ///
    /// Every configuration problem surfaces here, before anything is served.
    pub fn build_host(mut self) -> Result<ServerHost, ConfigError> {
        self.config.validate()?;

        let metadata = match (self.metadata.take(), self.schema.take()) {
            (Some(metadata), _) => metadata,
            (None, Some(schema)) => schema.build_with(&self.config)?,
            (None, None) => {
                return Err(ConfigError::InvalidValue {
                    field: "schema".to_string(),
                    value: "none".to_string(),
                    message: "no schema registered, call .with_schema()".to_string(),
                });
            }
        };
        let store = self.store.take().ok_or_else(|| ConfigError::InvalidValue {
            field: "store".to_string(),
            value: "none".to_string(),
            message: "a store is required, call .with_store()".to_string(),
        })?;

        tracing::info!(
            entities = metadata.schema.len(),
            subresources = metadata.subresources.routes().len(),
            backend = store.backend(),
            prefix = %self.config.api_prefix,
            "host built"
        );

        let mut host = ServerHost::new(self.config, metadata, store);
        if let Some(event_bus) = self.event_bus.take() {
            host = host.with_event_bus(event_bus);
        }
        Ok(host)
    }

    /// Build the host and expose it through REST
    pub fn build(mut self) -> Result<Router> {
        let custom_routes = std::mem::take(&mut self.custom_routes);
        let host = Arc::new(self.build_host()?);
        RestExposure::build_router(host, custom_routes)
    }

    /// Serve the application with graceful shutdown
    ///
    /// Stops on SIGTERM or Ctrl+C after in-flight requests complete.
    pub async fn serve(self, addr: &str) -> Result<()> {
        let app = self.build()?;
        let listener = TcpListener::bind(addr).await?;

        tracing::info!("Server listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("Server shutdown complete");
        Ok(())
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for shutdown signal (SIGTERM or Ctrl+C)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal, initiating graceful shutdown...");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::field::ScalarType;
    use crate::storage::InMemoryStore;

    fn schema() -> SchemaBuilder {
        let mut schema = SchemaBuilder::new();
        schema.entity("user", |e| {
            e.column("name", ScalarType::String).expose("name", &["all"]);
        });
        schema
    }

    #[test]
    fn test_new_creates_empty_builder() {
        let builder = ServerBuilder::new();
        assert!(builder.schema.is_none());
        assert!(builder.store.is_none());
        assert!(builder.custom_routes.is_empty());
        assert!(builder.event_bus.is_none());
    }

    #[test]
    fn test_build_host_without_store_fails() {
        let result = ServerBuilder::new().with_schema(schema()).build_host();
        let err = result.err().expect("should be Err");
        assert!(err.to_string().contains("store"), "unexpected error: {}", err);
    }

    #[test]
    fn test_build_host_without_schema_fails() {
        let result = ServerBuilder::new().with_store(InMemoryStore::new()).build_host();
        assert!(result.is_err());
    }

    #[test]
    fn test_build_host_rejects_invalid_config() {
        let mut config = ExposeConfig::default();
        config.max_nesting = 0;
        let result = ServerBuilder::new()
            .with_config(config)
            .with_schema(schema())
            .with_store(InMemoryStore::new())
            .build_host();
        assert!(result.is_err());
    }

    #[test]
    fn test_build_host_with_event_bus_attaches_bus() {
        let host = ServerBuilder::new()
            .with_schema(schema())
            .with_store(InMemoryStore::new())
            .with_event_bus(16)
            .build_host()
            .expect("build_host should succeed");
        assert!(host.event_bus().is_some());
        assert_eq!(host.entity_types(), vec!["user"]);
    }

    #[test]
    fn test_build_with_custom_routes() {
        use axum::routing::get;

        let custom = Router::new().route("/custom", get(|| async { "ok" }));
        let router = ServerBuilder::new()
            .with_schema(schema())
            .with_store(InMemoryStore::new())
            .with_custom_routes(custom)
            .build();
        assert!(router.is_ok());
    }
}
