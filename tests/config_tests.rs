//! Engine configuration: YAML loading, overlays and their effect on the host

mod common;

use axum_test::TestServer;
use common::{blog_schema, seed_thread, seed_users};
use expose::prelude::*;
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

fn host_with(config: ExposeConfig) -> Arc<ServerHost> {
    let host = ServerBuilder::new()
        .with_config(config)
        .with_schema(blog_schema())
        .with_store(InMemoryStore::new())
        .build_host()
        .expect("host should build");
    Arc::new(host)
}

// =============================================================================
// Loading
// =============================================================================

#[test]
fn test_load_from_yaml_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        "api_prefix: /v1\nmax_depth:\n  default_depth: 3\npagination:\n  items_per_page: 10\n"
    )
    .unwrap();

    let config = ExposeConfig::from_yaml_file(file.path()).unwrap();
    assert_eq!(config.api_prefix, "/v1");
    assert_eq!(config.max_depth.default_depth, 3);
    assert!(config.max_depth.enabled);
    assert_eq!(config.pagination.items_per_page, 10);
    assert_eq!(config.pagination.max_items_per_page, 100);
    assert_eq!(config.validation_timeout_ms, 5000);
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.yaml");
    let err = ExposeConfig::from_yaml_file(&path).unwrap_err();
    assert!(matches!(err, ConfigError::FileNotFound { .. }));
    assert!(err.to_string().contains("absent.yaml"));
}

#[test]
fn test_malformed_file_names_the_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "max_depth: [unclosed").unwrap();
    let err = ExposeConfig::from_yaml_file(file.path()).unwrap_err();
    match err {
        ConfigError::ParseError { file: Some(_), .. } => {}
        other => panic!("expected a parse error, got {:?}", other),
    }
}

#[test]
fn test_overlay_replaces_scalars_and_merges_mappings() {
    let base = ExposeConfig::from_yaml_str("max_depth:\n  enabled: false\n  default_depth: 4\n").unwrap();
    let merged = base
        .merge_yaml("max_depth:\n  default_depth: 2\nflatten_singleton_to_iri: false\n")
        .unwrap();
    assert!(!merged.max_depth.enabled);
    assert_eq!(merged.max_depth.default_depth, 2);
    assert!(!merged.flatten_singleton_to_iri);
    assert_eq!(base.max_depth.default_depth, 4);
}

#[test]
fn test_overlay_is_validated() {
    let base = ExposeConfig::default();
    let err = base.merge_yaml("pagination:\n  items_per_page: 500\n").unwrap_err();
    match err {
        ConfigError::InvalidValue { field, value, .. } => {
            assert_eq!(field, "pagination.items_per_page");
            assert_eq!(value, "500");
        }
        other => panic!("expected an invalid value, got {:?}", other),
    }
}

#[test]
fn test_invalid_config_stops_the_builder() {
    let config = ExposeConfig {
        max_nesting: 0,
        ..ExposeConfig::default()
    };
    let result = ServerBuilder::new()
        .with_config(config)
        .with_schema(blog_schema())
        .with_store(InMemoryStore::new())
        .build_host();
    assert!(matches!(result, Err(ConfigError::InvalidValue { field, .. }) if field == "max_nesting"));
}

// =============================================================================
// Effect on the host
// =============================================================================

#[tokio::test]
async fn test_prefix_moves_routes_and_iris() {
    let config = ExposeConfig::from_yaml_str("api_prefix: /v1\n").unwrap();
    let host = host_with(config);
    seed_users(&host, 1).await;
    let server = TestServer::new(RestExposure::build_router(host, vec![]).unwrap()).unwrap();

    let user: Value = server.get("/v1/users/1").await.json();
    assert_eq!(user["name"], "user1");
    assert_eq!(user["comments"], "/v1/users/1/comments");

    let comments: Value = server.get("/v1/users/1/comments").await.json();
    assert_eq!(comments["totalItems"], 0);
}

#[tokio::test]
async fn test_global_depth_expands_threads() {
    let config = ExposeConfig::from_yaml_str("max_depth:\n  default_depth: 3\n").unwrap();
    let host = host_with(config);
    seed_users(&host, 1).await;
    seed_thread(&host, 4).await;

    let comment = host.handle_details("comment", 4).await.unwrap();
    assert_eq!(comment["parent"]["parent"]["id"], 2);
    assert_eq!(comment["parent"]["parent"]["parent"], "/api/comments/1");
}

#[tokio::test]
async fn test_references_without_flattening() {
    let config = ExposeConfig {
        flatten_singleton_to_iri: false,
        ..ExposeConfig::default()
    };
    let host = host_with(config);
    seed_users(&host, 1).await;
    seed_thread(&host, 3).await;

    let comment = host.handle_details("comment", 3).await.unwrap();
    assert_eq!(comment["parent"]["id"], 2);
    assert_eq!(comment["parent"]["parent"], json!({"id": 1}));
}

#[tokio::test]
async fn test_default_page_size() {
    let config = ExposeConfig::from_yaml_str("pagination:\n  items_per_page: 2\n").unwrap();
    let host = host_with(config);
    seed_users(&host, 1).await;
    seed_thread(&host, 5).await;

    let page = host
        .handle_list("comment", &QueryParams::default())
        .await
        .unwrap();
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.total_items, 5);
    let pagination = page.pagination.unwrap();
    assert_eq!(pagination.total_pages, 3);
    assert!(pagination.has_next);
}
