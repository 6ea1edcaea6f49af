//! Blog API served over REST
//!
//! This example demonstrates:
//! - Declaring entities with per-operation exposure
//! - A self-referential comment thread limited by depth
//! - Nested subresource routes (`/api/users/{id}/comments`)
//! - Computed properties backed by hidden dependencies
//! - Validation with constraints, input filters and class validators
//!
//! Run with `cargo run --example blog_api`, optionally pointing
//! `EXPOSE_CONFIG` at a YAML file, then try:
//!
//! ```text
//! curl localhost:3000/api/comments/3
//! curl localhost:3000/api/users/1/comments
//! curl localhost:3000/api/comments/mapping/details
//! ```

use expose::prelude::*;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn blog_schema() -> SchemaBuilder {
    let mut schema = SchemaBuilder::new();

    schema.entity("user", |e| {
        e.column("name", ScalarType::String)
            .column("email", ScalarType::String)
            .one_to_many("comments", "comment", "author")
            .unique(&["email"])
            .expose("id", &["all"])
            .expose("name", &["all"])
            .expose("email", &["create"])
            .constraint("email", validators::email())
            .input_filter("email", filters::lowercase())
            .class_validator(IsUnique::new(["email"]))
            .subresource("comments");
    });

    schema.entity("comment", |e| {
        e.column("message", ScalarType::String)
            .many_to_one("author", "user")
            .many_to_one("parent", "comment")
            .one_to_many("answers", "comment", "parent")
            .many_to_many("tags", "tag")
            .expose("id", &["all"])
            .expose("message", &["all"])
            .expose("author", &["create", "list", "details"])
            .expose("parent", &["create", "details"])
            .expose("tags", &["create", "details"])
            .constraint("message", validators::not_blank())
            .input_filter("message", filters::trim())
            .class_validator(IsCurrentUser::new("author"))
            .filter(SearchFilter::new().property("message", SearchStrategy::Partial))
            .filter(OrderFilter::new(&["id", "message"]))
            .subresource("answers")
            .searchable();
    });

    schema.entity("tag", |e| {
        e.column("name", ScalarType::String)
            .unique(&["name"])
            .expose("id", &["all"])
            .expose("name", &["all"]);
    });

    schema.entity("meme", |e| {
        e.column("name", ScalarType::String)
            .column("qualities", ScalarType::Json)
            .nullable_column("cropData", ScalarType::Json)
            .computed("getUrl", &["name", "qualities"], |ctx| {
                let name = ctx.record.get_scalar("name").and_then(FieldValue::as_string);
                let quality = ctx
                    .record
                    .get_scalar("qualities")
                    .map(FieldValue::to_json)
                    .and_then(|q| q.get(0).and_then(Value::as_str).map(str::to_string));
                match (name, quality) {
                    (Some(name), Some(quality)) => json!(format!("/media/{}.{}.jpg", name, quality)),
                    _ => Value::Null,
                }
            })
            .expose("id", &["all"])
            .expose("name", &["create"])
            .expose("qualities", &["create"])
            .expose("getUrl", &["list", "details"]);
    });

    schema
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::var("EXPOSE_CONFIG") {
        Ok(path) => ExposeConfig::from_yaml_file(path)?,
        Err(_) => ExposeConfig::default(),
    };

    let host = Arc::new(
        ServerBuilder::new()
            .with_config(config)
            .with_schema(blog_schema())
            .with_store(InMemoryStore::new())
            .with_event_bus(1024)
            .build_host()?,
    );

    seed(&host).await?;

    if let Some(bus) = host.event_bus() {
        let mut events = bus.subscribe();
        tokio::spawn(async move {
            while let Ok(envelope) = events.recv().await {
                tracing::info!(
                    entity = envelope.event.entity_type(),
                    id = envelope.event.entity_id(),
                    action = envelope.event.action(),
                    "search index notified"
                );
            }
        });
    }

    let app = RestExposure::build_router(Arc::clone(&host), vec![])?;
    let listener = TcpListener::bind("127.0.0.1:3000").await?;
    tracing::info!("Blog API listening on http://127.0.0.1:3000");
    axum::serve(listener, app).await?;
    Ok(())
}

/// A user, two tags and a thread of five comments
async fn seed(host: &ServerHost) -> Result<()> {
    let ada = RequestContext::for_principal("/api/users/1");
    host.handle_create(
        "user",
        &json!({"name": "Ada", "email": "ADA@example.com"}),
        &RequestContext::anonymous(),
    )
    .await?;
    for tag in ["rust", "orm"] {
        host.handle_create("tag", &json!({ "name": tag }), &ada).await?;
    }

    let mut parent = Value::Null;
    for i in 1..=5 {
        let comment = host
            .handle_create(
                "comment",
                &json!({
                    "message": format!("  message {}  ", i),
                    "author": "/api/users/1",
                    "parent": parent,
                    "tags": ["/api/tags/1", "/api/tags/2"],
                }),
                &ada,
            )
            .await?;
        parent = json!(format!("/api/comments/{}", comment["id"]));
    }

    host.handle_create(
        "meme",
        &json!({"name": "doge", "qualities": ["hd", "sd"]}),
        &ada,
    )
    .await?;
    Ok(())
}
