//! Blog schema shared by the integration suites
//!
//! - `user`: unique email, `comments` subresource
//! - `comment`: self-referential `parent`/`answers` thread, tags, image,
//!   `message` exposed for create/list/update only
//! - `meme`: computed `getUrl` and `getRatio` over unexposed columns
//! - `tag`, `image`: simple targets for reference and nested writes

#![allow(dead_code)]

use expose::prelude::*;
use std::sync::Arc;

pub const ADA: &str = "/api/users/1";

pub fn blog_schema() -> SchemaBuilder {
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
            .nullable_column("score", ScalarType::Integer)
            .many_to_one("author", "user")
            .many_to_one("parent", "comment")
            .one_to_many("answers", "comment", "parent")
            .many_to_many("tags", "tag")
            .many_to_one("image", "image")
            .expose("id", &["all"])
            .expose("message", &["create", "list", "update"])
            .expose("score", &["create", "details", "update"])
            .expose("author", &["create", "list", "details"])
            .expose("parent", &["create", "details"])
            .expose("tags", &["create", "details"])
            .expose("image", &["create", "details"])
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
            .expose("id", &["all"])
            .expose("name", &["list", "details"]);
    });

    schema.entity("image", |e| {
        e.column("url", ScalarType::String)
            .expose("url", &["create", "details"])
            .constraint("url", validators::url());
    });

    schema.entity("meme", |e| {
        e.column("name", ScalarType::String)
            .nullable_column("title", ScalarType::String)
            .column("qualities", ScalarType::Json)
            .nullable_column("cropData", ScalarType::Json)
            .many_to_one("author", "user")
            .computed("getUrl", &["name", "qualities"], |ctx| {
                let name = ctx.record.get_scalar("name").map(FieldValue::to_json);
                let quality = ctx
                    .record
                    .get_scalar("qualities")
                    .map(FieldValue::to_json)
                    .and_then(|q| q.get(0).cloned());
                match (name, quality) {
                    (Some(Value::String(name)), Some(Value::String(quality))) => {
                        json!(format!("/media/{}.{}.jpg", name, quality))
                    }
                    _ => Value::Null,
                }
            })
            .computed("getRatio", &["cropData"], |ctx| {
                let crop = ctx.record.get_scalar("cropData").map(FieldValue::to_json);
                let width = crop.as_ref().and_then(|c| c.get("width")).and_then(Value::as_f64);
                let height = crop.as_ref().and_then(|c| c.get("height")).and_then(Value::as_f64);
                match (width, height) {
                    (Some(w), Some(h)) if h != 0.0 => json!(w / h),
                    _ => Value::Null,
                }
            })
            .expose("id", &["all"])
            .expose("title", &["create", "list", "details"])
            .expose("name", &["create"])
            .expose("qualities", &["create"])
            .expose("cropData", &["create"])
            .expose("author", &["create", "details"])
            .expose("getUrl", &["list", "details"])
            .expose("getRatio", &["list", "details"])
            .filter(
                SearchFilter::new()
                    .property("title", SearchStrategy::Partial)
                    .property("author.name", SearchStrategy::Partial),
            );
    });

    schema
}

pub fn blog_metadata() -> Metadata {
    blog_schema().build().expect("blog schema should build")
}

pub fn blog_host(store: InMemoryStore) -> ServerHost {
    ServerBuilder::new()
        .with_schema(blog_schema())
        .with_store(store)
        .with_event_bus(64)
        .build_host()
        .expect("blog host should build")
}

pub fn shared_host() -> (Arc<ServerHost>, InMemoryStore) {
    let store = InMemoryStore::new();
    (Arc::new(blog_host(store.clone())), store)
}

pub fn as_user(id: i64) -> RequestContext {
    RequestContext::for_principal(format!("/api/users/{}", id))
}

/// Create `count` users named `user1`..
pub async fn seed_users(host: &ServerHost, count: usize) {
    for i in 1..=count {
        host.handle_create(
            "user",
            &json!({"name": format!("user{}", i), "email": format!("user{}@example.com", i)}),
            &RequestContext::anonymous(),
        )
        .await
        .expect("user should be created");
    }
}

/// A thread of `length` comments by user 1, each answering the previous one
pub async fn seed_thread(host: &ServerHost, length: usize) {
    let mut parent = Value::Null;
    for i in 1..=length {
        let comment = host
            .handle_create(
                "comment",
                &json!({"message": format!("m{}", i), "author": ADA, "parent": parent}),
                &as_user(1),
            )
            .await
            .expect("comment should be created");
        parent = json!(format!("/api/comments/{}", comment["id"]));
    }
}
