//! Server module: the transport-agnostic host, its builder and the
//! exposures serving it

pub mod builder;
pub mod exposure;
pub mod host;

pub use builder::ServerBuilder;
pub use exposure::RestExposure;
pub use host::{ListResult, ServerHost};
