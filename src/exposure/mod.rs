//! Exposure rules and depth limiting

pub mod depth;
pub mod registry;

pub use depth::{DepthGuard, DepthPolicy};
pub use registry::ExposureRegistry;
