//! Routing maps and subresource routes

pub mod mapper;
pub mod routing_map;
pub mod subresource;

pub use mapper::{MapperOptions, RouteMapper};
pub use routing_map::RoutingMap;
pub use subresource::{SubresourceDescriptor, SubresourceManager, SubresourceRoute};
