//! Entity metadata: descriptors, the registration builder and the frozen
//! bundle handed to the host

pub mod builder;
pub mod descriptor;

pub use builder::{EntityBuilder, SchemaBuilder, SubresourceOptions};
pub use descriptor::{
    ColumnDescriptor, ComputeContext, ComputedProperty, EntityDescriptor, EntityKey, Property,
    RelationDescriptor, RelationKind, SchemaRegistry,
};

use crate::exposure::{DepthGuard, ExposureRegistry};
use crate::mapping::{MapperOptions, RouteMapper, SubresourceManager};
use std::collections::HashSet;
use std::sync::Arc;

/// Everything registration produced, frozen and shareable across requests
#[derive(Debug, Clone)]
pub struct Metadata {
    pub schema: Arc<SchemaRegistry>,
    pub exposure: Arc<ExposureRegistry>,
    pub depth: Arc<DepthGuard>,
    pub subresources: Arc<SubresourceManager>,
    /// Entities whose writes are published on the event bus
    pub searchable: Arc<HashSet<String>>,
    pub options: MapperOptions,
}

impl Metadata {
    /// A route mapper with an empty cache over this metadata
    pub fn mapper(&self) -> RouteMapper {
        RouteMapper::new(
            Arc::clone(&self.schema),
            Arc::clone(&self.exposure),
            Arc::clone(&self.depth),
            Arc::clone(&self.subresources),
            self.options,
        )
    }

    pub fn is_searchable(&self, entity: &str) -> bool {
        self.searchable.contains(entity)
    }
}
