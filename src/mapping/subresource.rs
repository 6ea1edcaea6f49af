//! Subresource routes
//!
//! A relation declared as a subresource gets its own collection route under
//! the owner's item route (`/comments/{id}/answers`). Chains are derived
//! by following the subresources of each target in turn, bounded by the
//! depth guard, the per-declaration `max_depth` and a no-repeat rule on
//! hops.

use crate::core::entity::EntityId;
use crate::core::iri::{IriConverter, route_segment};
use crate::core::operation::Operation;
use crate::exposure::DepthGuard;
use indexmap::IndexMap;

/// A relation exposed as a nested collection
#[derive(Debug, Clone, PartialEq)]
pub struct SubresourceDescriptor {
    pub owner: String,
    pub relation: String,
    /// URL segment, defaults to the relation name
    pub segment: String,
    pub target: String,
    /// Relation on the target pointing back to the owner
    pub inverse: String,
    /// Whether the inverse side is a collection
    pub inverse_many: bool,
    /// Operations served on the nested collection (list and/or create)
    pub operations: Vec<Operation>,
    /// How many hops a chain starting here may have
    pub max_depth: Option<u32>,
}

/// One concrete nested route
#[derive(Debug, Clone, PartialEq)]
pub struct SubresourceRoute {
    /// Entity of the first path segment
    pub root: String,
    pub hops: Vec<SubresourceDescriptor>,
}

impl SubresourceRoute {
    pub fn last(&self) -> &SubresourceDescriptor {
        // routes are only built with at least one hop
        &self.hops[self.hops.len() - 1]
    }

    pub fn target(&self) -> &str {
        &self.last().target
    }

    /// Route template relative to the API prefix, with `{p0}`.. parameters
    pub fn path_template(&self) -> String {
        let mut path = format!("/{}", route_segment(&self.root));
        for (i, hop) in self.hops.iter().enumerate() {
            path.push_str(&format!("/{{p{}}}/{}", i, hop.segment));
        }
        path
    }

    /// Names of the id parameters, outermost first
    pub fn parameters(&self) -> Vec<String> {
        (0..self.hops.len()).map(|i| format!("p{}", i)).collect()
    }

    /// Dotted inverse paths from the target back to each parent, with the
    /// index of the parent's id parameter
    ///
    /// For `/users/{p0}/comments/{p1}/answers` this yields
    /// `[("parent", 1), ("parent.author", 0)]`.
    pub fn parent_paths(&self) -> Vec<(String, usize)> {
        let mut out = Vec::with_capacity(self.hops.len());
        let mut path = String::new();
        for (i, hop) in self.hops.iter().enumerate().rev() {
            if path.is_empty() {
                path = hop.inverse.clone();
            } else {
                path = format!("{}.{}", path, hop.inverse);
            }
            out.push((path.clone(), i));
        }
        out
    }

    pub fn serves(&self, operation: Operation) -> bool {
        self.last().operations.contains(&operation)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SubresourceManager {
    by_owner: IndexMap<String, Vec<SubresourceDescriptor>>,
    routes: Vec<SubresourceRoute>,
}

impl SubresourceManager {
    pub fn new(descriptors: Vec<SubresourceDescriptor>, depth: &DepthGuard) -> Self {
        let mut by_owner: IndexMap<String, Vec<SubresourceDescriptor>> = IndexMap::new();
        for descriptor in descriptors {
            by_owner
                .entry(descriptor.owner.clone())
                .or_default()
                .push(descriptor);
        }

        let mut manager = Self {
            by_owner,
            routes: Vec::new(),
        };
        let owners: Vec<String> = manager.by_owner.keys().cloned().collect();
        for owner in owners {
            let mut routes = Vec::new();
            manager.walk(&owner, &owner, &mut vec![owner.clone()], &mut Vec::new(), depth, &mut routes);
            manager.routes.extend(routes);
        }
        tracing::debug!(routes = manager.routes.len(), "subresource routes derived");
        manager
    }

    fn walk(
        &self,
        root: &str,
        current: &str,
        tables: &mut Vec<String>,
        hops: &mut Vec<SubresourceDescriptor>,
        depth: &DepthGuard,
        routes: &mut Vec<SubresourceRoute>,
    ) {
        let Some(descriptors) = self.by_owner.get(current) else {
            return;
        };
        for descriptor in descriptors {
            let repeated = hops
                .iter()
                .any(|h| h.owner == descriptor.owner && h.relation == descriptor.relation);
            if repeated || depth.should_stop(tables, current, &descriptor.relation, &descriptor.target) {
                continue;
            }
            let limit = hops
                .iter()
                .chain(std::iter::once(descriptor))
                .filter_map(|h| h.max_depth)
                .min()
                .unwrap_or(u32::MAX) as usize;
            if hops.len() + 1 > limit {
                continue;
            }

            hops.push(descriptor.clone());
            routes.push(SubresourceRoute {
                root: root.to_string(),
                hops: hops.clone(),
            });
            tables.push(descriptor.target.clone());
            self.walk(root, &descriptor.target, tables, hops, depth, routes);
            tables.pop();
            hops.pop();
        }
    }

    /// Subresources declared on `owner`
    pub fn for_entity(&self, owner: &str) -> &[SubresourceDescriptor] {
        self.by_owner.get(owner).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn find(&self, owner: &str, relation: &str) -> Option<&SubresourceDescriptor> {
        self.for_entity(owner).iter().find(|d| d.relation == relation)
    }

    pub fn routes(&self) -> &[SubresourceRoute] {
        &self.routes
    }

    /// Link to the nested collection of one entity
    pub fn link(&self, iri: &IriConverter, owner: &str, id: EntityId, relation: &str) -> Option<String> {
        self.find(owner, relation)
            .map(|d| iri.subresource_link(owner, id, &d.segment))
    }
}
