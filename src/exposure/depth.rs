//! Depth limiting for self-referential and cyclic relation graphs
//!
//! The guard decides whether the mapper may follow a relation from the
//! current nesting path. A table may occur along one path at most as many
//! times as the effective depth allows; the first visit of a table is never
//! refused.

use crate::config::MaxDepthConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-class depth policy; unset fields fall back to the global policy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DepthPolicy {
    pub enabled: Option<bool>,
    pub default_depth: Option<u32>,
    /// Overrides for individual relations of the class
    pub relations: HashMap<String, u32>,
}

impl DepthPolicy {
    pub fn with_depth(depth: u32) -> Self {
        Self {
            default_depth: Some(depth),
            ..Self::default()
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: Some(false),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DepthGuard {
    global: MaxDepthConfig,
    policies: HashMap<String, DepthPolicy>,
}

impl DepthGuard {
    pub fn new(global: MaxDepthConfig) -> Self {
        Self {
            global,
            policies: HashMap::new(),
        }
    }

    pub fn set_policy(&mut self, entity: &str, policy: DepthPolicy) {
        self.policies.insert(entity.to_string(), policy);
    }

    pub fn policy(&self, entity: &str) -> Option<&DepthPolicy> {
        self.policies.get(entity)
    }

    /// Whether depth limiting applies to relations declared on `owner`
    pub fn is_enabled(&self, owner: &str) -> bool {
        self.policies
            .get(owner)
            .and_then(|p| p.enabled)
            .unwrap_or(self.global.enabled)
    }

    /// Relation override, then class default, then global default
    pub fn effective_depth(&self, owner: &str, relation: &str) -> u32 {
        let policy = self.policies.get(owner);
        policy
            .and_then(|p| p.relations.get(relation).copied())
            .or_else(|| policy.and_then(|p| p.default_depth))
            .unwrap_or(self.global.default_depth)
            .max(1)
    }

    /// Whether following `owner.relation` into `target` from `path` must stop
    ///
    /// `path` lists the tables from the root down to `owner`, inclusive.
    pub fn should_stop(&self, path: &[String], owner: &str, relation: &str, target: &str) -> bool {
        let occurrences = path.iter().filter(|table| table.as_str() == target).count();
        if occurrences == 0 || !self.is_enabled(owner) {
            return false;
        }
        let stop = occurrences as u32 >= self.effective_depth(owner, relation);
        if stop {
            tracing::debug!(owner, relation, target, occurrences, "depth limit reached");
        }
        stop
    }
}
