//! Exposure rules: which property is visible to which operation
//!
//! Rules are booleans per (entity, property, operation). A rule may be
//! scoped to a route context, the table name of the root entity of the
//! current request. Resolution concatenates global rules with the rules of
//! the active context (first seen wins the position, duplicates dropped);
//! a context rule overrides the global rule of the same property. Rules
//! declared on ancestor classes are merged after the entity's own.

use crate::core::operation::Operation;
use indexmap::{IndexMap, IndexSet};
use std::collections::{HashMap, HashSet};

type OperationRules = IndexMap<Operation, bool>;

#[derive(Debug, Default, Clone)]
struct EntityRules {
    global: IndexMap<String, OperationRules>,
    contexts: HashMap<String, IndexMap<String, OperationRules>>,
}

/// Registry of every exposure rule, frozen once the host starts
#[derive(Debug, Default, Clone)]
pub struct ExposureRegistry {
    rules: HashMap<String, EntityRules>,
    /// Class followed by its ancestors, nearest first
    chains: HashMap<String, Vec<String>>,
}

impl ExposureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expose `property` of `entity` to `operations`
    pub fn register(
        &mut self,
        entity: &str,
        property: &str,
        operations: &[Operation],
        route_context: Option<&str>,
    ) {
        self.set_rule(entity, property, operations, true, route_context);
    }

    /// Explicitly hide `property` of `entity` from `operations`
    pub fn deny(
        &mut self,
        entity: &str,
        property: &str,
        operations: &[Operation],
        route_context: Option<&str>,
    ) {
        self.set_rule(entity, property, operations, false, route_context);
    }

    fn set_rule(
        &mut self,
        entity: &str,
        property: &str,
        operations: &[Operation],
        exposed: bool,
        route_context: Option<&str>,
    ) {
        let rules = self.rules.entry(entity.to_string()).or_default();
        let table = match route_context {
            Some(context) => rules.contexts.entry(context.to_string()).or_default(),
            None => &mut rules.global,
        };
        let entry = table.entry(property.to_string()).or_default();
        for op in operations {
            entry.insert(*op, exposed);
        }
    }

    /// Declare the inheritance chain of a class (itself first)
    pub fn set_chain(&mut self, entity: &str, chain: Vec<String>) {
        self.chains.insert(entity.to_string(), chain);
    }

    /// Properties of `entity` exposed to `operation` under `route_context`
    ///
    /// Deterministic: the same registrations always resolve to the same
    /// ordered set.
    pub fn resolve(&self, entity: &str, operation: Operation, route_context: &str) -> IndexSet<String> {
        let own_chain;
        let chain = match self.chains.get(entity) {
            Some(chain) => chain.as_slice(),
            None => {
                own_chain = [entity.to_string()];
                &own_chain[..]
            }
        };

        let mut exposed = IndexSet::new();
        let mut denied: HashSet<String> = HashSet::new();
        for class in chain {
            let (class_exposed, class_denied) = self.resolve_own(class, operation, route_context);
            for property in class_exposed {
                if !denied.contains(&property) {
                    exposed.insert(property);
                }
            }
            denied.extend(class_denied);
        }
        exposed
    }

    pub fn is_exposed(&self, entity: &str, property: &str, operation: Operation, route_context: &str) -> bool {
        self.resolve(entity, operation, route_context).contains(property)
    }

    /// Entities that have at least one rule
    pub fn entities(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    /// Rules declared directly on `class`, without ancestors
    fn resolve_own(
        &self,
        class: &str,
        operation: Operation,
        route_context: &str,
    ) -> (IndexSet<String>, HashSet<String>) {
        let mut exposed = IndexSet::new();
        let mut denied = HashSet::new();
        let Some(rules) = self.rules.get(class) else {
            return (exposed, denied);
        };
        let context = rules.contexts.get(route_context);
        let context_rule = |property: &str| {
            context
                .and_then(|c| c.get(property))
                .and_then(|ops| ops.get(&operation))
                .copied()
        };

        for (property, ops) in &rules.global {
            match (context_rule(property), ops.get(&operation)) {
                (Some(false), _) | (None, Some(false)) => {
                    denied.insert(property.clone());
                }
                (Some(true), _) | (None, Some(true)) => {
                    exposed.insert(property.clone());
                }
                (None, None) => {}
            }
        }
        if let Some(context) = context {
            for (property, ops) in context {
                match ops.get(&operation) {
                    Some(true) => {
                        exposed.insert(property.clone());
                    }
                    Some(false) => {
                        denied.insert(property.clone());
                    }
                    None => {}
                }
            }
        }
        (exposed, denied)
    }
}
