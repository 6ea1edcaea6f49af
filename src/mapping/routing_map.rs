//! The routing map: one operation's view of an entity graph

use crate::core::operation::Operation;
use crate::schema::EntityKey;
use indexmap::{IndexMap, IndexSet};
use serde::Serialize;

/// Tree describing which properties one operation reads or writes
///
/// Each node stands for one entity class reached along a relation path.
/// Only relations listed in `children` are expanded; relations in
/// `truncated` were cut by the depth guard and `subresources` are served
/// as links.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingMap {
    pub entity: String,
    #[serde(skip)]
    pub key: EntityKey,
    pub operation: Operation,
    /// Scalar columns, declaration order
    pub select_props: IndexSet<String>,
    /// Relations that appear in the output (expanded, truncated or linked)
    pub relation_props: IndexSet<String>,
    #[serde(skip_serializing_if = "IndexSet::is_empty")]
    pub computed_props: IndexSet<String>,
    /// Dependencies of computed properties that are loaded but not emitted
    #[serde(skip_serializing_if = "IndexSet::is_empty")]
    pub hidden_props: IndexSet<String>,
    #[serde(skip_serializing_if = "IndexSet::is_empty")]
    pub truncated: IndexSet<String>,
    #[serde(skip_serializing_if = "IndexSet::is_empty")]
    pub subresources: IndexSet<String>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub children: IndexMap<String, RoutingMap>,
}

impl RoutingMap {
    pub fn new(entity: &str, key: EntityKey, operation: Operation) -> Self {
        Self {
            entity: entity.to_string(),
            key,
            operation,
            select_props: IndexSet::new(),
            relation_props: IndexSet::new(),
            computed_props: IndexSet::new(),
            hidden_props: IndexSet::new(),
            truncated: IndexSet::new(),
            subresources: IndexSet::new(),
            children: IndexMap::new(),
        }
    }

    pub fn child(&self, relation: &str) -> Option<&RoutingMap> {
        self.children.get(relation)
    }

    /// Nothing but the identifier is mapped
    ///
    /// Such nodes are references: they are rendered as an IRI and accept
    /// only an identifier on write.
    pub fn is_reference_only(&self) -> bool {
        self.select_props.iter().all(|p| p == "id")
            && self.relation_props.is_empty()
            && self.computed_props.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.select_props.is_empty() && self.relation_props.is_empty() && self.computed_props.is_empty()
    }

    /// Keys the normalizer may emit for this node
    pub fn output_keys(&self) -> IndexSet<&str> {
        self.select_props
            .iter()
            .chain(self.relation_props.iter())
            .chain(self.computed_props.iter())
            .map(String::as_str)
            .collect()
    }

    /// Largest number of times one table occurs along any root-to-leaf path
    pub fn max_occurrences(&self) -> usize {
        fn walk<'a>(node: &'a RoutingMap, path: &mut Vec<&'a str>, best: &mut usize) {
            path.push(&node.entity);
            let count = path.iter().filter(|t| **t == node.entity).count();
            *best = (*best).max(count);
            for child in node.children.values() {
                walk(child, path, best);
            }
            path.pop();
        }
        let mut best = 0;
        walk(self, &mut Vec::new(), &mut best);
        best
    }

    /// Deepest nesting level, the root being level 1
    pub fn height(&self) -> usize {
        1 + self.children.values().map(RoutingMap::height).max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(entity: &str) -> RoutingMap {
        RoutingMap::new(entity, EntityKey(0), Operation::List)
    }

    #[test]
    fn test_reference_only() {
        let mut map = node("user");
        assert!(map.is_reference_only());
        map.select_props.insert("id".into());
        assert!(map.is_reference_only());
        map.select_props.insert("name".into());
        assert!(!map.is_reference_only());
    }

    #[test]
    fn test_max_occurrences_and_height() {
        let mut leaf = node("comment");
        leaf.select_props.insert("id".into());
        let mut middle = node("comment");
        middle.children.insert("parent".into(), leaf);
        let mut root = node("comment");
        root.children.insert("parent".into(), middle);
        root.children.insert("author".into(), node("user"));

        assert_eq!(root.max_occurrences(), 3);
        assert_eq!(root.height(), 3);
    }

    #[test]
    fn test_serialization_skips_empty_sections() {
        let mut map = node("tag");
        map.select_props.insert("name".into());
        let json = serde_json::to_value(&map).unwrap();
        assert_eq!(json["selectProps"][0], "name");
        assert!(json.get("children").is_none());
        assert!(json.get("key").is_none());
    }
}
