//! HTTP operations an entity route can serve

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the five operations every entity route exposes
///
/// Exposure rules, routing maps and validation are all keyed by operation.
/// The shorthand `all` is accepted by [`Operation::parse_set`] and expands
/// to every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    List,
    Details,
    Update,
    Delete,
}

impl Operation {
    /// Every operation, in declaration order
    pub const ALL: [Operation; 5] = [
        Operation::Create,
        Operation::List,
        Operation::Details,
        Operation::Update,
        Operation::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::List => "list",
            Operation::Details => "details",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }

    /// Whether this operation reads a request body
    pub fn is_write(&self) -> bool {
        matches!(self, Operation::Create | Operation::Update)
    }

    /// Parse a list of operation names, expanding `all`
    ///
    /// Duplicates are removed; first-seen order is kept.
    pub fn parse_set<S: AsRef<str>>(names: &[S]) -> Result<Vec<Operation>, String> {
        let mut out = Vec::new();
        for name in names {
            let name = name.as_ref();
            let ops: Vec<Operation> = if name.eq_ignore_ascii_case("all") {
                Self::ALL.to_vec()
            } else {
                vec![name.parse()?]
            };
            for op in ops {
                if !out.contains(&op) {
                    out.push(op);
                }
            }
        }
        Ok(out)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "create" => Ok(Operation::Create),
            "list" => Ok(Operation::List),
            "details" => Ok(Operation::Details),
            "update" => Ok(Operation::Update),
            "delete" => Ok(Operation::Delete),
            other => Err(format!("unknown operation '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_operation() {
        assert_eq!("details".parse::<Operation>().unwrap(), Operation::Details);
        assert_eq!("LIST".parse::<Operation>().unwrap(), Operation::List);
        assert!("patch".parse::<Operation>().is_err());
    }

    #[test]
    fn test_parse_set_expands_all() {
        let ops = Operation::parse_set(&["all"]).unwrap();
        assert_eq!(ops, Operation::ALL.to_vec());
    }

    #[test]
    fn test_parse_set_dedupes_in_first_seen_order() {
        let ops = Operation::parse_set(&["update", "create", "update"]).unwrap();
        assert_eq!(ops, vec![Operation::Update, Operation::Create]);
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&Operation::Details).unwrap();
        assert_eq!(json, "\"details\"");
        let op: Operation = serde_json::from_str("\"create\"").unwrap();
        assert_eq!(op, Operation::Create);
    }
}
