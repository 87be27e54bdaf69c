//! Schema registry summary
//!
//! The registry is the set of (publisher, resource_type, action) triples
//! discovered across canonical events. The summary below is the wire shape
//! served by `GET /schema` and fed to subject-filter synthesis.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Structured view over the discovered schema registry
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaSummary {
    /// Sorted distinct publishers
    pub publishers: Vec<String>,
    /// Sorted resource types grouped by publisher
    pub resource_types: BTreeMap<String, Vec<String>>,
    /// Sorted distinct actions
    pub actions: Vec<String>,
}

impl SchemaSummary {
    /// True when no triple has been discovered yet
    pub fn is_empty(&self) -> bool {
        self.publishers.is_empty()
    }

    pub fn has_publisher(&self, publisher: &str) -> bool {
        self.publishers.iter().any(|p| p == publisher)
    }

    /// Check a resource type, scoped to a publisher when one is known
    ///
    /// With `publisher = None` (the pattern used a wildcard) any publisher's
    /// resource types count.
    pub fn has_resource_type(&self, publisher: Option<&str>, resource_type: &str) -> bool {
        match publisher {
            Some(p) => self
                .resource_types
                .get(p)
                .map(|types| types.iter().any(|t| t == resource_type))
                .unwrap_or(false),
            None => self
                .resource_types
                .values()
                .any(|types| types.iter().any(|t| t == resource_type)),
        }
    }

    pub fn has_action(&self, action: &str) -> bool {
        self.actions.iter().any(|a| a == action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> SchemaSummary {
        let mut resource_types = BTreeMap::new();
        resource_types.insert(
            "github".to_string(),
            vec!["issue".to_string(), "pull_request".to_string()],
        );
        resource_types.insert("stripe".to_string(), vec!["payment_intent".to_string()]);

        SchemaSummary {
            publishers: vec!["github".to_string(), "stripe".to_string()],
            resource_types,
            actions: vec!["create".to_string(), "update".to_string()],
        }
    }

    #[test]
    fn test_lookups() {
        let s = summary();
        assert!(s.has_publisher("github"));
        assert!(!s.has_publisher("jira"));
        assert!(s.has_resource_type(Some("github"), "pull_request"));
        assert!(!s.has_resource_type(Some("stripe"), "pull_request"));
        assert!(s.has_resource_type(None, "pull_request"));
        assert!(s.has_action("create"));
        assert!(!s.has_action("delete"));
        assert!(!s.is_empty());
        assert!(SchemaSummary::default().is_empty());
    }
}
