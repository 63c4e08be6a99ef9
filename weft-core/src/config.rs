//! Graph Configuration
//!
//! Settings a host applies when constructing a [`Graph`](crate::reactive::Graph).
//! The struct is serde-compatible so it can be embedded in a host's own
//! configuration file; missing fields fall back to their defaults.

use serde::{Deserialize, Serialize};

/// Construction-time settings for a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Reject writes to observed nodes made outside of an action instead of
    /// wrapping each one in its own action.
    pub enforce_actions: bool,
}

impl GraphConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether writes outside an action are rejected.
    pub fn enforce_actions(mut self, enforce: bool) -> Self {
        self.enforce_actions = enforce;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_auto_actions() {
        assert!(!GraphConfig::default().enforce_actions);
        assert!(GraphConfig::new().enforce_actions(true).enforce_actions);
    }

    #[test]
    fn missing_fields_use_defaults() {
        let config: GraphConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, GraphConfig::default());

        let config: GraphConfig = serde_json::from_str(r#"{"enforce_actions":true}"#).unwrap();
        assert!(config.enforce_actions);
    }
}
