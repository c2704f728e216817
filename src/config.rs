//! Read-only scan configuration
//!
//! The core consumes these inputs; owning, validating, and editing them
//! belongs to whatever loads the operator's config. A missing or malformed
//! file degrades to defaults with a logged warning so a scan can still run.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Configuration inputs the scan core reads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Account id to friendly name.
    #[serde(default)]
    pub account_mappings: HashMap<String, String>,
    /// Overrides the partition's default region list when present.
    #[serde(default)]
    pub default_regions: Option<Vec<String>>,
    /// Per-service enable flags; unlisted services are enabled.
    #[serde(default)]
    pub services: HashMap<String, bool>,
}

impl ScanConfig {
    /// Load configuration from disk; any failure yields defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(
                        "Could not parse config {} ({e}), using defaults",
                        path.display()
                    );
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// Friendly name for an account id, or the given default.
    pub fn account_name(&self, account_id: &str, default: &str) -> String {
        self.account_mappings
            .get(account_id)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    /// `"NAME (id)"` when a mapping exists, otherwise just the id.
    pub fn account_label(&self, account_id: &str) -> String {
        match self.account_mappings.get(account_id) {
            Some(name) => format!("{} ({})", name, account_id),
            None => account_id.to_string(),
        }
    }

    /// Whether a service should be scanned at all.
    pub fn service_enabled(&self, service: &str) -> bool {
        self.services.get(service).copied().unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let config: ScanConfig = serde_json::from_str(
            r#"{
                "account_mappings": {"123456789012": "PROD"},
                "default_regions": ["us-east-1"],
                "services": {"rds": false}
            }"#,
        )
        .unwrap();
        assert_eq!(config.account_name("123456789012", "UNKNOWN"), "PROD");
        assert_eq!(config.account_label("123456789012"), "PROD (123456789012)");
        assert_eq!(config.account_label("999999999999"), "999999999999");
        assert!(!config.service_enabled("rds"));
        assert!(config.service_enabled("ec2"));
    }

    #[test]
    fn empty_json_is_all_defaults() {
        let config: ScanConfig = serde_json::from_str("{}").unwrap();
        assert!(config.default_regions.is_none());
        assert_eq!(config.account_name("1", "UNKNOWN-ACCOUNT"), "UNKNOWN-ACCOUNT");
        assert!(config.service_enabled("anything"));
    }

    #[test]
    fn missing_file_is_default() {
        let config = ScanConfig::load(Path::new("/nonexistent/stratus.json"));
        assert!(config.account_mappings.is_empty());
    }

    #[test]
    fn malformed_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{broken").unwrap();
        let config = ScanConfig::load(&path);
        assert!(config.account_mappings.is_empty());
    }
}
