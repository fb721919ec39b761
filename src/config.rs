//! Pipeline configuration
//!
//! Loaded from a JSON file or built in code. Every field has a default, so
//! `{}` is a valid configuration.

use crate::error::FunnelError;
use crate::types::{TrailingCyclePolicy, PURCHASE_EVENT_TYPE};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Configuration for a funnel run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FunnelConfig {
    /// How purchase-less trailing cycles are treated
    pub trailing_cycles: TrailingCyclePolicy,
    /// Segment customers on worker threads
    pub parallel: bool,
    /// Worker count for parallel segmentation (defaults to available cores)
    pub workers: Option<usize>,
    /// Event type that marks a purchase
    pub purchase_event_type: String,
}

impl Default for FunnelConfig {
    fn default() -> Self {
        Self {
            trailing_cycles: TrailingCyclePolicy::Include,
            parallel: false,
            workers: None,
            purchase_event_type: PURCHASE_EVENT_TYPE.to_string(),
        }
    }
}

impl FunnelConfig {
    /// Parse a configuration from JSON
    pub fn from_json(json: &str) -> Result<Self, FunnelError> {
        let config: FunnelConfig =
            serde_json::from_str(json).map_err(|e| FunnelError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn load(path: &Path) -> Result<Self, FunnelError> {
        let json = fs::read_to_string(path).map_err(|e| {
            FunnelError::ConfigError(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), FunnelError> {
        if self.purchase_event_type.trim().is_empty() {
            return Err(FunnelError::ConfigError(
                "purchase_event_type must not be empty".to_string(),
            ));
        }
        if self.workers == Some(0) {
            return Err(FunnelError::ConfigError(
                "workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Worker count to use for parallel segmentation
    pub fn effective_workers(&self) -> usize {
        self.workers.unwrap_or_else(rayon::current_num_threads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_is_default() {
        assert_eq!(FunnelConfig::from_json("{}").unwrap(), FunnelConfig::default());
    }

    #[test]
    fn test_parse_full_config() {
        let config = FunnelConfig::from_json(
            r#"{
                "trailing_cycles": "exclude",
                "parallel": true,
                "workers": 4,
                "purchase_event_type": "checkout"
            }"#,
        )
        .unwrap();

        assert_eq!(config.trailing_cycles, TrailingCyclePolicy::Exclude);
        assert!(config.parallel);
        assert_eq!(config.effective_workers(), 4);
        assert_eq!(config.purchase_event_type, "checkout");
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(FunnelConfig::from_json(r#"{"workers": 0}"#).is_err());
        assert!(FunnelConfig::from_json(r#"{"purchase_event_type": " "}"#).is_err());
        assert!(FunnelConfig::from_json(r#"{"trailing_cycles": "sometimes"}"#).is_err());
        assert!(FunnelConfig::from_json(r#"{"session_timeout": 60}"#).is_err());
    }

    #[test]
    fn test_default_workers_is_positive() {
        assert!(FunnelConfig::default().effective_workers() >= 1);
    }
}
