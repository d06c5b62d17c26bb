use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::overrides::FlowOverride;

/// Top-level node configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
  /// The node's own compatibility version. Core workflows are versioned by it
  /// and every checkpoint frame is stamped with it.
  pub platform_version: u32,

  /// Explicit responder choices, keyed by initiating workflow type.
  #[serde(default)]
  pub flow_overrides: Vec<FlowOverride>,

  #[serde(default)]
  pub state_machine: StateMachineConfig,

  #[serde(default)]
  pub database: Option<DatabaseConfig>,
}

/// Tuning for the workflow state machine manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateMachineConfig {
  /// Maximum number of suspended instances kept in memory. Older suspended
  /// instances are evicted and rehydrated from their checkpoint on demand.
  pub max_resident_instances: usize,

  /// Number of instances still holding runnable work that a graceful stop
  /// may leave behind before discarding them.
  pub shutdown_acceptable_remaining: usize,

  /// How many times a failed checkpoint commit is retried before the
  /// instance is marked failed.
  pub commit_retries: u32,

  /// Delay between commit retries, in milliseconds.
  pub commit_retry_backoff_ms: u64,

  /// Keep the last checkpoint of failed instances (status `failed`) until it
  /// is explicitly pruned, instead of deleting it.
  pub retain_failed_checkpoints: bool,
}

impl Default for StateMachineConfig {
  fn default() -> Self {
    Self {
      max_resident_instances: 10_000,
      shutdown_acceptable_remaining: 0,
      commit_retries: 3,
      commit_retry_backoff_ms: 50,
      retain_failed_checkpoints: false,
    }
  }
}

/// Durable storage location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
  /// SQLx connection url, e.g. `sqlite://node.db?mode=rwc`.
  pub url: String,
}

impl NodeConfig {
  /// Create a configuration with defaults for everything but the platform version.
  pub fn new(platform_version: u32) -> Self {
    Self {
      platform_version,
      flow_overrides: Vec::new(),
      state_machine: StateMachineConfig::default(),
      database: None,
    }
  }

  /// Parse a configuration from a JSON string and validate it.
  pub fn from_json(content: &str) -> Result<Self, ConfigError> {
    let config: NodeConfig = serde_json::from_str(content)?;
    config.validate()?;
    Ok(config)
  }

  /// Read, parse and validate a configuration file.
  pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    Self::from_json(&content)
  }

  /// Check constraints serde cannot express.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.platform_version == 0 {
      return Err(ConfigError::Invalid {
        field: "platform_version".to_string(),
        message: "must be at least 1".to_string(),
      });
    }

    let mut initiators = HashSet::new();
    for flow_override in &self.flow_overrides {
      if !initiators.insert(flow_override.initiator.as_str()) {
        return Err(ConfigError::Invalid {
          field: "flow_overrides".to_string(),
          message: format!(
            "initiator '{}' is overridden more than once",
            flow_override.initiator
          ),
        });
      }
    }

    Ok(())
  }

  /// The override configured for an initiating type, if any.
  pub fn override_for(&self, initiator: &str) -> Option<&FlowOverride> {
    self
      .flow_overrides
      .iter()
      .find(|o| o.initiator == initiator)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = NodeConfig::from_json(r#"{ "platform_version": 4 }"#).unwrap();

    assert_eq!(config.platform_version, 4);
    assert!(config.flow_overrides.is_empty());
    assert_eq!(config.state_machine, StateMachineConfig::default());
    assert!(config.database.is_none());
  }

  #[test]
  fn test_overrides_and_tuning() {
    let config = NodeConfig::from_json(
      r#"{
        "platform_version": 5,
        "flow_overrides": [{ "initiator": "Sender", "responder": "BaseResponder" }],
        "state_machine": { "max_resident_instances": 2, "retain_failed_checkpoints": true },
        "database": { "url": "sqlite::memory:" }
      }"#,
    )
    .unwrap();

    assert_eq!(
      config.override_for("Sender"),
      Some(&FlowOverride::new("Sender", "BaseResponder"))
    );
    assert_eq!(config.override_for("Other"), None);
    assert_eq!(config.state_machine.max_resident_instances, 2);
    assert!(config.state_machine.retain_failed_checkpoints);
    assert_eq!(config.state_machine.commit_retries, 3);
    assert_eq!(config.database.unwrap().url, "sqlite::memory:");
  }

  #[test]
  fn test_duplicate_override_rejected() {
    let result = NodeConfig::from_json(
      r#"{
        "platform_version": 5,
        "flow_overrides": [
          { "initiator": "Sender", "responder": "A" },
          { "initiator": "Sender", "responder": "B" }
        ]
      }"#,
    );

    assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "flow_overrides"));
  }

  #[test]
  fn test_zero_platform_version_rejected() {
    let result = NodeConfig::from_json(r#"{ "platform_version": 0 }"#);
    assert!(matches!(result, Err(ConfigError::Invalid { .. })));
  }

  #[test]
  fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("node.json");
    std::fs::write(&path, r#"{ "platform_version": 7 }"#).unwrap();

    let config = NodeConfig::load(&path).unwrap();
    assert_eq!(config.platform_version, 7);

    let missing = NodeConfig::load(dir.path().join("missing.json"));
    assert!(matches!(missing, Err(ConfigError::Io { .. })));
  }
}
