use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading node configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
  /// The configuration file could not be read.
  #[error("failed to read config file {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  /// The configuration file is not valid JSON for [`crate::NodeConfig`].
  #[error("invalid config: {0}")]
  Parse(#[from] serde_json::Error),

  /// The configuration parsed but violates a constraint.
  #[error("invalid config value for '{field}': {message}")]
  Invalid { field: String, message: String },
}
