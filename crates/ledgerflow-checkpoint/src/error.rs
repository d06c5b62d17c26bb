use ledgerflow_workflow::{ModuleRef, WorkflowId};
use thiserror::Error;

/// Checkpoint bytes that cannot be turned back into a [`crate::Checkpoint`].
#[derive(Debug, Error)]
pub enum DecodeError {
  #[error("malformed checkpoint: {0}")]
  Malformed(#[from] serde_json::Error),

  #[error("unsupported checkpoint format version {found} (supported: {supported})")]
  UnsupportedFormat { found: u32, supported: u32 },
}

/// Why the persisted checkpoint set cannot be resumed with the installed code.
///
/// Any one of these halts startup.
#[derive(Debug, Error)]
pub enum CheckpointIncompatible {
  #[error("checkpoint {id} cannot be deserialized")]
  CannotBeDeserialized {
    id: WorkflowId,
    #[source]
    source: DecodeError,
  },

  #[error(
    "checkpoint {id} contains workflow '{workflow_type}' suspended on platform version {old_version}, node is running {current_version}"
  )]
  CoreVersionIncompatible {
    id: WorkflowId,
    workflow_type: String,
    old_version: u32,
    current_version: u32,
  },

  #[error(
    "checkpoint {id} contains workflow '{workflow_type}' from module '{module}' which is not installed"
  )]
  ModuleNotInstalled {
    id: WorkflowId,
    workflow_type: String,
    module: String,
    hash: String,
  },

  #[error(
    "checkpoint {id} contains workflow '{workflow_type}' from module '{}' with hash {old_hash}, installed build has hash {}",
    installed.name,
    installed.hash
  )]
  ModuleVersionIncompatible {
    id: WorkflowId,
    workflow_type: String,
    installed: ModuleRef,
    old_hash: String,
  },

  #[error("module '{name}' is installed more than once")]
  DuplicateInstalledModule { name: String },
}

impl CheckpointIncompatible {
  /// What the operator can do to let the node start.
  pub fn remediation(&self) -> String {
    match self {
      CheckpointIncompatible::CannotBeDeserialized { .. } => {
        "restore the node from a backup taken with the software version that wrote the checkpoint"
          .to_string()
      }
      CheckpointIncompatible::CoreVersionIncompatible { old_version, .. } => format!(
        "roll the node back to platform version {} and let in-flight workflows finish before upgrading",
        old_version
      ),
      CheckpointIncompatible::ModuleNotInstalled { module, hash, .. } => {
        format!("install module '{}' with hash {}", module, hash)
      }
      CheckpointIncompatible::ModuleVersionIncompatible {
        installed, old_hash, ..
      } => format!(
        "reinstall module '{}' with hash {} and let in-flight workflows finish before upgrading",
        installed.name, old_hash
      ),
      CheckpointIncompatible::DuplicateInstalledModule { name } => {
        format!("remove the duplicate installation of module '{}'", name)
      }
    }
  }
}
