use std::collections::HashMap;

use ledgerflow_workflow::{ModuleRef, WorkflowId};
use tracing::{error, info};

use crate::codec::decode;
use crate::error::CheckpointIncompatible;
use crate::record::Checkpoint;

/// Checks persisted checkpoints against the installed code before resumption.
///
/// Verification is all or nothing: the first incompatible checkpoint aborts
/// the whole set.
pub struct CheckpointCompatibilityVerifier {
  installed: HashMap<String, Vec<ModuleRef>>,
  platform_version: u32,
}

impl CheckpointCompatibilityVerifier {
  pub fn new(installed: &[ModuleRef], platform_version: u32) -> Self {
    let mut by_name: HashMap<String, Vec<ModuleRef>> = HashMap::new();
    for module in installed {
      by_name
        .entry(module.name.clone())
        .or_default()
        .push(module.clone());
    }
    Self {
      installed: by_name,
      platform_version,
    }
  }

  /// Decode and check every checkpoint, returning the approved set.
  pub fn verify_all(
    &self,
    checkpoints: &[(WorkflowId, Vec<u8>)],
  ) -> Result<Vec<Checkpoint>, CheckpointIncompatible> {
    let mut approved = Vec::with_capacity(checkpoints.len());

    for (id, bytes) in checkpoints {
      let checkpoint = decode(bytes).map_err(|source| {
        let err = CheckpointIncompatible::CannotBeDeserialized { id: *id, source };
        error!(workflow_id = %id, error = %err, "checkpoint verification failed");
        err
      })?;

      self.verify(&checkpoint).inspect_err(|err| {
        error!(
          workflow_id = %id,
          error = %err,
          remediation = %err.remediation(),
          "checkpoint verification failed"
        );
      })?;

      approved.push(checkpoint);
    }

    info!(
      checkpoints = approved.len(),
      platform_version = self.platform_version,
      "checkpoints verified"
    );
    Ok(approved)
  }

  /// Check the frames of one decoded checkpoint.
  pub fn verify(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointIncompatible> {
    for frame in &checkpoint.stack {
      let workflow_type = &frame.workflow_type;

      if frame.platform_version != self.platform_version {
        return Err(CheckpointIncompatible::CoreVersionIncompatible {
          id: checkpoint.id,
          workflow_type: workflow_type.name.clone(),
          old_version: frame.platform_version,
          current_version: self.platform_version,
        });
      }

      let Some(module) = &workflow_type.module else {
        continue;
      };

      match self.installed.get(&module.name).map(Vec::as_slice) {
        None | Some([]) => {
          return Err(CheckpointIncompatible::ModuleNotInstalled {
            id: checkpoint.id,
            workflow_type: workflow_type.name.clone(),
            module: module.name.clone(),
            hash: module.hash.clone(),
          });
        }
        Some([installed]) => {
          if installed.hash != module.hash {
            return Err(CheckpointIncompatible::ModuleVersionIncompatible {
              id: checkpoint.id,
              workflow_type: workflow_type.name.clone(),
              installed: installed.clone(),
              old_hash: module.hash.clone(),
            });
          }
        }
        Some(_) => {
          return Err(CheckpointIncompatible::DuplicateInstalledModule {
            name: module.name.clone(),
          });
        }
      }
    }
    Ok(())
  }
}
