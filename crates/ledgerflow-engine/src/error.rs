use ledgerflow_checkpoint::CheckpointIncompatible;
use ledgerflow_registry::RegistryError;
use ledgerflow_store::StoreError;
use ledgerflow_workflow::{Party, WorkflowFailure, WorkflowId};
use thiserror::Error;

/// Conditions that stop the manager from starting. None of them leaves any
/// instance running.
#[derive(Debug, Error)]
pub enum StartupError {
  #[error("invalid responder registrations: {0}")]
  Registry(#[from] RegistryError),

  #[error("failed to load checkpoints: {0}")]
  Store(#[from] StoreError),

  #[error("incompatible checkpoint: {0}")]
  Incompatible(#[from] CheckpointIncompatible),

  /// A verified checkpoint references a workflow type no restorer is
  /// registered for.
  #[error("checkpoint {id} references workflow type '{workflow_type}' which cannot be restored")]
  UnrestorableWorkflow {
    id: WorkflowId,
    workflow_type: String,
  },
}

/// Errors returned through a manager or workflow handle.
#[derive(Debug, Error)]
pub enum ManagerError {
  /// The manager's task has exited.
  #[error("state machine manager is not running")]
  Stopped,

  /// The manager stopped before the instance finished. Its last checkpoint
  /// is kept and it resumes on the next start.
  #[error("workflow {id} was not finished before shutdown")]
  Shutdown { id: WorkflowId },

  #[error(transparent)]
  Workflow(#[from] WorkflowFailure),
}

/// Errors reported by a [`crate::MessageTransport`].
#[derive(Debug, Error)]
pub enum TransportError {
  #[error("party {party} is unreachable")]
  Unreachable { party: Party },

  #[error("transport closed")]
  Closed,
}
