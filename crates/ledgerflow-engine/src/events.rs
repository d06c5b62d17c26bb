//! Lifecycle notifications for observers of the manager.
//!
//! [`crate::ManagerHandle::track`] returns the current instance set and a
//! broadcast receiver of [`Change`]s, taken together on the manager's task so
//! no change between the snapshot and the subscription is missed.

use ledgerflow_workflow::{WorkflowFailure, WorkflowId, WorkflowState};
use serde::{Deserialize, Serialize};

/// How an instance left the live set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
  Completed { result: serde_json::Value },
  Failed { failure: WorkflowFailure },
}

/// A change to the set of live instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Change {
  Added {
    id: WorkflowId,
    workflow_type: String,
  },
  Removed {
    id: WorkflowId,
    outcome: Outcome,
  },
}

/// One live instance as reported by `track`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSummary {
  pub id: WorkflowId,
  pub workflow_type: String,
  pub state: WorkflowState,
  /// Whether the instance is held in memory rather than only in its checkpoint.
  pub resident: bool,
}
