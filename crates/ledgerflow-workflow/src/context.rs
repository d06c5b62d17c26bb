use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ids::Party;

/// Who or what started a workflow instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvocationOrigin {
  /// Started over RPC by an authenticated actor.
  Rpc { actor: String },
  /// Started as a responder to a counterparty's initiating workflow.
  Peer { party: Party },
  /// Started by an installed node service.
  Service { name: String },
  /// Started by the scheduler.
  Scheduled,
}

/// Invocation context recorded with every instance and its checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationContext {
  pub origin: InvocationOrigin,
  pub trace_id: Uuid,
  pub started_at: DateTime<Utc>,
}

impl InvocationContext {
  pub fn new(origin: InvocationOrigin) -> Self {
    Self {
      origin,
      trace_id: Uuid::new_v4(),
      started_at: Utc::now(),
    }
  }

  pub fn rpc(actor: impl Into<String>) -> Self {
    Self::new(InvocationOrigin::Rpc {
      actor: actor.into(),
    })
  }

  pub fn peer(party: Party) -> Self {
    Self::new(InvocationOrigin::Peer { party })
  }

  pub fn service(name: impl Into<String>) -> Self {
    Self::new(InvocationOrigin::Service { name: name.into() })
  }
}

/// Lifecycle state of a workflow instance.
///
/// `Created -> Running <-> Suspended -> Completed`, or `-> Failed` from any
/// non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
  Created,
  Running,
  Suspended,
  Completed,
  Failed,
}

impl WorkflowState {
  pub fn is_terminal(self) -> bool {
    matches!(self, WorkflowState::Completed | WorkflowState::Failed)
  }
}
