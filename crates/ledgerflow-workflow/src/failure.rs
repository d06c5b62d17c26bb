use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::Party;

/// Why a workflow instance (or one of its sub-workflows) failed.
///
/// This is the value a result promise resolves to on failure. It is
/// serializable because a counterparty error waiting in a session inbox is
/// part of the checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkflowFailure {
  /// Business logic rejected the work.
  #[error("{message}")]
  Logic { message: String },

  /// The counterparty's side of a session failed.
  #[error("counterparty {party} failed: {message}")]
  Counterparty { party: Party, message: String },

  /// The counterparty refused to start a responder.
  #[error("session rejected by {party}: {message}")]
  SessionRejected { party: Party, message: String },

  /// The workflow used a session it never opened.
  #[error("unknown session {session}")]
  UnknownSession { session: String },

  /// A persisted frame could not be restored or an operation could not be
  /// carried out by the node.
  #[error("infrastructure failure: {message}")]
  Infrastructure { message: String },

  /// The instance was killed by an operator.
  #[error("workflow killed")]
  Killed,
}

impl WorkflowFailure {
  pub fn logic(message: impl Into<String>) -> Self {
    WorkflowFailure::Logic {
      message: message.into(),
    }
  }

  pub fn infrastructure(message: impl Into<String>) -> Self {
    WorkflowFailure::Infrastructure {
      message: message.into(),
    }
  }
}

impl From<serde_json::Error> for WorkflowFailure {
  fn from(error: serde_json::Error) -> Self {
    WorkflowFailure::logic(format!("malformed payload: {}", error))
  }
}
