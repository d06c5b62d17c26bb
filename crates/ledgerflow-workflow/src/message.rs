use serde::{Deserialize, Serialize};

use crate::ids::{Party, SessionId, WorkflowId};

/// Message exchanged between two ends of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMessage {
  pub sender_session: SessionId,
  /// The recipient's session id, once the sender has learned it.
  pub recipient_session: Option<SessionId>,
  /// Per-session sequence number assigned by the sender, starting at 0.
  pub seq: u64,
  pub payload: SessionPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionPayload {
  /// First message of a session. Asks the recipient to start the responder
  /// registered for `initiating_type`.
  Init {
    initiating_type: String,
    protocol_version: u32,
    data: Option<serde_json::Value>,
  },
  Data {
    data: serde_json::Value,
  },
  /// The sender's workflow failed while the session was open.
  Error {
    message: String,
  },
  /// The recipient of an `Init` could not start a responder.
  Reject {
    message: String,
  },
}

/// A message committed to the outbox in the same transaction as the
/// checkpoint that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
  /// Stable id (`{workflow}:{session}:{seq}`) so re-dispatch after a restart
  /// can be deduplicated.
  pub message_id: String,
  pub destination: Party,
  pub message: SessionMessage,
}

/// A ledger-visible record produced by a workflow step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerWrite {
  pub workflow_id: WorkflowId,
  pub kind: String,
  pub payload: serde_json::Value,
}
