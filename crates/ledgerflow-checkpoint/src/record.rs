use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use ledgerflow_workflow::{
  Await, InvocationContext, Party, SessionId, WorkflowFailure, WorkflowId, WorkflowType,
};
use serde::{Deserialize, Serialize};

/// Layout version written into every checkpoint.
pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

/// Whether a stored checkpoint may be resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
  Runnable,
  /// Kept after the instance failed, until an operator prunes it.
  Failed,
}

impl CheckpointStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      CheckpointStatus::Runnable => "runnable",
      CheckpointStatus::Failed => "failed",
    }
  }
}

impl fmt::Display for CheckpointStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for CheckpointStatus {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "runnable" => Ok(CheckpointStatus::Runnable),
      "failed" => Ok(CheckpointStatus::Failed),
      other => Err(format!("unknown checkpoint status '{}'", other)),
    }
  }
}

/// One entry of an instance's call stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
  pub workflow_type: WorkflowType,
  /// Platform version of the node that wrote the frame.
  pub platform_version: u32,
  /// Whatever the workflow's `snapshot` returned.
  pub state: serde_json::Value,
}

/// Persisted state of one session end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
  pub id: SessionId,
  pub counterparty: Party,
  /// The counterparty's session id, once learned.
  pub peer_session: Option<SessionId>,
  /// Initiating type announced in our `Init`. `None` for responder sessions.
  pub initiating_type: Option<String>,
  pub protocol_version: u32,
  /// Whether the session has been opened on the wire.
  pub initiated: bool,
  pub next_send_seq: u64,
  pub next_receive_seq: u64,
  /// Payloads, or counterparty failures, not yet handed to the workflow.
  pub inbox: VecDeque<Result<serde_json::Value, WorkflowFailure>>,
  /// The counterparty ended the session with an error or a reject.
  pub errored: bool,
}

impl SessionRecord {
  /// A session this instance opened towards `counterparty`.
  pub fn initiating(
    id: SessionId,
    counterparty: Party,
    initiating_type: impl Into<String>,
    protocol_version: u32,
  ) -> Self {
    Self {
      id,
      counterparty,
      peer_session: None,
      initiating_type: Some(initiating_type.into()),
      protocol_version,
      initiated: false,
      next_send_seq: 0,
      next_receive_seq: 0,
      inbox: VecDeque::new(),
      errored: false,
    }
  }

  /// Our end of a session the counterparty opened. Their `Init` was seq 0.
  pub fn responding(
    id: SessionId,
    counterparty: Party,
    peer_session: SessionId,
    protocol_version: u32,
  ) -> Self {
    Self {
      id,
      counterparty,
      peer_session: Some(peer_session),
      initiating_type: None,
      protocol_version,
      initiated: true,
      next_send_seq: 0,
      next_receive_seq: 1,
      inbox: VecDeque::new(),
      errored: false,
    }
  }
}

/// Durable continuation of a workflow instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
  pub format_version: u32,
  pub id: WorkflowId,
  pub status: CheckpointStatus,
  pub invocation: InvocationContext,
  pub our_identity: Party,
  /// Call stack, outermost workflow first.
  pub stack: Vec<Frame>,
  pub sessions: Vec<SessionRecord>,
  pub awaiting: Await,
  /// Why the instance failed, for retained failed checkpoints.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub failure: Option<WorkflowFailure>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
  pub fn new(id: WorkflowId, invocation: InvocationContext, our_identity: Party) -> Self {
    let now = Utc::now();
    Self {
      format_version: CHECKPOINT_FORMAT_VERSION,
      id,
      status: CheckpointStatus::Runnable,
      invocation,
      our_identity,
      stack: Vec::new(),
      sessions: Vec::new(),
      awaiting: Await::Start,
      failure: None,
      created_at: now,
      updated_at: now,
    }
  }

  /// The outermost workflow type, which names the instance.
  pub fn root_type(&self) -> Option<&WorkflowType> {
    self.stack.first().map(|frame| &frame.workflow_type)
  }

  pub fn session(&self, id: SessionId) -> Option<&SessionRecord> {
    self.sessions.iter().find(|session| session.id == id)
  }
}
