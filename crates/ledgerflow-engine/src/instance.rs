//! In-memory state of workflow instances.
//!
//! A [`Slot`] exists for every live instance. Its [`Resident`] part (the
//! restored workflow objects and the working copy of the checkpoint) may be
//! dropped while the instance is suspended and rebuilt from the store later.

use std::collections::BTreeMap;

use chrono::Utc;
use ledgerflow_checkpoint::{Checkpoint, Frame, SessionRecord};
use ledgerflow_registry::{RegistryError, WorkflowCatalog};
use ledgerflow_workflow::{
  InvocationContext, LedgerWrite, OutboundMessage, Party, SessionId, SessionMessage,
  SessionPayload, StepEffects, WorkflowFailure, WorkflowId, WorkflowLogic, WorkflowState,
};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

pub(crate) type ResultSender = oneshot::Sender<Result<serde_json::Value, WorkflowFailure>>;

pub(crate) struct Slot {
  /// Name of the outermost workflow type.
  pub workflow_type: String,
  pub state: WorkflowState,
  pub resident: Option<Resident>,
  /// Taken when the result is resolved. Recovered instances have none.
  pub result: Option<ResultSender>,
  pub progress: Option<mpsc::UnboundedSender<String>>,
}

impl Slot {
  pub fn parked(workflow_type: String) -> Self {
    Self {
      workflow_type,
      state: WorkflowState::Suspended,
      resident: None,
      result: None,
      progress: None,
    }
  }
}

/// Effects accumulated since the last commit.
#[derive(Debug, Default)]
pub(crate) struct Pending {
  pub outbound: Vec<OutboundMessage>,
  pub ledger_writes: Vec<LedgerWrite>,
}

impl Pending {
  pub fn take(&mut self) -> Pending {
    std::mem::take(self)
  }
}

pub(crate) struct Resident {
  pub checkpoint: Checkpoint,
  /// Live workflow objects, outermost first. Mirrors `checkpoint.stack` as of
  /// the last commit.
  pub stack: Vec<Box<dyn WorkflowLogic>>,
}

impl Resident {
  pub fn new(
    id: WorkflowId,
    invocation: InvocationContext,
    our_identity: Party,
    logic: Box<dyn WorkflowLogic>,
  ) -> Self {
    Self {
      checkpoint: Checkpoint::new(id, invocation, our_identity),
      stack: vec![logic],
    }
  }

  /// Rebuild the workflow objects of a stored checkpoint.
  pub fn restore(checkpoint: Checkpoint, catalog: &WorkflowCatalog) -> Result<Self, RegistryError> {
    let stack = checkpoint
      .stack
      .iter()
      .map(|frame| catalog.restore(&frame.workflow_type.name, frame.state.clone()))
      .collect::<Result<Vec<_>, _>>()?;
    Ok(Self { checkpoint, stack })
  }

  pub fn id(&self) -> WorkflowId {
    self.checkpoint.id
  }

  pub fn session_parties(&self) -> BTreeMap<SessionId, Party> {
    self
      .checkpoint
      .sessions
      .iter()
      .map(|session| (session.id, session.counterparty.clone()))
      .collect()
  }

  pub fn session_mut(&mut self, id: SessionId) -> Option<&mut SessionRecord> {
    self
      .checkpoint
      .sessions
      .iter_mut()
      .find(|session| session.id == id)
  }

  /// Fold the effects of one step into the instance. Returns the sessions it
  /// opened. Nothing is applied if any send targets an unknown session.
  pub fn apply_effects(
    &mut self,
    effects: StepEffects,
    pending: &mut Pending,
  ) -> Result<Vec<SessionId>, WorkflowFailure> {
    let id = self.id();
    if let Some((session, _)) = effects.sends.iter().find(|(session, _)| {
      !self.checkpoint.sessions.iter().any(|known| known.id == *session)
        && !effects.new_sessions.iter().any(|(opened, _)| opened == session)
    }) {
      return Err(WorkflowFailure::UnknownSession {
        session: session.to_string(),
      });
    }

    let mut opened = Vec::with_capacity(effects.new_sessions.len());

    if !effects.new_sessions.is_empty() {
      let initiator = self
        .stack
        .last()
        .map(|top| top.workflow_type())
        .ok_or_else(|| WorkflowFailure::infrastructure("instance has no frames"))?;
      for (session, counterparty) in effects.new_sessions {
        self.checkpoint.sessions.push(SessionRecord::initiating(
          session,
          counterparty,
          initiator.name.clone(),
          initiator.version,
        ));
        opened.push(session);
      }
    }

    for (session, data) in effects.sends {
      let record = self
        .session_mut(session)
        .ok_or_else(|| WorkflowFailure::UnknownSession {
          session: session.to_string(),
        })?;
      if record.errored {
        debug!(workflow_id = %id, session = %session, "dropping send on ended session");
        continue;
      }
      pending.outbound.push(next_message(id, record, Some(data)));
    }

    pending.ledger_writes.extend(effects.ledger_writes);
    Ok(opened)
  }

  /// Open `session` on the wire with an empty `Init` if nothing was sent yet.
  pub fn ensure_initiated(&mut self, session: SessionId, pending: &mut Pending) {
    let id = self.id();
    if let Some(record) = self.session_mut(session)
      && !record.initiated
    {
      pending.outbound.push(next_message(id, record, None));
    }
  }

  /// Tell every counterparty with an open session that this instance failed.
  pub fn error_open_sessions(&mut self, failure: &WorkflowFailure) -> Vec<OutboundMessage> {
    let id = self.id();
    let message = failure.to_string();
    self
      .checkpoint
      .sessions
      .iter_mut()
      .filter(|session| session.initiated && !session.errored)
      .map(|session| {
        let seq = session.next_send_seq;
        session.next_send_seq += 1;
        session.errored = true;
        OutboundMessage {
          message_id: message_id(id, session.id, seq),
          destination: session.counterparty.clone(),
          message: SessionMessage {
            sender_session: session.id,
            recipient_session: session.peer_session,
            seq,
            payload: SessionPayload::Error {
              message: message.clone(),
            },
          },
        }
      })
      .collect()
  }

  /// Refresh the checkpoint's frames from the live workflow objects.
  pub fn snapshot(&mut self, platform_version: u32) -> Result<&Checkpoint, serde_json::Error> {
    let frames = self
      .stack
      .iter()
      .map(|logic| -> Result<Frame, serde_json::Error> {
        Ok(Frame {
          workflow_type: logic.workflow_type(),
          platform_version,
          state: logic.snapshot()?,
        })
      })
      .collect::<Result<Vec<_>, _>>()?;
    self.checkpoint.stack = frames;
    self.checkpoint.updated_at = Utc::now();
    Ok(&self.checkpoint)
  }
}

pub(crate) fn message_id(workflow: WorkflowId, session: SessionId, seq: u64) -> String {
  format!("{}:{}:{}", workflow, session, seq)
}

/// Build the next outgoing message on `record`. The first message on an
/// initiating session is its `Init`, carrying `data` if there is any.
fn next_message(
  workflow: WorkflowId,
  record: &mut SessionRecord,
  data: Option<serde_json::Value>,
) -> OutboundMessage {
  let seq = record.next_send_seq;
  record.next_send_seq += 1;

  let payload = match (&record.initiating_type, record.initiated) {
    (Some(initiating_type), false) => SessionPayload::Init {
      initiating_type: initiating_type.clone(),
      protocol_version: record.protocol_version,
      data,
    },
    _ => SessionPayload::Data {
      data: data.unwrap_or(serde_json::Value::Null),
    },
  };
  record.initiated = true;

  OutboundMessage {
    message_id: message_id(workflow, record.id, seq),
    destination: record.counterparty.clone(),
    message: SessionMessage {
      sender_session: record.id,
      recipient_session: record.peer_session,
      seq,
      payload,
    },
  }
}
