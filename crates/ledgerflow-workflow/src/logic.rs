//! Resumable workflow logic.
//!
//! A workflow is an explicit state machine rather than a suspended call
//! stack. The engine drives it by calling [`WorkflowLogic::step`] with the
//! input that woke it up; the workflow mutates its own state, records effects
//! on the [`StepContext`] and returns the next [`Step`]. Everything needed to
//! resume is whatever [`WorkflowLogic::snapshot`] returns, so a workflow must
//! keep its progress (which phase it is in, values it still needs) in fields
//! that serialize.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::context::InvocationContext;
use crate::failure::WorkflowFailure;
use crate::ids::{Party, SessionId, WorkflowId};
use crate::message::LedgerWrite;
use crate::types::WorkflowType;

/// A long-running operation executed off the engine's execution context.
///
/// It must be idempotent: after a restart the workflow is resumed with
/// [`Resume::Restarted`] and is expected to issue the same operation again.
pub type ExternalOperation = BoxFuture<'static, Result<serde_json::Value, WorkflowFailure>>;

/// A workflow implementation the engine can run, suspend and restore.
pub trait WorkflowLogic: Send {
  /// Identity of this implementation. Recorded in every checkpoint frame.
  fn workflow_type(&self) -> WorkflowType;

  /// Advance the workflow with the input that resumed it.
  fn step(&mut self, ctx: &mut StepContext<'_>, resume: Resume) -> Result<Step, WorkflowFailure>;

  /// Serialize the state needed to rebuild this workflow after a restart.
  fn snapshot(&self) -> Result<serde_json::Value, serde_json::Error>;
}

/// What the workflow wants to happen next.
pub enum Step {
  /// Suspend until a message arrives on the session.
  Receive(SessionId),
  /// Run a sub-workflow to completion, then resume with its result.
  Call(Box<dyn WorkflowLogic>),
  /// Suspend until the deadline passes.
  SleepUntil(DateTime<Utc>),
  /// Checkpoint the effects recorded so far, then continue.
  Yield,
  /// Suspend until the operation completes.
  External(ExternalOperation),
  /// Finish this frame with a result.
  Done(serde_json::Value),
}

impl fmt::Debug for Step {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Step::Receive(session) => f.debug_tuple("Receive").field(session).finish(),
      Step::Call(child) => f.debug_tuple("Call").field(&child.workflow_type().name).finish(),
      Step::SleepUntil(deadline) => f.debug_tuple("SleepUntil").field(deadline).finish(),
      Step::Yield => f.write_str("Yield"),
      Step::External(_) => f.write_str("External"),
      Step::Done(value) => f.debug_tuple("Done").field(value).finish(),
    }
  }
}

/// The input a workflow is resumed with.
#[derive(Debug, Clone, PartialEq)]
pub enum Resume {
  /// First step of a new frame.
  Start,
  /// A message, or the counterparty's failure, on a session.
  Received {
    session: SessionId,
    result: Result<serde_json::Value, WorkflowFailure>,
  },
  /// The sub-workflow started with [`Step::Call`] finished.
  SubWorkflow(Result<serde_json::Value, WorkflowFailure>),
  Timer,
  Yielded,
  /// The operation started with [`Step::External`] finished.
  External(Result<serde_json::Value, WorkflowFailure>),
  /// The node restarted while an external operation was in flight.
  Restarted,
}

/// The pending await recorded in a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Await {
  /// The top frame has not run its first step.
  Start,
  Receive { session: SessionId },
  Timer { deadline: DateTime<Utc> },
  Yielded,
  External,
}

/// Effects recorded during one step, applied by the engine afterwards.
#[derive(Debug, Default)]
pub struct StepEffects {
  pub new_sessions: Vec<(SessionId, Party)>,
  pub sends: Vec<(SessionId, serde_json::Value)>,
  pub ledger_writes: Vec<LedgerWrite>,
  pub progress: Vec<String>,
}

/// The workflow's view of the engine during a single step.
pub struct StepContext<'a> {
  id: WorkflowId,
  our_identity: &'a Party,
  invocation: &'a InvocationContext,
  sessions: BTreeMap<SessionId, Party>,
  now: DateTime<Utc>,
  effects: StepEffects,
}

impl<'a> StepContext<'a> {
  pub fn new(
    id: WorkflowId,
    our_identity: &'a Party,
    invocation: &'a InvocationContext,
    sessions: BTreeMap<SessionId, Party>,
    now: DateTime<Utc>,
  ) -> Self {
    Self {
      id,
      our_identity,
      invocation,
      sessions,
      now,
      effects: StepEffects::default(),
    }
  }

  pub fn workflow_id(&self) -> WorkflowId {
    self.id
  }

  pub fn our_identity(&self) -> &Party {
    self.our_identity
  }

  pub fn invocation(&self) -> &InvocationContext {
    self.invocation
  }

  pub fn now(&self) -> DateTime<Utc> {
    self.now
  }

  /// Open a session with `counterparty`. Nothing is sent until the first
  /// send or receive on it.
  pub fn initiate_session(&mut self, counterparty: Party) -> SessionId {
    let session = SessionId::new_random();
    self.sessions.insert(session, counterparty.clone());
    self.effects.new_sessions.push((session, counterparty));
    session
  }

  /// The counterparty of a session this instance holds.
  pub fn counterparty(&self, session: SessionId) -> Option<&Party> {
    self.sessions.get(&session)
  }

  /// Queue a message. It is committed together with the next checkpoint.
  pub fn send(&mut self, session: SessionId, payload: serde_json::Value) {
    self.effects.sends.push((session, payload));
  }

  /// Serialize and queue a message.
  pub fn send_json<T: Serialize>(
    &mut self,
    session: SessionId,
    payload: &T,
  ) -> Result<(), WorkflowFailure> {
    let value = serde_json::to_value(payload)?;
    self.send(session, value);
    Ok(())
  }

  /// Record a ledger-visible write, committed atomically with the next checkpoint.
  pub fn record_ledger_write(&mut self, kind: impl Into<String>, payload: serde_json::Value) {
    self.effects.ledger_writes.push(LedgerWrite {
      workflow_id: self.id,
      kind: kind.into(),
      payload,
    });
  }

  /// Report progress to whoever holds the instance's handle.
  pub fn progress(&mut self, label: impl Into<String>) {
    self.effects.progress.push(label.into());
  }

  pub fn into_effects(self) -> StepEffects {
    self.effects
  }
}
