use ledgerflow_workflow::{
  InvocationContext, Party, SessionMessage, WorkflowFailure, WorkflowId, WorkflowLogic,
};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::ManagerError;
use crate::events::{Change, InstanceSummary};
use crate::manager::Event;

/// Pending result of one workflow instance. Resolves exactly once.
pub struct WorkflowResult {
  id: WorkflowId,
  receiver: oneshot::Receiver<Result<serde_json::Value, WorkflowFailure>>,
}

impl WorkflowResult {
  /// Wait for the instance to complete or fail.
  pub async fn wait(self) -> Result<serde_json::Value, ManagerError> {
    match self.receiver.await {
      Ok(result) => Ok(result?),
      Err(_) => Err(ManagerError::Shutdown { id: self.id }),
    }
  }
}

/// What a caller gets back from starting a workflow.
pub struct WorkflowHandle {
  pub id: WorkflowId,
  pub result: WorkflowResult,
  /// Progress labels reported by the workflow, in order.
  pub progress: mpsc::UnboundedReceiver<String>,
}

/// Cloneable handle to a running state machine manager.
#[derive(Clone)]
pub struct ManagerHandle {
  events: mpsc::UnboundedSender<Event>,
  cancel: CancellationToken,
  our_identity: Party,
  shutdown_acceptable_remaining: usize,
}

impl ManagerHandle {
  pub(crate) fn new(
    events: mpsc::UnboundedSender<Event>,
    cancel: CancellationToken,
    our_identity: Party,
    shutdown_acceptable_remaining: usize,
  ) -> Self {
    Self {
      events,
      cancel,
      our_identity,
      shutdown_acceptable_remaining,
    }
  }

  pub fn our_identity(&self) -> &Party {
    &self.our_identity
  }

  /// Start a new instance. Returns as soon as it is scheduled.
  pub fn start_workflow(
    &self,
    logic: Box<dyn WorkflowLogic>,
    invocation: InvocationContext,
  ) -> Result<WorkflowHandle, ManagerError> {
    let id = WorkflowId::new_random();
    let (result_tx, result_rx) = oneshot::channel();
    let (progress_tx, progress_rx) = mpsc::unbounded_channel();

    self.send(Event::Start {
      id,
      logic,
      invocation,
      result: result_tx,
      progress: progress_tx,
    })?;

    Ok(WorkflowHandle {
      id,
      result: WorkflowResult {
        id,
        receiver: result_rx,
      },
      progress: progress_rx,
    })
  }

  /// Hand a message received from `sender` to the manager.
  pub fn deliver(&self, sender: Party, message: SessionMessage) -> Result<(), ManagerError> {
    self.send(Event::Deliver { sender, message })
  }

  /// The current live instances and a feed of subsequent changes.
  pub async fn track(
    &self,
  ) -> Result<(Vec<InstanceSummary>, broadcast::Receiver<Change>), ManagerError> {
    let (reply, response) = oneshot::channel();
    self.send(Event::Track { reply })?;
    response.await.map_err(|_| ManagerError::Stopped)
  }

  /// Remove an instance and its checkpoint, failing its result. Returns
  /// whether the instance existed.
  pub async fn kill(&self, id: WorkflowId) -> Result<bool, ManagerError> {
    let (reply, response) = oneshot::channel();
    self.send(Event::Kill { id, reply })?;
    response.await.map_err(|_| ManagerError::Stopped)
  }

  /// Run queued instances until at most `acceptable_remaining` are left,
  /// then stop. Returns how many runnable instances were left unfinished.
  pub async fn stop(&self, acceptable_remaining: usize) -> Result<usize, ManagerError> {
    let (reply, response) = oneshot::channel();
    self.send(Event::Stop {
      acceptable_remaining,
      reply,
    })?;
    response.await.map_err(|_| ManagerError::Stopped)
  }

  /// Stop with the configured acceptable remaining count.
  pub async fn shutdown(&self) -> Result<usize, ManagerError> {
    self.stop(self.shutdown_acceptable_remaining).await
  }

  /// Stop immediately without draining.
  pub fn abort(&self) {
    self.cancel.cancel();
  }

  fn send(&self, event: Event) -> Result<(), ManagerError> {
    self.events.send(event).map_err(|_| ManagerError::Stopped)
  }
}
