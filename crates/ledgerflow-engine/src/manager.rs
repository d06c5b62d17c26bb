//! The workflow state machine manager.
//!
//! All workflow steps run on one actor task that owns every live instance.
//! Callers, the transport, timers and external operations talk to it through
//! its mailbox, so no instance is ever touched concurrently.

use std::collections::{HashMap, VecDeque};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ledgerflow_checkpoint::{
  CheckpointCompatibilityVerifier, CheckpointStatus, SessionRecord, decode, encode,
};
use ledgerflow_config::{NodeConfig, StateMachineConfig};
use ledgerflow_registry::{ResponderContext, WorkflowCatalog, WorkflowRegistry};
use ledgerflow_store::{CheckpointStore, CheckpointTransaction, CheckpointWrite, StoreError};
use ledgerflow_workflow::{
  Await, ExternalOperation, InvocationContext, OutboundMessage, Party, Resume, SessionId,
  SessionMessage, SessionPayload, Step, StepContext, WorkflowFailure, WorkflowId, WorkflowLogic,
  WorkflowState,
};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dispatcher::Dispatcher;
use crate::error::StartupError;
use crate::events::{Change, InstanceSummary, Outcome};
use crate::handle::ManagerHandle;
use crate::instance::{Pending, Resident, ResultSender, Slot};
use crate::transport::MessageTransport;

const CHANGE_FEED_CAPACITY: usize = 1024;

pub(crate) enum Event {
  Start {
    id: WorkflowId,
    logic: Box<dyn WorkflowLogic>,
    invocation: InvocationContext,
    result: ResultSender,
    progress: mpsc::UnboundedSender<String>,
  },
  Deliver {
    sender: Party,
    message: SessionMessage,
  },
  TimerFired {
    id: WorkflowId,
    deadline: DateTime<Utc>,
  },
  ExternalDone {
    id: WorkflowId,
    result: Result<serde_json::Value, WorkflowFailure>,
  },
  Track {
    reply: oneshot::Sender<(Vec<InstanceSummary>, broadcast::Receiver<Change>)>,
  },
  Kill {
    id: WorkflowId,
    reply: oneshot::Sender<bool>,
  },
  Stop {
    acceptable_remaining: usize,
    reply: oneshot::Sender<usize>,
  },
}

/// Why a queued instance should run.
#[derive(Debug)]
enum Wakeup {
  Start,
  Inbox(SessionId),
  Timer(DateTime<Utc>),
  Yielded,
  External(Result<serde_json::Value, WorkflowFailure>),
  Restarted,
}

/// Builds and starts the manager actor.
///
/// # Usage
///
/// ```ignore
/// let manager = WorkflowStateMachineManager::new(
///   Party::new("O=Alice"), &config, registry, catalog, store, transport,
/// );
/// let handle = manager.start().await?;
/// let started = handle.start_workflow(Box::new(MyWorkflow::new()), InvocationContext::rpc("ops"))?;
/// let result = started.result.wait().await?;
/// ```
pub struct WorkflowStateMachineManager {
  our_identity: Party,
  platform_version: u32,
  config: StateMachineConfig,
  registry: Arc<WorkflowRegistry>,
  catalog: Arc<WorkflowCatalog>,
  store: Arc<dyn CheckpointStore>,
  transport: Arc<dyn MessageTransport>,
}

impl WorkflowStateMachineManager {
  pub fn new(
    our_identity: Party,
    config: &NodeConfig,
    registry: WorkflowRegistry,
    catalog: WorkflowCatalog,
    store: Arc<dyn CheckpointStore>,
    transport: Arc<dyn MessageTransport>,
  ) -> Self {
    Self {
      our_identity,
      platform_version: config.platform_version,
      config: config.state_machine.clone(),
      registry: Arc::new(registry),
      catalog: Arc::new(catalog),
      store,
      transport,
    }
  }

  /// Recover persisted instances and start the actor.
  ///
  /// Registrations are validated and every runnable checkpoint is verified
  /// against the installed code first; any failure aborts the start with
  /// nothing resumed. Recovered instances have their awaits re-armed and the
  /// outbox is re-sent before the returned handle accepts traffic.
  pub async fn start(self) -> Result<ManagerHandle, StartupError> {
    self.registry.validate_registrations()?;

    let stored = self.store.all(CheckpointStatus::Runnable).await?;
    let stored: Vec<(WorkflowId, Vec<u8>)> = stored
      .into_iter()
      .map(|checkpoint| (checkpoint.id, checkpoint.bytes))
      .collect();

    let verifier =
      CheckpointCompatibilityVerifier::new(&self.catalog.installed_modules(), self.platform_version);
    let checkpoints = verifier.verify_all(&stored)?;

    for checkpoint in &checkpoints {
      for frame in &checkpoint.stack {
        if !self.catalog.contains(&frame.workflow_type.name) {
          return Err(StartupError::UnrestorableWorkflow {
            id: checkpoint.id,
            workflow_type: frame.workflow_type.name.clone(),
          });
        }
      }
    }

    let outbox = self.store.pending_outbound().await?;

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
    let dispatcher = Dispatcher::spawn(self.store.clone(), self.transport.clone());

    let mut machine = StateMachine {
      our_identity: self.our_identity.clone(),
      platform_version: self.platform_version,
      config: self.config.clone(),
      registry: self.registry,
      catalog: self.catalog,
      store: self.store,
      dispatcher,
      events: events_tx.downgrade(),
      instances: HashMap::new(),
      resident: VecDeque::new(),
      sessions: HashMap::new(),
      peers: HashMap::new(),
      run_queue: VecDeque::new(),
      changes,
    };

    let recovered = checkpoints.len();
    for checkpoint in checkpoints {
      machine.recover(checkpoint);
    }
    if !outbox.is_empty() {
      info!(messages = outbox.len(), "re-sending undelivered outbox");
    }
    machine.dispatcher.dispatch(outbox);

    info!(
      party = %self.our_identity,
      platform_version = self.platform_version,
      recovered,
      "state machine manager started"
    );
    tokio::spawn(machine.run(events_rx, cancel.clone()));

    Ok(ManagerHandle::new(
      events_tx,
      cancel,
      self.our_identity,
      self.config.shutdown_acceptable_remaining,
    ))
  }
}

struct StateMachine {
  our_identity: Party,
  platform_version: u32,
  config: StateMachineConfig,
  registry: Arc<WorkflowRegistry>,
  catalog: Arc<WorkflowCatalog>,
  store: Arc<dyn CheckpointStore>,
  dispatcher: Dispatcher,
  /// For timers and external operations to post back.
  events: mpsc::WeakUnboundedSender<Event>,
  instances: HashMap<WorkflowId, Slot>,
  /// Suspended resident instances, least recently suspended first.
  resident: VecDeque<WorkflowId>,
  /// Our session ids to the instance holding them.
  sessions: HashMap<SessionId, WorkflowId>,
  /// `(counterparty, their session)` to our session.
  peers: HashMap<(Party, SessionId), SessionId>,
  run_queue: VecDeque<(WorkflowId, Wakeup)>,
  changes: broadcast::Sender<Change>,
}

impl StateMachine {
  async fn run(mut self, mut mailbox: mpsc::UnboundedReceiver<Event>, cancel: CancellationToken) {
    loop {
      if self.run_queue.is_empty() {
        tokio::select! {
          _ = cancel.cancelled() => {
            info!(party = %self.our_identity, "state machine manager aborted");
            break;
          }
          event = mailbox.recv() => match event {
            Some(event) => {
              if self.handle(event).await.is_break() {
                break;
              }
            }
            None => {
              info!(party = %self.our_identity, "state machine manager mailbox closed");
              break;
            }
          }
        }
        continue;
      }

      if cancel.is_cancelled() {
        info!(party = %self.our_identity, "state machine manager aborted");
        break;
      }

      // Interleave mailbox events with queued work.
      if let Ok(event) = mailbox.try_recv()
        && self.handle(event).await.is_break()
      {
        break;
      }
      if let Some((id, wakeup)) = self.run_queue.pop_front() {
        self.run_instance(id, wakeup).await;
      }
      tokio::task::yield_now().await;
    }
  }

  async fn handle(&mut self, event: Event) -> ControlFlow<()> {
    match event {
      Event::Start {
        id,
        logic,
        invocation,
        result,
        progress,
      } => {
        let workflow_type = logic.workflow_type().name;
        let resident = Resident::new(id, invocation, self.our_identity.clone(), logic);
        self.add_instance(id, workflow_type, resident, Some(result), Some(progress));
        if self.checkpoint(id, Pending::default()).await {
          self.wake(id, Wakeup::Start);
        }
      }
      Event::Deliver { sender, message } => self.deliver(sender, message).await,
      Event::TimerFired { id, deadline } => self.wake(id, Wakeup::Timer(deadline)),
      Event::ExternalDone { id, result } => self.wake(id, Wakeup::External(result)),
      Event::Track { reply } => {
        let mut summaries: Vec<InstanceSummary> = self
          .instances
          .iter()
          .map(|(id, slot)| InstanceSummary {
            id: *id,
            workflow_type: slot.workflow_type.clone(),
            state: slot.state,
            resident: slot.resident.is_some(),
          })
          .collect();
        summaries.sort_by_key(|summary| summary.id);
        let _ = reply.send((summaries, self.changes.subscribe()));
      }
      Event::Kill { id, reply } => {
        let killed = self.kill(id).await;
        let _ = reply.send(killed);
      }
      Event::Stop {
        acceptable_remaining,
        reply,
      } => {
        let discarded = self.drain(acceptable_remaining).await;
        let _ = reply.send(discarded);
        return ControlFlow::Break(());
      }
    }
    ControlFlow::Continue(())
  }

  fn add_instance(
    &mut self,
    id: WorkflowId,
    workflow_type: String,
    resident: Resident,
    result: Option<ResultSender>,
    progress: Option<mpsc::UnboundedSender<String>>,
  ) {
    for session in &resident.checkpoint.sessions {
      self.index_session(id, session);
    }
    info!(workflow_id = %id, workflow_type = %workflow_type, "workflow instance created");
    let _ = self.changes.send(Change::Added {
      id,
      workflow_type: workflow_type.clone(),
    });
    self.instances.insert(
      id,
      Slot {
        workflow_type,
        state: WorkflowState::Created,
        resident: Some(resident),
        result,
        progress,
      },
    );
  }

  fn index_session(&mut self, id: WorkflowId, session: &SessionRecord) {
    self.sessions.insert(session.id, id);
    if let Some(peer) = session.peer_session {
      self
        .peers
        .insert((session.counterparty.clone(), peer), session.id);
    }
  }

  /// Register a verified checkpoint as a parked instance and re-arm its await.
  fn recover(&mut self, checkpoint: ledgerflow_checkpoint::Checkpoint) {
    let id = checkpoint.id;
    let workflow_type = checkpoint
      .root_type()
      .map(|workflow_type| workflow_type.name.clone())
      .unwrap_or_default();

    for session in &checkpoint.sessions {
      self.index_session(id, session);
    }

    let wakeup = match &checkpoint.awaiting {
      Await::Start => Some(Wakeup::Start),
      Await::Receive { session } => checkpoint
        .session(*session)
        .filter(|record| !record.inbox.is_empty() || record.errored)
        .map(|_| Wakeup::Inbox(*session)),
      Await::Timer { deadline } => {
        self.schedule_timer(id, *deadline);
        None
      }
      Await::Yielded => Some(Wakeup::Yielded),
      Await::External => Some(Wakeup::Restarted),
    };

    debug!(workflow_id = %id, workflow_type = %workflow_type, awaiting = ?checkpoint.awaiting, "recovered workflow instance");
    self.instances.insert(id, Slot::parked(workflow_type));
    if let Some(wakeup) = wakeup {
      self.wake(id, wakeup);
    }
  }

  fn wake(&mut self, id: WorkflowId, wakeup: Wakeup) {
    if self.instances.contains_key(&id) {
      self.run_queue.push_back((id, wakeup));
    } else {
      debug!(workflow_id = %id, ?wakeup, "dropping wakeup for finished instance");
    }
  }

  fn resident_mut(&mut self, id: WorkflowId) -> Option<&mut Resident> {
    self
      .instances
      .get_mut(&id)
      .and_then(|slot| slot.resident.as_mut())
  }

  /// Turn a wakeup into the input for the top frame, if it still matches
  /// what the instance is waiting for.
  fn resume_for(&mut self, id: WorkflowId, wakeup: Wakeup) -> Option<Resume> {
    let resident = self.resident_mut(id)?;
    let awaiting = resident.checkpoint.awaiting.clone();
    match (wakeup, &awaiting) {
      (Wakeup::Start, Await::Start) => Some(Resume::Start),
      (Wakeup::Inbox(session), Await::Receive { session: awaited }) if session == *awaited => {
        resident
          .session_mut(session)
          .and_then(take_received)
          .map(|result| Resume::Received { session, result })
      }
      (Wakeup::Timer(fired), Await::Timer { deadline }) if fired == *deadline => {
        Some(Resume::Timer)
      }
      (Wakeup::Yielded, Await::Yielded) => Some(Resume::Yielded),
      (Wakeup::External(result), Await::External) => Some(Resume::External(result)),
      (Wakeup::Restarted, Await::External) => Some(Resume::Restarted),
      (wakeup, awaiting) => {
        debug!(workflow_id = %id, ?wakeup, ?awaiting, "ignoring stale wakeup");
        None
      }
    }
  }

  async fn run_instance(&mut self, id: WorkflowId, wakeup: Wakeup) {
    if !self.ensure_resident(id).await {
      return;
    }
    let Some(mut resume) = self.resume_for(id, wakeup) else {
      return;
    };

    self.resident.retain(|resident| *resident != id);
    if let Some(slot) = self.instances.get_mut(&id) {
      slot.state = WorkflowState::Running;
    }
    debug!(workflow_id = %id, resume = ?resume, "resuming workflow instance");

    let mut pending = Pending::default();

    loop {
      let Some(slot) = self.instances.get_mut(&id) else {
        return;
      };
      let Some(resident) = slot.resident.as_mut() else {
        return;
      };

      let parties = resident.session_parties();
      let Resident { checkpoint, stack } = &mut *resident;
      let Some(top) = stack.last_mut() else {
        self
          .finish(
            id,
            Err(WorkflowFailure::infrastructure("instance has no frames")),
            pending,
          )
          .await;
        return;
      };
      let mut ctx = StepContext::new(id, &self.our_identity, &checkpoint.invocation, parties, Utc::now());
      let outcome = top.step(&mut ctx, resume);
      let mut effects = ctx.into_effects();

      if let Some(progress) = &slot.progress {
        for label in effects.progress.drain(..) {
          let _ = progress.send(label);
        }
      }

      // A failing step leaves no trace: its sends and ledger writes are dropped.
      let (outcome, opened) = match outcome {
        Ok(step) => match resident.apply_effects(effects, &mut pending) {
          Ok(opened) => (Ok(step), opened),
          Err(failure) => (Err(failure), Vec::new()),
        },
        Err(failure) => {
          debug!(
            workflow_id = %id,
            sends = effects.sends.len(),
            ledger_writes = effects.ledger_writes.len(),
            "discarding effects of failed step"
          );
          (Err(failure), Vec::new())
        }
      };
      for session in opened {
        self.sessions.insert(session, id);
      }

      let Some(resident) = self.resident_mut(id) else {
        return;
      };

      match outcome {
        Ok(Step::Receive(session)) => {
          let Some(record) = resident.session_mut(session) else {
            resume = Resume::Received {
              session,
              result: Err(WorkflowFailure::UnknownSession {
                session: session.to_string(),
              }),
            };
            continue;
          };
          if let Some(result) = take_received(record) {
            resume = Resume::Received { session, result };
            continue;
          }
          resident.ensure_initiated(session, &mut pending);
          resident.checkpoint.awaiting = Await::Receive { session };
          self.suspend(id, pending).await;
          return;
        }
        Ok(Step::Call(child)) => {
          debug!(workflow_id = %id, sub_workflow = %child.workflow_type(), "calling sub-workflow");
          resident.stack.push(child);
          resident.checkpoint.awaiting = Await::Start;
          if !self.checkpoint(id, pending.take()).await {
            return;
          }
          resume = Resume::Start;
        }
        Ok(Step::SleepUntil(deadline)) => {
          resident.checkpoint.awaiting = Await::Timer { deadline };
          if self.suspend(id, pending).await {
            self.schedule_timer(id, deadline);
          }
          return;
        }
        Ok(Step::Yield) => {
          resident.checkpoint.awaiting = Await::Yielded;
          if self.checkpoint(id, pending).await {
            self.wake(id, Wakeup::Yielded);
          }
          return;
        }
        Ok(Step::External(operation)) => {
          resident.checkpoint.awaiting = Await::External;
          if self.suspend(id, pending).await {
            self.spawn_external(id, operation);
          }
          return;
        }
        Ok(Step::Done(value)) => {
          if resident.stack.len() == 1 {
            self.finish(id, Ok(value), pending).await;
            return;
          }
          resident.stack.pop();
          resume = Resume::SubWorkflow(Ok(value));
        }
        Err(failure) => {
          if resident.stack.len() == 1 {
            self.finish(id, Err(failure), pending).await;
            return;
          }
          debug!(workflow_id = %id, error = %failure, "sub-workflow failed");
          resident.stack.pop();
          resume = Resume::SubWorkflow(Err(failure));
        }
      }
    }
  }

  /// Load a parked instance back into memory.
  async fn ensure_resident(&mut self, id: WorkflowId) -> bool {
    match self.instances.get(&id) {
      None => return false,
      Some(slot) if slot.resident.is_some() => return true,
      Some(_) => {}
    }

    let store = self.store.clone();
    let restored = match store.get(id).await {
      Ok(Some(stored)) => decode(&stored.bytes)
        .map_err(|e| WorkflowFailure::infrastructure(format!("checkpoint unreadable: {}", e)))
        .and_then(|checkpoint| {
          Resident::restore(checkpoint, &self.catalog)
            .map_err(|e| WorkflowFailure::infrastructure(e.to_string()))
        }),
      Ok(None) => Err(WorkflowFailure::infrastructure("checkpoint missing")),
      Err(e) => Err(WorkflowFailure::infrastructure(format!(
        "failed to load checkpoint: {}",
        e
      ))),
    };

    match restored {
      Ok(resident) => {
        debug!(workflow_id = %id, frames = resident.stack.len(), "rehydrated workflow instance");
        if let Some(slot) = self.instances.get_mut(&id) {
          slot.resident = Some(resident);
        }
        true
      }
      Err(failure) => {
        error!(workflow_id = %id, error = %failure, "failed to rehydrate workflow instance");
        self.finish(id, Err(failure), Pending::default()).await;
        false
      }
    }
  }

  /// Commit the instance's checkpoint with the pending effects, then release
  /// its outbound messages. A commit that keeps failing fails the instance.
  async fn checkpoint(&mut self, id: WorkflowId, pending: Pending) -> bool {
    let platform_version = self.platform_version;
    let Some(resident) = self.resident_mut(id) else {
      return false;
    };

    let bytes = match resident.snapshot(platform_version).and_then(encode) {
      Ok(bytes) => bytes,
      Err(e) => {
        let failure = WorkflowFailure::infrastructure(format!("failed to serialize checkpoint: {}", e));
        self.finish(id, Err(failure), Pending::default()).await;
        return false;
      }
    };

    let outbound = pending.outbound;
    let transaction = CheckpointTransaction::new(CheckpointWrite::Upsert {
      id,
      status: CheckpointStatus::Runnable,
      bytes,
    })
    .with_outbound(outbound.clone())
    .with_ledger_writes(pending.ledger_writes);

    match self.commit(transaction).await {
      Ok(()) => {
        self.dispatcher.dispatch(outbound);
        true
      }
      Err(e) => {
        error!(workflow_id = %id, error = %e, "checkpoint commit failed, failing instance");
        let failure = WorkflowFailure::infrastructure(format!("checkpoint commit failed: {}", e));
        self.finish(id, Err(failure), Pending::default()).await;
        false
      }
    }
  }

  /// Checkpoint and mark the instance suspended, evicting older suspended
  /// instances beyond the resident limit.
  async fn suspend(&mut self, id: WorkflowId, pending: Pending) -> bool {
    if !self.checkpoint(id, pending).await {
      return false;
    }
    self.park_when_idle(id);
    true
  }

  fn park_when_idle(&mut self, id: WorkflowId) {
    if let Some(slot) = self.instances.get_mut(&id) {
      slot.state = WorkflowState::Suspended;
    }
    self.resident.retain(|resident| *resident != id);
    self.resident.push_back(id);

    while self.resident.len() > self.config.max_resident_instances {
      let Some(victim) = self.resident.pop_front() else {
        break;
      };
      if self.run_queue.iter().any(|(queued, _)| *queued == victim) {
        continue;
      }
      if let Some(slot) = self.instances.get_mut(&victim)
        && slot.state == WorkflowState::Suspended
        && slot.resident.take().is_some()
      {
        debug!(workflow_id = %victim, "evicted suspended workflow instance");
      }
    }
  }

  async fn commit(&mut self, transaction: CheckpointTransaction) -> Result<(), StoreError> {
    let store = self.store.clone();
    let backoff = Duration::from_millis(self.config.commit_retry_backoff_ms);
    let mut attempt = 0;

    loop {
      match store.commit(transaction.clone()).await {
        Ok(()) => return Ok(()),
        Err(e) if attempt < self.config.commit_retries => {
          attempt += 1;
          warn!(attempt, error = %e, "checkpoint commit failed, retrying");
          tokio::time::sleep(backoff * attempt).await;
        }
        Err(e) => return Err(e),
      }
    }
  }

  /// Resolve an instance and remove it from the live set.
  async fn finish(
    &mut self,
    id: WorkflowId,
    result: Result<serde_json::Value, WorkflowFailure>,
    pending: Pending,
  ) {
    let Some(mut slot) = self.instances.remove(&id) else {
      return;
    };
    self.resident.retain(|resident| *resident != id);
    self.run_queue.retain(|(queued, _)| *queued != id);

    let mut outbound = pending.outbound;
    let mut write = CheckpointWrite::Delete { id };

    match slot.resident.as_mut() {
      Some(resident) => {
        for session in &resident.checkpoint.sessions {
          self.sessions.remove(&session.id);
          if let Some(peer) = session.peer_session {
            self.peers.remove(&(session.counterparty.clone(), peer));
          }
        }

        if let Err(failure) = &result {
          outbound.extend(resident.error_open_sessions(failure));

          let retain = self.config.retain_failed_checkpoints
            && !matches!(failure, WorkflowFailure::Killed);
          if retain {
            resident.checkpoint.status = CheckpointStatus::Failed;
            resident.checkpoint.failure = Some(failure.clone());
            match resident.snapshot(self.platform_version).and_then(encode) {
              Ok(bytes) => {
                write = CheckpointWrite::Upsert {
                  id,
                  status: CheckpointStatus::Failed,
                  bytes,
                };
              }
              Err(e) => warn!(workflow_id = %id, error = %e, "failed to serialize failed checkpoint"),
            }
          }
        }
      }
      None => {
        let sessions = &self.sessions;
        self
          .peers
          .retain(|_, ours| sessions.get(ours) != Some(&id));
        self.sessions.retain(|_, owner| *owner != id);
      }
    }

    let transaction = CheckpointTransaction::new(write)
      .with_outbound(outbound.clone())
      .with_ledger_writes(pending.ledger_writes);

    let result = match self.commit(transaction).await {
      Ok(()) => {
        self.dispatcher.dispatch(outbound);
        result
      }
      Err(e) => {
        error!(workflow_id = %id, error = %e, "failed to commit final checkpoint");
        match result {
          Ok(_) => Err(WorkflowFailure::infrastructure(format!(
            "failed to commit final checkpoint: {}",
            e
          ))),
          Err(failure) => Err(failure),
        }
      }
    };

    let outcome = match &result {
      Ok(value) => {
        info!(workflow_id = %id, workflow_type = %slot.workflow_type, "workflow completed");
        Outcome::Completed {
          result: value.clone(),
        }
      }
      Err(failure) => {
        warn!(workflow_id = %id, workflow_type = %slot.workflow_type, error = %failure, "workflow failed");
        Outcome::Failed {
          failure: failure.clone(),
        }
      }
    };

    let _ = self.changes.send(Change::Removed { id, outcome });
    if let Some(sender) = slot.result.take() {
      let _ = sender.send(result);
    }
  }

  async fn deliver(&mut self, sender: Party, message: SessionMessage) {
    match message.payload {
      SessionPayload::Init {
        initiating_type,
        protocol_version,
        data,
      } => {
        self
          .start_responder(sender, message.sender_session, initiating_type, protocol_version, data)
          .await;
      }
      payload => {
        self
          .receive(sender, message.sender_session, message.recipient_session, message.seq, payload)
          .await;
      }
    }
  }

  async fn start_responder(
    &mut self,
    sender: Party,
    peer_session: SessionId,
    initiating_type: String,
    protocol_version: u32,
    data: Option<serde_json::Value>,
  ) {
    if self.peers.contains_key(&(sender.clone(), peer_session)) {
      debug!(party = %sender, session = %peer_session, "dropping duplicate session init");
      return;
    }

    let Some(resolved) = self.registry.resolve_responder(&initiating_type) else {
      warn!(
        party = %sender,
        initiating_type = %initiating_type,
        "rejecting session for unregistered initiating type"
      );
      let reject = vec![OutboundMessage {
        message_id: format!("reject:{}", peer_session),
        destination: sender,
        message: SessionMessage {
          sender_session: SessionId::new_random(),
          recipient_session: Some(peer_session),
          seq: 0,
          payload: SessionPayload::Reject {
            message: format!(
              "{} has no responder registered for '{}'",
              self.our_identity, initiating_type
            ),
          },
        },
      }];
      let transaction =
        CheckpointTransaction::new(CheckpointWrite::Unchanged).with_outbound(reject.clone());
      match self.commit(transaction).await {
        Ok(()) => self.dispatcher.dispatch(reject),
        Err(e) => error!(session = %peer_session, error = %e, "failed to commit session reject"),
      }
      return;
    };

    let id = WorkflowId::new_random();
    let session = SessionId::new_random();
    let logic = (resolved.factory)(ResponderContext {
      counterparty: sender.clone(),
      session,
      initiator_version: protocol_version,
    });
    let workflow_type = logic.workflow_type().name;

    let mut record =
      SessionRecord::responding(session, sender.clone(), peer_session, resolved.protocol_version);
    if let Some(data) = data {
      record.inbox.push_back(Ok(data));
    }

    let mut resident = Resident::new(
      id,
      InvocationContext::peer(sender.clone()),
      self.our_identity.clone(),
      logic,
    );
    resident.checkpoint.sessions.push(record);

    info!(
      workflow_id = %id,
      party = %sender,
      initiating_type = %initiating_type,
      responder = %workflow_type,
      kind = ?resolved.kind,
      "starting responder"
    );
    self.add_instance(id, workflow_type, resident, None, None);
    if self.checkpoint(id, Pending::default()).await {
      self.wake(id, Wakeup::Start);
    }
  }

  async fn receive(
    &mut self,
    sender: Party,
    sender_session: SessionId,
    recipient_session: Option<SessionId>,
    seq: u64,
    payload: SessionPayload,
  ) {
    let session = recipient_session
      .filter(|session| self.sessions.contains_key(session))
      .or_else(|| self.peers.get(&(sender.clone(), sender_session)).copied());
    let Some((session, id)) = session.and_then(|s| self.sessions.get(&s).map(|id| (s, *id))) else {
      warn!(party = %sender, session = %sender_session, seq, "message for unknown session");
      return;
    };

    if !self.ensure_resident(id).await {
      return;
    }
    let Some(resident) = self.resident_mut(id) else {
      return;
    };
    let waiting = resident.checkpoint.awaiting == Await::Receive { session };
    let Some(record) = resident.session_mut(session) else {
      return;
    };

    if record.counterparty != sender {
      warn!(workflow_id = %id, party = %sender, session = %session, "message from unexpected party");
      return;
    }
    if seq < record.next_receive_seq {
      debug!(workflow_id = %id, session = %session, seq, "dropping duplicate message");
      return;
    }
    record.next_receive_seq = seq + 1;

    let learned = record.peer_session.is_none();
    if learned {
      record.peer_session = Some(sender_session);
    }

    let item = match payload {
      SessionPayload::Data { data } => Ok(data),
      SessionPayload::Error { message } => {
        record.errored = true;
        Err(WorkflowFailure::Counterparty {
          party: sender.clone(),
          message,
        })
      }
      SessionPayload::Reject { message } => {
        record.errored = true;
        Err(WorkflowFailure::SessionRejected {
          party: sender.clone(),
          message,
        })
      }
      SessionPayload::Init { .. } => return,
    };
    record.inbox.push_back(item);

    if learned {
      self.peers.insert((sender, sender_session), session);
    }

    if !self.checkpoint(id, Pending::default()).await {
      return;
    }
    if waiting {
      self.wake(id, Wakeup::Inbox(session));
    } else if self
      .instances
      .get(&id)
      .is_some_and(|slot| slot.state == WorkflowState::Suspended)
    {
      self.park_when_idle(id);
    }
  }

  async fn kill(&mut self, id: WorkflowId) -> bool {
    if !self.instances.contains_key(&id) {
      return false;
    }
    if self.ensure_resident(id).await {
      info!(workflow_id = %id, "killing workflow instance");
      self
        .finish(id, Err(WorkflowFailure::Killed), Pending::default())
        .await;
    }
    true
  }

  /// Run queued work down to `acceptable_remaining` entries and report how
  /// many were left. Each entry queued when the drain starts runs at most
  /// once, up to its next suspension point; work it queues in turn is left.
  async fn drain(&mut self, acceptable_remaining: usize) -> usize {
    let mut budget = self.run_queue.len();
    info!(
      queued = budget,
      acceptable_remaining, "draining state machine manager"
    );
    while budget > 0 && self.run_queue.len() > acceptable_remaining {
      let Some((id, wakeup)) = self.run_queue.pop_front() else {
        break;
      };
      budget -= 1;
      self.run_instance(id, wakeup).await;
    }

    let discarded = self.run_queue.len();
    for (id, wakeup) in &self.run_queue {
      debug!(workflow_id = %id, ?wakeup, "discarding queued work at shutdown");
    }
    info!(
      party = %self.our_identity,
      discarded,
      live = self.instances.len(),
      "state machine manager stopped"
    );
    discarded
  }

  fn schedule_timer(&self, id: WorkflowId, deadline: DateTime<Utc>) {
    let events = self.events.clone();
    tokio::spawn(async move {
      let delay = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
      tokio::time::sleep(delay).await;
      if let Some(events) = events.upgrade() {
        let _ = events.send(Event::TimerFired { id, deadline });
      }
    });
  }

  fn spawn_external(&self, id: WorkflowId, operation: ExternalOperation) {
    let events = self.events.clone();
    tokio::spawn(async move {
      let result = operation.await;
      if let Some(events) = events.upgrade() {
        let _ = events.send(Event::ExternalDone { id, result });
      }
    });
  }
}

/// Next input waiting on a session: a queued message, or the failure of an
/// ended session.
fn take_received(
  record: &mut SessionRecord,
) -> Option<Result<serde_json::Value, WorkflowFailure>> {
  if let Some(item) = record.inbox.pop_front() {
    return Some(item);
  }
  record.errored.then(|| {
    Err(WorkflowFailure::Counterparty {
      party: record.counterparty.clone(),
      message: "session ended by counterparty".to_string(),
    })
  })
}
