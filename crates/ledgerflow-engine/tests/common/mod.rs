#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ledgerflow_checkpoint::{Checkpoint, CheckpointStatus, decode};
use ledgerflow_config::NodeConfig;
use ledgerflow_engine::{
  ManagerHandle, MessageTransport, StartupError, TransportError, WorkflowStateMachineManager,
};
use ledgerflow_registry::{
  ResponderContext, ResponderFactory, WorkflowCatalog, WorkflowRegistry, restorer_for,
};
use ledgerflow_store::CheckpointStore;
use ledgerflow_workflow::{
  Party, Resume, SessionId, SessionMessage, Step, StepContext, WorkflowFailure, WorkflowLogic,
  WorkflowType,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

// --- network -------------------------------------------------------------

/// In-process network connecting managers by party name.
#[derive(Default)]
pub struct Network {
  nodes: Mutex<HashMap<Party, ManagerHandle>>,
}

impl Network {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn connect(&self, handle: &ManagerHandle) {
    self
      .nodes
      .lock()
      .unwrap()
      .insert(handle.our_identity().clone(), handle.clone());
  }

  pub fn disconnect(&self, party: &Party) {
    self.nodes.lock().unwrap().remove(party);
  }

  pub fn transport(self: &Arc<Self>, from: Party) -> Arc<LoopbackTransport> {
    Arc::new(LoopbackTransport {
      from,
      network: self.clone(),
    })
  }
}

pub struct LoopbackTransport {
  from: Party,
  network: Arc<Network>,
}

#[async_trait]
impl MessageTransport for LoopbackTransport {
  async fn send(&self, destination: &Party, message: SessionMessage) -> Result<(), TransportError> {
    let handle = self
      .network
      .nodes
      .lock()
      .unwrap()
      .get(destination)
      .cloned()
      .ok_or_else(|| TransportError::Unreachable {
        party: destination.clone(),
      })?;
    handle
      .deliver(self.from.clone(), message)
      .map_err(|_| TransportError::Closed)
  }
}

// --- nodes ---------------------------------------------------------------

pub fn test_config() -> NodeConfig {
  let mut config = NodeConfig::new(4);
  config.state_machine.commit_retry_backoff_ms = 1;
  config
}

pub fn responder<F, W>(build: F) -> ResponderFactory
where
  F: Fn(SessionId) -> W + Send + Sync + 'static,
  W: WorkflowLogic + 'static,
{
  Arc::new(move |ctx: ResponderContext| Box::new(build(ctx.session)) as Box<dyn WorkflowLogic>)
}

pub fn registry(config: &NodeConfig) -> WorkflowRegistry {
  let mut registry = WorkflowRegistry::new(config.platform_version, &config.flow_overrides);
  registry
    .register_responder("Ping", Some(WorkflowType::new("Pong")), responder(Pong::new))
    .unwrap();
  registry
    .register_responder("Grump", Some(WorkflowType::new("Grumpy")), responder(Grumpy::new))
    .unwrap();
  registry
}

pub fn catalog() -> WorkflowCatalog {
  let mut catalog = WorkflowCatalog::new();
  for initiating in ["Ping", "Grump", "Lonely"] {
    catalog.register_core(initiating, restorer_for::<Ping>());
  }
  catalog.register_core("Pong", restorer_for::<Pong>());
  catalog.register_core("Grumpy", restorer_for::<Grumpy>());
  catalog.register_core("Failing", restorer_for::<Failing>());
  catalog.register_core("FailsAfterWrite", restorer_for::<FailsAfterWrite>());
  catalog.register_core("Sleeper", restorer_for::<Sleeper>());
  catalog.register_core("Parent", restorer_for::<Parent>());
  catalog.register_core("Child", restorer_for::<Child>());
  catalog.register_core("Counter", restorer_for::<Counter>());
  catalog
}

pub async fn try_start_node(
  network: &Arc<Network>,
  name: &str,
  config: &NodeConfig,
  registry: WorkflowRegistry,
  store: Arc<dyn CheckpointStore>,
) -> Result<ManagerHandle, StartupError> {
  let party = Party::new(name);
  let manager = WorkflowStateMachineManager::new(
    party.clone(),
    config,
    registry,
    catalog(),
    store,
    network.transport(party),
  );
  manager.start().await
}

/// Start a node with the standard registrations and connect it.
pub async fn start_node(
  network: &Arc<Network>,
  name: &str,
  config: &NodeConfig,
  store: Arc<dyn CheckpointStore>,
) -> ManagerHandle {
  let handle = try_start_node(network, name, config, registry(config), store)
    .await
    .unwrap();
  network.connect(&handle);
  handle
}

// --- polling -------------------------------------------------------------

/// Poll `check` until it holds, failing the test after a few seconds.
pub async fn eventually<F, Fut>(mut check: F)
where
  F: FnMut() -> Fut,
  Fut: Future<Output = bool>,
{
  for _ in 0..500 {
    if check().await {
      return;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  panic!("condition not reached in time");
}

pub async fn runnable_checkpoints(store: &dyn CheckpointStore) -> Vec<Checkpoint> {
  store
    .all(CheckpointStatus::Runnable)
    .await
    .unwrap()
    .iter()
    .map(|stored| decode(&stored.bytes).unwrap())
    .collect()
}

// --- workflows -----------------------------------------------------------

/// Sends its payload to a counterparty and returns the reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ping {
  pub initiating: String,
  pub counterparty: Party,
  pub payload: String,
  pub session: Option<SessionId>,
}

impl Ping {
  pub fn new(counterparty: &str, payload: &str) -> Self {
    Self {
      initiating: "Ping".to_string(),
      counterparty: Party::new(counterparty),
      payload: payload.to_string(),
      session: None,
    }
  }

  /// The same exchange announced under another initiating type.
  pub fn announced_as(mut self, initiating: &str) -> Self {
    self.initiating = initiating.to_string();
    self
  }
}

impl WorkflowLogic for Ping {
  fn workflow_type(&self) -> WorkflowType {
    WorkflowType::new(self.initiating.clone())
  }

  fn step(&mut self, ctx: &mut StepContext<'_>, resume: Resume) -> Result<Step, WorkflowFailure> {
    match resume {
      Resume::Start => {
        let session = ctx.initiate_session(self.counterparty.clone());
        self.session = Some(session);
        ctx.send(session, json!(self.payload));
        ctx.progress("sent");
        Ok(Step::Receive(session))
      }
      Resume::Received { result, .. } => {
        let reply = result?;
        ctx.record_ledger_write("pong", reply.clone());
        Ok(Step::Done(reply))
      }
      other => Err(WorkflowFailure::logic(format!("unexpected {:?}", other))),
    }
  }

  fn snapshot(&self) -> Result<serde_json::Value, serde_json::Error> {
    serde_json::to_value(self)
  }
}

/// Answers a ping with "<payload>-pong".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pong {
  pub session: SessionId,
}

impl Pong {
  pub fn new(session: SessionId) -> Self {
    Self { session }
  }
}

impl WorkflowLogic for Pong {
  fn workflow_type(&self) -> WorkflowType {
    WorkflowType::new("Pong")
  }

  fn step(&mut self, ctx: &mut StepContext<'_>, resume: Resume) -> Result<Step, WorkflowFailure> {
    match resume {
      Resume::Start => Ok(Step::Receive(self.session)),
      Resume::Received { result, .. } => {
        let received = result?;
        let text = received.as_str().unwrap_or_default().to_string();
        ctx.send(self.session, json!(format!("{}-pong", text)));
        Ok(Step::Done(json!(text)))
      }
      other => Err(WorkflowFailure::logic(format!("unexpected {:?}", other))),
    }
  }

  fn snapshot(&self) -> Result<serde_json::Value, serde_json::Error> {
    serde_json::to_value(self)
  }
}

/// Fails as soon as it receives anything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grumpy {
  pub session: SessionId,
}

impl Grumpy {
  pub fn new(session: SessionId) -> Self {
    Self { session }
  }
}

impl WorkflowLogic for Grumpy {
  fn workflow_type(&self) -> WorkflowType {
    WorkflowType::new("Grumpy")
  }

  fn step(&mut self, _ctx: &mut StepContext<'_>, resume: Resume) -> Result<Step, WorkflowFailure> {
    match resume {
      Resume::Start => Ok(Step::Receive(self.session)),
      _ => Err(WorkflowFailure::logic("not today")),
    }
  }

  fn snapshot(&self) -> Result<serde_json::Value, serde_json::Error> {
    serde_json::to_value(self)
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Failing;

impl WorkflowLogic for Failing {
  fn workflow_type(&self) -> WorkflowType {
    WorkflowType::new("Failing")
  }

  fn step(&mut self, _ctx: &mut StepContext<'_>, _resume: Resume) -> Result<Step, WorkflowFailure> {
    Err(WorkflowFailure::logic("boom"))
  }

  fn snapshot(&self) -> Result<serde_json::Value, serde_json::Error> {
    serde_json::to_value(self)
  }
}

/// Records a write and yields, then records another and fails.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FailsAfterWrite;

impl WorkflowLogic for FailsAfterWrite {
  fn workflow_type(&self) -> WorkflowType {
    WorkflowType::new("FailsAfterWrite")
  }

  fn step(&mut self, ctx: &mut StepContext<'_>, resume: Resume) -> Result<Step, WorkflowFailure> {
    match resume {
      Resume::Start => {
        ctx.record_ledger_write("cash", json!("committed"));
        Ok(Step::Yield)
      }
      _ => {
        ctx.record_ledger_write("cash", json!("half-done"));
        Err(WorkflowFailure::logic("boom"))
      }
    }
  }

  fn snapshot(&self) -> Result<serde_json::Value, serde_json::Error> {
    serde_json::to_value(self)
  }
}

/// Sleeps for `millis`, then completes with "woke".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sleeper {
  pub millis: i64,
}

impl WorkflowLogic for Sleeper {
  fn workflow_type(&self) -> WorkflowType {
    WorkflowType::new("Sleeper")
  }

  fn step(&mut self, ctx: &mut StepContext<'_>, resume: Resume) -> Result<Step, WorkflowFailure> {
    match resume {
      Resume::Start => Ok(Step::SleepUntil(
        ctx.now() + chrono::Duration::milliseconds(self.millis),
      )),
      Resume::Timer => Ok(Step::Done(json!("woke"))),
      other => Err(WorkflowFailure::logic(format!("unexpected {:?}", other))),
    }
  }

  fn snapshot(&self) -> Result<serde_json::Value, serde_json::Error> {
    serde_json::to_value(self)
  }
}

/// Calls [`Child`] and wraps its result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Parent;

impl WorkflowLogic for Parent {
  fn workflow_type(&self) -> WorkflowType {
    WorkflowType::new("Parent")
  }

  fn step(&mut self, _ctx: &mut StepContext<'_>, resume: Resume) -> Result<Step, WorkflowFailure> {
    match resume {
      Resume::Start => Ok(Step::Call(Box::new(Child))),
      Resume::SubWorkflow(result) => Ok(Step::Done(json!({ "child": result? }))),
      other => Err(WorkflowFailure::logic(format!("unexpected {:?}", other))),
    }
  }

  fn snapshot(&self) -> Result<serde_json::Value, serde_json::Error> {
    serde_json::to_value(self)
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Child;

impl WorkflowLogic for Child {
  fn workflow_type(&self) -> WorkflowType {
    WorkflowType::new("Child")
  }

  fn step(&mut self, _ctx: &mut StepContext<'_>, resume: Resume) -> Result<Step, WorkflowFailure> {
    match resume {
      Resume::Start => Ok(Step::Yield),
      Resume::Yielded => Ok(Step::Done(json!(42))),
      other => Err(WorkflowFailure::logic(format!("unexpected {:?}", other))),
    }
  }

  fn snapshot(&self) -> Result<serde_json::Value, serde_json::Error> {
    serde_json::to_value(self)
  }
}

/// Yields `remaining` times, then records and returns how often it yielded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Counter {
  pub remaining: u32,
  pub count: u32,
}

impl Counter {
  pub fn new(remaining: u32) -> Self {
    Self {
      remaining,
      count: 0,
    }
  }
}

impl WorkflowLogic for Counter {
  fn workflow_type(&self) -> WorkflowType {
    WorkflowType::new("Counter")
  }

  fn step(&mut self, ctx: &mut StepContext<'_>, _resume: Resume) -> Result<Step, WorkflowFailure> {
    if self.remaining == 0 {
      ctx.record_ledger_write("counted", json!(self.count));
      return Ok(Step::Done(json!(self.count)));
    }
    self.remaining -= 1;
    self.count += 1;
    Ok(Step::Yield)
  }

  fn snapshot(&self) -> Result<serde_json::Value, serde_json::Error> {
    serde_json::to_value(self)
  }
}
