use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ledgerflow_config::NodeConfig;
use ledgerflow_engine::{
  ManagerError, ManagerHandle, MessageTransport, TransportError, WorkflowStateMachineManager,
};
use ledgerflow_notary::{
  InMemoryUniquenessProvider, NOTARISATION_REQUEST, NotarisationRequest, NotaryClient,
  SingleNodeNotary, StateRef, install_notary, notarisation_request_type,
};
use ledgerflow_registry::{
  ResolvedResponder, ResponderKind, WorkflowCatalog, WorkflowRegistry, restorer_for,
};
use ledgerflow_store::{CheckpointStore, InMemoryCheckpointStore};
use ledgerflow_workflow::{InvocationContext, Party, SessionMessage, WorkflowFailure};

#[derive(Default)]
struct Network {
  nodes: Mutex<HashMap<Party, ManagerHandle>>,
}

struct Loopback {
  from: Party,
  network: Arc<Network>,
}

#[async_trait]
impl MessageTransport for Loopback {
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

async fn start_node(
  network: &Arc<Network>,
  name: &str,
  registry: WorkflowRegistry,
  catalog: WorkflowCatalog,
  store: Arc<dyn CheckpointStore>,
) -> ManagerHandle {
  let party = Party::new(name);
  let transport = Arc::new(Loopback {
    from: party.clone(),
    network: network.clone(),
  });
  let handle = WorkflowStateMachineManager::new(
    party.clone(),
    &NodeConfig::new(4),
    registry,
    catalog,
    store,
    transport,
  )
  .start()
  .await
  .unwrap();
  network.nodes.lock().unwrap().insert(party, handle.clone());
  handle
}

fn request(tx_id: &str, input: StateRef) -> NotarisationRequest {
  NotarisationRequest {
    tx_id: tx_id.to_string(),
    inputs: vec![input],
    references: Vec::new(),
    time_window: None,
    requester: Party::new("Alice"),
  }
}

async fn notary_network() -> (Arc<Network>, ManagerHandle, Arc<InMemoryCheckpointStore>) {
  let network = Arc::new(Network::default());

  let mut registry = WorkflowRegistry::new(4, &[]);
  let mut catalog = WorkflowCatalog::new();
  let notary = SingleNodeNotary::new("notary-key", Arc::new(InMemoryUniquenessProvider::new()));
  install_notary(&mut registry, &mut catalog, Arc::new(notary)).unwrap();
  start_node(&network, "Notary", registry, catalog, Arc::new(InMemoryCheckpointStore::new())).await;

  // The requesting side only needs to restore its client.
  let mut catalog = WorkflowCatalog::new();
  catalog.register_core(NOTARISATION_REQUEST, restorer_for::<NotaryClient>());
  let alice_store = Arc::new(InMemoryCheckpointStore::new());
  let alice = start_node(
    &network,
    "Alice",
    WorkflowRegistry::new(4, &[]),
    catalog,
    alice_store.clone(),
  )
  .await;

  (network, alice, alice_store)
}

#[test]
fn test_notary_installs_as_core_responder() {
  let mut registry = WorkflowRegistry::new(7, &[]);
  let mut catalog = WorkflowCatalog::new();
  let notary = SingleNodeNotary::new("notary-key", Arc::new(InMemoryUniquenessProvider::new()));
  install_notary(&mut registry, &mut catalog, Arc::new(notary)).unwrap();

  let resolved: ResolvedResponder = registry
    .resolve_responder(&notarisation_request_type().name)
    .unwrap();
  assert_eq!(resolved.kind, ResponderKind::Core);
  assert_eq!(resolved.protocol_version, 7);
  assert!(catalog.contains(&notarisation_request_type().name));
}

#[tokio::test]
async fn test_notarise_then_reject_double_spend() {
  let (_network, alice, alice_store) = notary_network().await;
  let notary = Party::new("Notary");
  let state = StateRef::new("issue", 0);

  let signature = alice
    .start_workflow(
      Box::new(NotaryClient::new(notary.clone(), request("tx-1", state.clone()))),
      InvocationContext::rpc("tester"),
    )
    .unwrap()
    .result
    .wait()
    .await
    .unwrap();
  assert_eq!(signature["tx_id"], "tx-1");
  assert_eq!(signature["by"], "notary-key");

  let writes = alice_store.ledger_writes().await.unwrap();
  assert_eq!(writes.len(), 1);
  assert_eq!(writes[0].kind, "notarised");

  let double_spend = alice
    .start_workflow(
      Box::new(NotaryClient::new(notary.clone(), request("tx-2", state))),
      InvocationContext::rpc("tester"),
    )
    .unwrap()
    .result
    .wait()
    .await;

  match double_spend {
    Err(ManagerError::Workflow(WorkflowFailure::Counterparty { party, message })) => {
      assert_eq!(party, notary);
      assert!(message.contains("issue(0)"));
    }
    other => panic!("expected conflict, got {:?}", other),
  }
}
