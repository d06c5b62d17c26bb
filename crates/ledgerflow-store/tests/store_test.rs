use ledgerflow_checkpoint::CheckpointStatus;
use ledgerflow_store::{
  CheckpointStore, CheckpointTransaction, CheckpointWrite, InMemoryCheckpointStore,
  SqliteCheckpointStore,
};
use ledgerflow_workflow::{
  LedgerWrite, OutboundMessage, Party, SessionId, SessionMessage, SessionPayload, WorkflowId,
};
use serde_json::json;

fn outbound(id: WorkflowId, seq: u64) -> OutboundMessage {
  let session = SessionId::new_random();
  OutboundMessage {
    message_id: format!("{}:{}:{}", id, session, seq),
    destination: Party::new("Bob"),
    message: SessionMessage {
      sender_session: session,
      recipient_session: None,
      seq,
      payload: SessionPayload::Data { data: json!(seq) },
    },
  }
}

fn upsert(id: WorkflowId, status: CheckpointStatus, body: &str) -> CheckpointWrite {
  CheckpointWrite::Upsert {
    id,
    status,
    bytes: body.as_bytes().to_vec(),
  }
}

async fn exercise_store(store: &dyn CheckpointStore) {
  let first = WorkflowId::new_random();
  let second = WorkflowId::new_random();

  let message = outbound(first, 0);
  store
    .commit(
      CheckpointTransaction::new(upsert(first, CheckpointStatus::Runnable, "v1"))
        .with_outbound(vec![message.clone()])
        .with_ledger_writes(vec![LedgerWrite {
          workflow_id: first,
          kind: "trade".to_string(),
          payload: json!({ "id": "T-1" }),
        }]),
    )
    .await
    .unwrap();

  // Overwrite on the next checkpoint.
  store
    .commit(CheckpointTransaction::new(upsert(
      first,
      CheckpointStatus::Runnable,
      "v2",
    )))
    .await
    .unwrap();
  store
    .commit(CheckpointTransaction::new(upsert(
      second,
      CheckpointStatus::Failed,
      "failed",
    )))
    .await
    .unwrap();

  let stored = store.get(first).await.unwrap().unwrap();
  assert_eq!(stored.bytes, b"v2".to_vec());
  assert_eq!(stored.status, CheckpointStatus::Runnable);

  let runnable = store.all(CheckpointStatus::Runnable).await.unwrap();
  assert_eq!(runnable.len(), 1);
  assert_eq!(runnable[0].id, first);

  assert_eq!(store.pending_outbound().await.unwrap(), vec![message.clone()]);
  store
    .acknowledge_outbound(&[message.message_id.clone()])
    .await
    .unwrap();
  assert!(store.pending_outbound().await.unwrap().is_empty());

  let writes = store.ledger_writes().await.unwrap();
  assert_eq!(writes.len(), 1);
  assert_eq!(writes[0].kind, "trade");

  assert_eq!(store.prune(CheckpointStatus::Failed).await.unwrap(), 1);
  assert!(store.get(second).await.unwrap().is_none());

  store
    .commit(CheckpointTransaction::new(CheckpointWrite::Delete { id: first }))
    .await
    .unwrap();
  assert!(store.get(first).await.unwrap().is_none());
  assert!(!store.remove(first).await.unwrap());
}

#[tokio::test]
async fn test_in_memory_store() {
  let store = InMemoryCheckpointStore::new();
  exercise_store(&store).await;
}

#[tokio::test]
async fn test_sqlite_store() {
  let dir = tempfile::tempdir().unwrap();
  let url = format!("sqlite://{}", dir.path().join("ledger.db").display());
  let store = SqliteCheckpointStore::connect(&url).await.unwrap();
  exercise_store(&store).await;
}

#[tokio::test]
async fn test_sqlite_store_survives_reopen() {
  let dir = tempfile::tempdir().unwrap();
  let url = format!("sqlite://{}", dir.path().join("ledger.db").display());
  let id = WorkflowId::new_random();
  let message = outbound(id, 0);

  {
    let store = SqliteCheckpointStore::connect(&url).await.unwrap();
    store
      .commit(
        CheckpointTransaction::new(upsert(id, CheckpointStatus::Runnable, "body"))
          .with_outbound(vec![message.clone()]),
      )
      .await
      .unwrap();
  }

  let reopened = SqliteCheckpointStore::connect(&url).await.unwrap();
  assert_eq!(reopened.get(id).await.unwrap().unwrap().bytes, b"body".to_vec());
  assert_eq!(reopened.pending_outbound().await.unwrap(), vec![message]);
}

#[tokio::test]
async fn test_failed_commit_writes_nothing() {
  let store = InMemoryCheckpointStore::new();
  let id = WorkflowId::new_random();
  store.fail_next_commits(1).unwrap();

  let result = store
    .commit(
      CheckpointTransaction::new(upsert(id, CheckpointStatus::Runnable, "body"))
        .with_outbound(vec![outbound(id, 0)]),
    )
    .await;

  assert!(result.is_err());
  assert!(store.get(id).await.unwrap().is_none());
  assert!(store.pending_outbound().await.unwrap().is_empty());

  store
    .commit(CheckpointTransaction::new(upsert(
      id,
      CheckpointStatus::Runnable,
      "body",
    )))
    .await
    .unwrap();
  assert!(store.get(id).await.unwrap().is_some());
}
