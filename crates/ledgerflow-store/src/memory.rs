use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use ledgerflow_checkpoint::CheckpointStatus;
use ledgerflow_workflow::{LedgerWrite, OutboundMessage, WorkflowId};
use tracing::debug;

use crate::types::{CheckpointTransaction, CheckpointWrite, StoredCheckpoint};
use crate::{CheckpointStore, StoreError};

#[derive(Default)]
struct Tables {
  checkpoints: BTreeMap<WorkflowId, StoredCheckpoint>,
  outbox: Vec<OutboundMessage>,
  ledger_writes: Vec<LedgerWrite>,
  failing_commits: u32,
}

/// Checkpoint store held in process memory.
///
/// All tables sit behind one lock, so a commit is atomic with respect to
/// every reader.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
  tables: Mutex<Tables>,
}

impl InMemoryCheckpointStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Make the next `count` commits fail without writing anything.
  pub fn fail_next_commits(&self, count: u32) -> Result<(), StoreError> {
    self.tables()?.failing_commits = count;
    Ok(())
  }

  fn tables(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
    self.tables.lock().map_err(|_| StoreError::Unavailable {
      message: "checkpoint store lock poisoned".to_string(),
    })
  }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
  async fn commit(&self, transaction: CheckpointTransaction) -> Result<(), StoreError> {
    let mut tables = self.tables()?;

    if tables.failing_commits > 0 {
      tables.failing_commits -= 1;
      return Err(StoreError::Unavailable {
        message: "injected commit failure".to_string(),
      });
    }

    match transaction.checkpoint {
      CheckpointWrite::Upsert { id, status, bytes } => {
        tables
          .checkpoints
          .insert(id, StoredCheckpoint { id, status, bytes });
      }
      CheckpointWrite::Delete { id } => {
        tables.checkpoints.remove(&id);
      }
      CheckpointWrite::Unchanged => {}
    }

    for message in transaction.outbound {
      if !tables
        .outbox
        .iter()
        .any(|queued| queued.message_id == message.message_id)
      {
        tables.outbox.push(message);
      }
    }
    tables.ledger_writes.extend(transaction.ledger_writes);

    Ok(())
  }

  async fn get(&self, id: WorkflowId) -> Result<Option<StoredCheckpoint>, StoreError> {
    Ok(self.tables()?.checkpoints.get(&id).cloned())
  }

  async fn all(&self, status: CheckpointStatus) -> Result<Vec<StoredCheckpoint>, StoreError> {
    Ok(
      self
        .tables()?
        .checkpoints
        .values()
        .filter(|checkpoint| checkpoint.status == status)
        .cloned()
        .collect(),
    )
  }

  async fn remove(&self, id: WorkflowId) -> Result<bool, StoreError> {
    Ok(self.tables()?.checkpoints.remove(&id).is_some())
  }

  async fn prune(&self, status: CheckpointStatus) -> Result<u64, StoreError> {
    let mut tables = self.tables()?;
    let before = tables.checkpoints.len();
    tables
      .checkpoints
      .retain(|_, checkpoint| checkpoint.status != status);
    let removed = (before - tables.checkpoints.len()) as u64;
    debug!(status = %status, removed, "pruned checkpoints");
    Ok(removed)
  }

  async fn pending_outbound(&self) -> Result<Vec<OutboundMessage>, StoreError> {
    Ok(self.tables()?.outbox.clone())
  }

  async fn acknowledge_outbound(&self, message_ids: &[String]) -> Result<(), StoreError> {
    let acknowledged: HashSet<&str> = message_ids.iter().map(String::as_str).collect();
    self
      .tables()?
      .outbox
      .retain(|message| !acknowledged.contains(message.message_id.as_str()));
    Ok(())
  }

  async fn ledger_writes(&self) -> Result<Vec<LedgerWrite>, StoreError> {
    Ok(self.tables()?.ledger_writes.clone())
  }
}
