//! Ledgerflow Store
//!
//! This crate provides the durable storage behind the workflow engine. A
//! [`CheckpointStore`] keeps one opaque checkpoint per workflow instance
//! together with two side tables that are written in the same transaction:
//!
//! - the outbox of session messages the checkpointed step produced, removed
//!   once the transport has accepted them
//! - ledger writes the step recorded, read by the ledger layer
//!
//! [`InMemoryCheckpointStore`] is used by tests and ephemeral nodes;
//! [`SqliteCheckpointStore`] persists to SQLite.

mod memory;
mod sqlite;
mod types;

pub use memory::InMemoryCheckpointStore;
pub use sqlite::SqliteCheckpointStore;
pub use types::{CheckpointTransaction, CheckpointWrite, StoredCheckpoint};

use async_trait::async_trait;
use ledgerflow_checkpoint::CheckpointStatus;
use ledgerflow_workflow::{LedgerWrite, OutboundMessage, WorkflowId};

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  #[error("migration failed: {0}")]
  Migrate(#[from] sqlx::migrate::MigrateError),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  /// A stored row could not be interpreted.
  #[error("invalid stored record: {message}")]
  InvalidRecord { message: String },

  /// The store refused the operation.
  #[error("store unavailable: {message}")]
  Unavailable { message: String },
}

/// Durable keyed storage of workflow checkpoints.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
  /// Apply a checkpoint write, its outbox messages and its ledger writes
  /// atomically.
  async fn commit(&self, transaction: CheckpointTransaction) -> Result<(), StoreError>;

  /// Get the checkpoint of one instance.
  async fn get(&self, id: WorkflowId) -> Result<Option<StoredCheckpoint>, StoreError>;

  /// List every checkpoint with the given status.
  async fn all(&self, status: CheckpointStatus) -> Result<Vec<StoredCheckpoint>, StoreError>;

  /// Delete one checkpoint. Returns whether it existed.
  async fn remove(&self, id: WorkflowId) -> Result<bool, StoreError>;

  /// Delete every checkpoint with the given status. Returns how many were removed.
  async fn prune(&self, status: CheckpointStatus) -> Result<u64, StoreError>;

  /// Outbox messages not yet acknowledged, in commit order.
  async fn pending_outbound(&self) -> Result<Vec<OutboundMessage>, StoreError>;

  /// Remove delivered messages from the outbox.
  async fn acknowledge_outbound(&self, message_ids: &[String]) -> Result<(), StoreError>;

  /// Every ledger write committed so far, in commit order.
  async fn ledger_writes(&self) -> Result<Vec<LedgerWrite>, StoreError>;
}
