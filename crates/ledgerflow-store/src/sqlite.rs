use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use ledgerflow_checkpoint::CheckpointStatus;
use ledgerflow_workflow::{LedgerWrite, OutboundMessage, Party, WorkflowId};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::types::{CheckpointTransaction, CheckpointWrite, StoredCheckpoint};
use crate::{CheckpointStore, StoreError};

/// SQLite-based checkpoint store. Every commit is one SQL transaction.
pub struct SqliteCheckpointStore {
  pool: SqlitePool,
}

impl SqliteCheckpointStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Open (creating if needed) the database at `url` and run migrations.
  pub async fn connect(url: &str) -> Result<Self, StoreError> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
      .max_connections(4)
      .connect_with(options)
      .await?;
    let store = Self::new(pool);
    store.migrate().await?;
    Ok(store)
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), StoreError> {
    sqlx::migrate!("../../migrations").run(&self.pool).await?;
    Ok(())
  }
}

fn parse_id(value: &str) -> Result<WorkflowId, StoreError> {
  WorkflowId::parse(value).map_err(|err| StoreError::InvalidRecord {
    message: format!("bad workflow id '{}': {}", value, err),
  })
}

fn checkpoint_from_row(row: &SqliteRow) -> Result<StoredCheckpoint, StoreError> {
  let id: String = row.try_get("workflow_id")?;
  let status: String = row.try_get("status")?;
  let bytes: Vec<u8> = row.try_get("body")?;

  Ok(StoredCheckpoint {
    id: parse_id(&id)?,
    status: CheckpointStatus::from_str(&status)
      .map_err(|message| StoreError::InvalidRecord { message })?,
    bytes,
  })
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
  async fn commit(&self, transaction: CheckpointTransaction) -> Result<(), StoreError> {
    let now = Utc::now();
    let mut tx = self.pool.begin().await?;

    match &transaction.checkpoint {
      CheckpointWrite::Upsert { id, status, bytes } => {
        sqlx::query(
          r#"
          INSERT INTO checkpoints (workflow_id, status, body, updated_at)
          VALUES (?, ?, ?, ?)
          ON CONFLICT(workflow_id) DO UPDATE SET
            status = excluded.status,
            body = excluded.body,
            updated_at = excluded.updated_at
          "#,
        )
        .bind(id.to_string())
        .bind(status.as_str())
        .bind(bytes.as_slice())
        .bind(now)
        .execute(&mut *tx)
        .await?;
      }
      CheckpointWrite::Delete { id } => {
        sqlx::query("DELETE FROM checkpoints WHERE workflow_id = ?")
          .bind(id.to_string())
          .execute(&mut *tx)
          .await?;
      }
      CheckpointWrite::Unchanged => {}
    }

    for message in &transaction.outbound {
      sqlx::query(
        r#"
        INSERT OR IGNORE INTO outbox (message_id, destination, message, created_at)
        VALUES (?, ?, ?, ?)
        "#,
      )
      .bind(&message.message_id)
      .bind(message.destination.name())
      .bind(serde_json::to_string(&message.message)?)
      .bind(now)
      .execute(&mut *tx)
      .await?;
    }

    for write in &transaction.ledger_writes {
      sqlx::query(
        r#"
        INSERT INTO ledger_writes (workflow_id, kind, payload, created_at)
        VALUES (?, ?, ?, ?)
        "#,
      )
      .bind(write.workflow_id.to_string())
      .bind(&write.kind)
      .bind(serde_json::to_string(&write.payload)?)
      .bind(now)
      .execute(&mut *tx)
      .await?;
    }

    tx.commit().await?;
    Ok(())
  }

  async fn get(&self, id: WorkflowId) -> Result<Option<StoredCheckpoint>, StoreError> {
    let row = sqlx::query(
      r#"
      SELECT workflow_id, status, body
      FROM checkpoints
      WHERE workflow_id = ?
      "#,
    )
    .bind(id.to_string())
    .fetch_optional(&self.pool)
    .await?;

    row.as_ref().map(checkpoint_from_row).transpose()
  }

  async fn all(&self, status: CheckpointStatus) -> Result<Vec<StoredCheckpoint>, StoreError> {
    let rows = sqlx::query(
      r#"
      SELECT workflow_id, status, body
      FROM checkpoints
      WHERE status = ?
      ORDER BY workflow_id
      "#,
    )
    .bind(status.as_str())
    .fetch_all(&self.pool)
    .await?;

    rows.iter().map(checkpoint_from_row).collect()
  }

  async fn remove(&self, id: WorkflowId) -> Result<bool, StoreError> {
    let result = sqlx::query("DELETE FROM checkpoints WHERE workflow_id = ?")
      .bind(id.to_string())
      .execute(&self.pool)
      .await?;
    Ok(result.rows_affected() > 0)
  }

  async fn prune(&self, status: CheckpointStatus) -> Result<u64, StoreError> {
    let result = sqlx::query("DELETE FROM checkpoints WHERE status = ?")
      .bind(status.as_str())
      .execute(&self.pool)
      .await?;
    debug!(status = %status, removed = result.rows_affected(), "pruned checkpoints");
    Ok(result.rows_affected())
  }

  async fn pending_outbound(&self) -> Result<Vec<OutboundMessage>, StoreError> {
    let rows = sqlx::query("SELECT message_id, destination, message FROM outbox ORDER BY seq")
      .fetch_all(&self.pool)
      .await?;

    rows
      .iter()
      .map(|row| -> Result<OutboundMessage, StoreError> {
        let message: String = row.try_get("message")?;
        Ok(OutboundMessage {
          message_id: row.try_get("message_id")?,
          destination: Party::new(row.try_get::<String, _>("destination")?),
          message: serde_json::from_str(&message)?,
        })
      })
      .collect()
  }

  async fn acknowledge_outbound(&self, message_ids: &[String]) -> Result<(), StoreError> {
    let mut tx = self.pool.begin().await?;
    for message_id in message_ids {
      sqlx::query("DELETE FROM outbox WHERE message_id = ?")
        .bind(message_id)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
  }

  async fn ledger_writes(&self) -> Result<Vec<LedgerWrite>, StoreError> {
    let rows = sqlx::query("SELECT workflow_id, kind, payload FROM ledger_writes ORDER BY seq")
      .fetch_all(&self.pool)
      .await?;

    rows
      .iter()
      .map(|row| -> Result<LedgerWrite, StoreError> {
        let workflow_id: String = row.try_get("workflow_id")?;
        let payload: String = row.try_get("payload")?;
        Ok(LedgerWrite {
          workflow_id: parse_id(&workflow_id)?,
          kind: row.try_get("kind")?,
          payload: serde_json::from_str(&payload)?,
        })
      })
      .collect()
  }
}
