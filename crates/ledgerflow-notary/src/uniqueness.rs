use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use crate::types::{ConsumedState, StateRef};

#[derive(Debug, Error)]
pub enum UniquenessError {
  #[error("{} requested states were already consumed", consumed.len())]
  Conflict { consumed: Vec<ConsumedState> },

  #[error("uniqueness provider unavailable: {message}")]
  Unavailable { message: String },
}

/// Records which transaction consumed each state.
#[async_trait]
pub trait UniquenessProvider: Send + Sync {
  /// Mark `inputs` as consumed by `tx_id`, checking `references` are still
  /// unconsumed. Committing the same transaction again succeeds.
  async fn commit(
    &self,
    tx_id: &str,
    inputs: &[StateRef],
    references: &[StateRef],
  ) -> Result<(), UniquenessError>;
}

/// Uniqueness provider held in memory. For tests and single-process nodes.
#[derive(Default)]
pub struct InMemoryUniquenessProvider {
  committed: Mutex<HashMap<StateRef, String>>,
}

impl InMemoryUniquenessProvider {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl UniquenessProvider for InMemoryUniquenessProvider {
  async fn commit(
    &self,
    tx_id: &str,
    inputs: &[StateRef],
    references: &[StateRef],
  ) -> Result<(), UniquenessError> {
    let mut committed = self
      .committed
      .lock()
      .map_err(|_| UniquenessError::Unavailable {
        message: "uniqueness lock poisoned".to_string(),
      })?;

    let conflicts = |states: &[StateRef], reference: bool| -> Vec<ConsumedState> {
      states
        .iter()
        .filter_map(|state| {
          committed
            .get(state)
            .filter(|consumer| consumer.as_str() != tx_id)
            .map(|consumer| ConsumedState {
              state: state.clone(),
              consumed_by: consumer.clone(),
              reference,
            })
        })
        .collect()
    };
    let mut consumed = conflicts(inputs, false);
    consumed.extend(conflicts(references, true));

    if !consumed.is_empty() {
      debug!(tx_id, conflicts = consumed.len(), "notarisation conflict");
      return Err(UniquenessError::Conflict { consumed });
    }

    for state in inputs {
      committed.insert(state.clone(), tx_id.to_string());
    }
    info!(tx_id, inputs = inputs.len(), "committed transaction inputs");
    Ok(())
  }
}
