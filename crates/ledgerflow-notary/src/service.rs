use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use crate::identity::NotaryIdentity;
use crate::types::{NotarisationOutcome, NotarisationRequest, NotaryError, NotarySignature};
use crate::uniqueness::{UniquenessError, UniquenessProvider};

/// A notary backend as seen by the notarisation workflows.
#[async_trait]
pub trait NotaryService: Send + Sync {
  fn identity(&self) -> &NotaryIdentity;

  /// Decide one request. Must be idempotent for a repeated request.
  async fn notarise(&self, request: NotarisationRequest) -> NotarisationOutcome;
}

/// Checks a transaction before a validating notary signs it.
#[async_trait]
pub trait TransactionVerifier: Send + Sync {
  async fn verify(&self, request: &NotarisationRequest) -> Result<(), String>;
}

/// Notary run by a single node, optionally validating transactions first.
pub struct SingleNodeNotary {
  identity: NotaryIdentity,
  key: String,
  provider: Arc<dyn UniquenessProvider>,
  verifier: Option<Arc<dyn TransactionVerifier>>,
}

impl SingleNodeNotary {
  pub fn new(key: impl Into<String>, provider: Arc<dyn UniquenessProvider>) -> Self {
    let key = key.into();
    Self {
      identity: NotaryIdentity::single(key.clone()),
      key,
      provider,
      verifier: None,
    }
  }

  /// Verify every transaction with `verifier` before committing it.
  pub fn validating(mut self, verifier: Arc<dyn TransactionVerifier>) -> Self {
    self.verifier = Some(verifier);
    self
  }
}

#[async_trait]
impl NotaryService for SingleNodeNotary {
  fn identity(&self) -> &NotaryIdentity {
    &self.identity
  }

  async fn notarise(&self, request: NotarisationRequest) -> NotarisationOutcome {
    if let Some(verifier) = &self.verifier
      && let Err(message) = verifier.verify(&request).await
    {
      warn!(tx_id = %request.tx_id, error = %message, "rejecting invalid transaction");
      return NotarisationOutcome::Error {
        error: NotaryError::TransactionInvalid { message },
      };
    }

    let now = Utc::now();
    if let Some(window) = &request.time_window
      && !window.contains(now)
    {
      return NotarisationOutcome::Error {
        error: NotaryError::TimeWindowInvalid {
          now,
          window: window.clone(),
        },
      };
    }

    match self
      .provider
      .commit(&request.tx_id, &request.inputs, &request.references)
      .await
    {
      Ok(()) => {
        info!(tx_id = %request.tx_id, requester = %request.requester, "notarised transaction");
        NotarisationOutcome::Signed {
          signature: NotarySignature {
            tx_id: request.tx_id,
            by: self.key.clone(),
            signed_at: now,
          },
        }
      }
      Err(UniquenessError::Conflict { consumed }) => {
        warn!(tx_id = %request.tx_id, conflicts = consumed.len(), "notarisation conflict");
        NotarisationOutcome::Conflict { consumed }
      }
      Err(e @ UniquenessError::Unavailable { .. }) => NotarisationOutcome::Error {
        error: NotaryError::Unavailable {
          message: e.to_string(),
        },
      },
    }
  }
}
