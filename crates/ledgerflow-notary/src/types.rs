use std::fmt;

use chrono::{DateTime, Utc};
use ledgerflow_workflow::Party;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An output of a transaction: the transaction id and the output index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateRef {
  pub tx_id: String,
  pub index: u32,
}

impl StateRef {
  pub fn new(tx_id: impl Into<String>, index: u32) -> Self {
    Self {
      tx_id: tx_id.into(),
      index,
    }
  }
}

impl fmt::Display for StateRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}({})", self.tx_id, self.index)
  }
}

/// Interval in which a transaction may be notarised. Open ends are unbounded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
  pub from: Option<DateTime<Utc>>,
  pub until: Option<DateTime<Utc>>,
}

impl TimeWindow {
  pub fn contains(&self, instant: DateTime<Utc>) -> bool {
    self.from.is_none_or(|from| instant >= from) && self.until.is_none_or(|until| instant < until)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotarisationRequest {
  pub tx_id: String,
  /// States the transaction consumes.
  pub inputs: Vec<StateRef>,
  /// States the transaction reads without consuming.
  #[serde(default)]
  pub references: Vec<StateRef>,
  #[serde(default)]
  pub time_window: Option<TimeWindow>,
  pub requester: Party,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotarySignature {
  pub tx_id: String,
  pub by: String,
  pub signed_at: DateTime<Utc>,
}

/// A requested state that another transaction already consumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumedState {
  pub state: StateRef,
  pub consumed_by: String,
  /// Set when the conflicting state was only referenced by the request.
  #[serde(default)]
  pub reference: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotaryError {
  #[error("notarised at {now}, outside the transaction's time window")]
  TimeWindowInvalid { now: DateTime<Utc>, window: TimeWindow },

  #[error("transaction is invalid: {message}")]
  TransactionInvalid { message: String },

  #[error("notary unavailable: {message}")]
  Unavailable { message: String },
}

/// The single answer a notary gives to a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NotarisationOutcome {
  Signed { signature: NotarySignature },
  Conflict { consumed: Vec<ConsumedState> },
  Error { error: NotaryError },
}
