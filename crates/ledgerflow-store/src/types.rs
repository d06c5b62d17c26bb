use ledgerflow_checkpoint::CheckpointStatus;
use ledgerflow_workflow::{LedgerWrite, OutboundMessage, WorkflowId};

/// A checkpoint as the store keeps it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCheckpoint {
  pub id: WorkflowId,
  pub status: CheckpointStatus,
  /// Encoded checkpoint.
  pub bytes: Vec<u8>,
}

/// What a commit does to the instance's checkpoint row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointWrite {
  Upsert {
    id: WorkflowId,
    status: CheckpointStatus,
    bytes: Vec<u8>,
  },
  Delete {
    id: WorkflowId,
  },
  /// Only the side tables change.
  Unchanged,
}

/// One atomic unit of storage work.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointTransaction {
  pub checkpoint: CheckpointWrite,
  pub outbound: Vec<OutboundMessage>,
  pub ledger_writes: Vec<LedgerWrite>,
}

impl CheckpointTransaction {
  pub fn new(checkpoint: CheckpointWrite) -> Self {
    Self {
      checkpoint,
      outbound: Vec::new(),
      ledger_writes: Vec::new(),
    }
  }

  pub fn with_outbound(mut self, outbound: Vec<OutboundMessage>) -> Self {
    self.outbound = outbound;
    self
  }

  pub fn with_ledger_writes(mut self, ledger_writes: Vec<LedgerWrite>) -> Self {
    self.ledger_writes = ledger_writes;
    self
  }
}
