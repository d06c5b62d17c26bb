use async_trait::async_trait;
use ledgerflow_workflow::{Party, SessionMessage};

use crate::error::TransportError;

/// Delivers session messages to counterparty nodes.
///
/// A successful `send` means the message was handed to the destination;
/// messages that fail stay in the outbox and are sent again when the manager
/// next starts.
#[async_trait]
pub trait MessageTransport: Send + Sync {
  async fn send(&self, destination: &Party, message: SessionMessage) -> Result<(), TransportError>;
}
