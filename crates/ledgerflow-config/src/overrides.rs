use serde::{Deserialize, Serialize};

/// An explicit initiator to responder mapping supplied by node configuration.
///
/// When present for an initiating workflow type, the named responder wins
/// resolution regardless of how specific the other candidates are.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowOverride {
  /// Name of the initiating workflow type.
  pub initiator: String,
  /// Name of the responder workflow type forced for that initiator.
  pub responder: String,
}

impl FlowOverride {
  pub fn new(initiator: impl Into<String>, responder: impl Into<String>) -> Self {
    Self {
      initiator: initiator.into(),
      responder: responder.into(),
    }
  }
}
