use thiserror::Error;

/// Errors raised while registering or resolving workflows.
#[derive(Debug, Error)]
pub enum RegistryError {
  /// An application responder was registered for an initiating type that
  /// has a core responder, or the other way round.
  #[error(
    "initiating type '{initiating_type}' is served by a core responder and cannot also have application responders"
  )]
  CoreResponderInstalled { initiating_type: String },

  /// Two or more responders share the top weight for an initiating type.
  #[error(
    "unable to determine which responder to use for '{initiating_type}': {} are equally specific; configure a flow override",
    responders.join(", ")
  )]
  AmbiguousResponders {
    initiating_type: String,
    responders: Vec<String>,
  },

  /// A module with this name is already installed.
  #[error("module '{name}' is installed more than once")]
  DuplicateModule { name: String },

  /// No restorer is registered for a workflow type found in a checkpoint.
  #[error("no restorer registered for workflow type '{workflow_type}'")]
  UnknownWorkflowType { workflow_type: String },

  /// The persisted state of a frame did not deserialize.
  #[error("failed to restore workflow type '{workflow_type}'")]
  Restore {
    workflow_type: String,
    #[source]
    source: serde_json::Error,
  },
}
