//! Ledgerflow Registry
//!
//! Two load-time registries consumed by the state machine manager:
//!
//! - [`WorkflowRegistry`] decides which responder workflow is started when a
//!   counterparty opens a session for an initiating workflow type. Candidates
//!   are ranked by [`Weight`]; ties at the top are rejected by
//!   [`WorkflowRegistry::validate_registrations`].
//! - [`WorkflowCatalog`] is the static plugin registry of compiled workflow
//!   modules. It knows which modules are installed (for checkpoint
//!   verification) and how to rebuild each workflow type from a checkpoint
//!   frame.
//!
//! Both are populated by the module loader through explicit calls and then
//! shared read-only.

mod catalog;
mod error;
mod registry;

pub use catalog::{Restorer, WorkflowCatalog, restorer_for};
pub use error::RegistryError;
pub use registry::{
  ResolvedResponder, ResponderContext, ResponderFactory, ResponderKind, Weight, WorkflowRegistry,
};
