//! Ledgerflow Notary
//!
//! The contract between the workflow engine and notary backends. Every
//! backend, whatever its consensus protocol, is installed as the single core
//! responder for [`notarisation_request_type`]:
//!
//! ```text
//!   requesting node                              notary node
//! ┌────────────────┐   NotarisationRequest   ┌──────────────────┐
//! │ NotaryClient   │ ───────────────────────▶│ NotaryResponder  │
//! │                │                         │   │ External     │
//! │                │   NotarisationOutcome   │   ▼              │
//! │                │ ◀───────────────────────│ NotaryService    │
//! └────────────────┘                         └──────────────────┘
//! ```
//!
//! The engine only relies on [`NotaryService::notarise`] answering each
//! request exactly once with a signature, a conflict or an error.
//! [`SingleNodeNotary`] is the reference backend over a
//! [`UniquenessProvider`].
//!
//! # Usage
//!
//! ```ignore
//! let notary = SingleNodeNotary::new("notary-key", Arc::new(InMemoryUniquenessProvider::new()));
//! install_notary(&mut registry, &mut catalog, Arc::new(notary))?;
//! ```

mod identity;
mod service;
mod types;
mod uniqueness;
mod workflows;

use std::sync::Arc;

use ledgerflow_registry::{
  RegistryError, ResponderContext, Restorer, WorkflowCatalog, WorkflowRegistry, restorer_for,
};
use ledgerflow_workflow::{WorkflowLogic, WorkflowType};

pub use identity::NotaryIdentity;
pub use service::{NotaryService, SingleNodeNotary, TransactionVerifier};
pub use types::{
  ConsumedState, NotarisationOutcome, NotarisationRequest, NotaryError, NotarySignature, StateRef,
  TimeWindow,
};
pub use uniqueness::{InMemoryUniquenessProvider, UniquenessError, UniquenessProvider};
pub use workflows::{NotaryClient, NotaryResponder};

/// Initiating workflow type every notary backend responds to.
pub const NOTARISATION_REQUEST: &str = "ledgerflow.notary.Notarise";

/// Workflow type of the responder run on the notary node.
pub const NOTARY_RESPONDER: &str = "ledgerflow.notary.NotaryResponder";

pub fn notarisation_request_type() -> WorkflowType {
  WorkflowType::new(NOTARISATION_REQUEST)
}

/// Install `service` as this node's notary.
///
/// Registers the core responder for [`NOTARISATION_REQUEST`] and the
/// restorers for both notarisation workflows. Installing a second service
/// replaces the first.
pub fn install_notary(
  registry: &mut WorkflowRegistry,
  catalog: &mut WorkflowCatalog,
  service: Arc<dyn NotaryService>,
) -> Result<(), RegistryError> {
  let factory_service = service.clone();
  registry.register_core_responder(
    NOTARISATION_REQUEST,
    Arc::new(move |ctx: ResponderContext| {
      Box::new(NotaryResponder::new(ctx.session, factory_service.clone())) as Box<dyn WorkflowLogic>
    }),
  )?;

  let restorer: Restorer = Arc::new(move |state: serde_json::Value| {
    let responder = NotaryResponder::restore(state, service.clone())?;
    Ok(Box::new(responder) as Box<dyn WorkflowLogic>)
  });
  catalog.register_core(NOTARY_RESPONDER, restorer);
  catalog.register_core(NOTARISATION_REQUEST, restorer_for::<NotaryClient>());
  Ok(())
}
