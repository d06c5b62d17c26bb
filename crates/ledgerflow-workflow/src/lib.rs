//! Ledgerflow Workflow
//!
//! This crate provides the shared data model of the workflow engine:
//!
//! - [`WorkflowType`] identifies a workflow implementation, its protocol
//!   version, the module that supplied it and its ancestry.
//! - [`WorkflowLogic`] is the resumable state machine a workflow implements.
//!   The engine calls [`WorkflowLogic::step`] with a [`Resume`] input and the
//!   workflow answers with the next [`Step`] (a suspension point or a result).
//! - [`SessionMessage`] and [`OutboundMessage`] are the wire-level records
//!   exchanged with counterparty nodes.
//!
//! Nothing here executes workflows; see `ledgerflow-engine` for that.

mod context;
mod failure;
mod ids;
mod logic;
mod message;
mod types;

pub use context::{InvocationContext, InvocationOrigin, WorkflowState};
pub use failure::WorkflowFailure;
pub use ids::{Party, SessionId, WorkflowId};
pub use logic::{
  Await, ExternalOperation, Resume, Step, StepContext, StepEffects, WorkflowLogic,
};
pub use message::{LedgerWrite, OutboundMessage, SessionMessage, SessionPayload};
pub use types::{DEFAULT_PROTOCOL_VERSION, ModuleRef, WorkflowType};
