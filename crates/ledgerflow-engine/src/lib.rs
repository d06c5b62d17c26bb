//! Ledgerflow Workflow Engine
//!
//! This crate runs workflow instances as checkpointed, resumable state
//! machines and connects them to their counterparties.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ManagerHandle                          │
//! │  - start_workflow / deliver / track / kill / stop           │
//! │  - posts events to the manager's mailbox                    │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 WorkflowStateMachineManager                 │
//! │  - one task owns every live instance                        │
//! │  - steps workflows, commits checkpoints with their effects  │
//! │  - routes session messages, spawns responders               │
//! │  - evicts idle instances, rehydrates them from the store    │
//! └─────────────────────────────────────────────────────────────┘
//!              │                                 │
//!              ▼                                 ▼
//! ┌───────────────────────────┐   ┌─────────────────────────────┐
//! │      CheckpointStore      │   │         Dispatcher          │
//! │  - checkpoint + outbox +  │   │  - sends committed outbox   │
//! │    ledger writes, atomic  │   │    messages in order        │
//! └───────────────────────────┘   └─────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let manager = WorkflowStateMachineManager::new(identity, &config, registry, catalog, store, transport);
//! let handle = manager.start().await?;
//!
//! let started = handle.start_workflow(Box::new(workflow), InvocationContext::rpc("ops"))?;
//! let value = started.result.wait().await?;
//!
//! handle.shutdown().await?;
//! ```

mod dispatcher;
mod error;
mod events;
mod handle;
mod instance;
mod manager;
mod transport;

pub use error::{ManagerError, StartupError, TransportError};
pub use events::{Change, InstanceSummary, Outcome};
pub use handle::{ManagerHandle, WorkflowHandle, WorkflowResult};
pub use manager::WorkflowStateMachineManager;
pub use transport::MessageTransport;
