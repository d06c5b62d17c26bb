//! Ledgerflow Config
//!
//! This crate contains the serializable node configuration consumed by the
//! workflow engine. Configuration is loaded from a JSON file at startup and
//! handed to the registry and state machine manager as plain values.
//!
//! ```json
//! {
//!   "platform_version": 4,
//!   "flow_overrides": [
//!     { "initiator": "Sender", "responder": "BaseResponder" }
//!   ],
//!   "state_machine": { "max_resident_instances": 10000 },
//!   "database": { "url": "sqlite://node.db" }
//! }
//! ```

mod error;
mod node;
mod overrides;

pub use error::ConfigError;
pub use node::{DatabaseConfig, NodeConfig, StateMachineConfig};
pub use overrides::FlowOverride;
