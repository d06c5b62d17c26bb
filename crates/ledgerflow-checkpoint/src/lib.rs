//! Ledgerflow Checkpoint
//!
//! A [`Checkpoint`] is the durable continuation of one workflow instance: its
//! call stack of [`Frame`]s, its open sessions with any messages that arrived
//! before the workflow asked for them, and the await it is suspended on.
//!
//! [`encode`] and [`decode`] turn a checkpoint into the opaque bytes the store
//! keeps. Before any checkpoint is resumed after a restart, the
//! [`CheckpointCompatibilityVerifier`] checks the whole persisted set against
//! the code that is installed now.

mod codec;
mod error;
mod record;
mod verifier;

pub use codec::{decode, encode};
pub use error::{CheckpointIncompatible, DecodeError};
pub use record::{
  CHECKPOINT_FORMAT_VERSION, Checkpoint, CheckpointStatus, Frame, SessionRecord,
};
pub use verifier::CheckpointCompatibilityVerifier;
