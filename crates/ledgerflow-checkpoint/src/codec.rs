use serde::Deserialize;

use crate::error::DecodeError;
use crate::record::{CHECKPOINT_FORMAT_VERSION, Checkpoint};

#[derive(Deserialize)]
struct Envelope {
  format_version: u32,
}

/// Serialize a checkpoint to the bytes the store keeps.
pub fn encode(checkpoint: &Checkpoint) -> Result<Vec<u8>, serde_json::Error> {
  serde_json::to_vec(checkpoint)
}

/// Parse stored checkpoint bytes.
///
/// The format version is checked before the body, so a record written by a
/// newer layout fails as unsupported rather than as a field mismatch.
pub fn decode(bytes: &[u8]) -> Result<Checkpoint, DecodeError> {
  let envelope: Envelope = serde_json::from_slice(bytes)?;
  if envelope.format_version != CHECKPOINT_FORMAT_VERSION {
    return Err(DecodeError::UnsupportedFormat {
      found: envelope.format_version,
      supported: CHECKPOINT_FORMAT_VERSION,
    });
  }
  Ok(serde_json::from_slice(bytes)?)
}
