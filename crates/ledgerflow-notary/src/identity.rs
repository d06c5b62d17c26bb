use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// The key a notary signs with. Clustered notaries are addressed by a
/// composite key that a threshold of member keys satisfies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotaryIdentity {
  Single { key: String },
  Composite { threshold: usize, keys: Vec<String> },
}

impl NotaryIdentity {
  pub fn single(key: impl Into<String>) -> Self {
    NotaryIdentity::Single { key: key.into() }
  }

  /// Whether signatures by `signers` are enough to speak for this identity.
  pub fn is_satisfied_by(&self, signers: &[String]) -> bool {
    match self {
      NotaryIdentity::Single { key } => signers.contains(key),
      NotaryIdentity::Composite { threshold, keys } => {
        let members: BTreeSet<&String> = keys.iter().collect();
        let signed = signers
          .iter()
          .filter(|signer| members.contains(signer))
          .collect::<BTreeSet<_>>()
          .len();
        *threshold > 0 && signed >= *threshold
      }
    }
  }
}
