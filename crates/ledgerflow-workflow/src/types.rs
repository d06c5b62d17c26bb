use std::fmt;

use serde::{Deserialize, Serialize};

/// An installable application module a workflow type was supplied by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleRef {
  /// Module name, e.g. "acme/trade-finance".
  pub name: String,
  /// Content hash of the module build, e.g. "sha256:ab12...".
  pub hash: String,
}

impl ModuleRef {
  pub fn new(name: impl Into<String>, hash: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      hash: hash.into(),
    }
  }
}

/// Identity of a workflow implementation.
///
/// `lineage` names the ancestors of this type, nearest first, excluding the
/// common workflow root. A type with an empty lineage derives directly from
/// the root and has depth 1.
/// Protocol version of a type that declares none, and of ad-hoc responders.
pub const DEFAULT_PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowType {
  pub name: String,
  /// Declared protocol version, exchanged when a session is initiated.
  pub version: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub module: Option<ModuleRef>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub lineage: Vec<String>,
}

impl WorkflowType {
  /// A platform type at [`DEFAULT_PROTOCOL_VERSION`] with no ancestors.
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      version: DEFAULT_PROTOCOL_VERSION,
      module: None,
      lineage: Vec::new(),
    }
  }

  pub fn with_version(mut self, version: u32) -> Self {
    self.version = version;
    self
  }

  pub fn in_module(mut self, module: ModuleRef) -> Self {
    self.module = Some(module);
    self
  }

  /// Declare `parent` as the direct supertype of this type.
  pub fn extending(mut self, parent: &WorkflowType) -> Self {
    let mut lineage = Vec::with_capacity(parent.lineage.len() + 1);
    lineage.push(parent.name.clone());
    lineage.extend(parent.lineage.iter().cloned());
    self.lineage = lineage;
    self
  }

  /// Number of inheritance steps from this type up to the workflow root.
  pub fn depth(&self) -> u32 {
    self.lineage.len() as u32 + 1
  }

  pub fn is_subtype_of(&self, other: &str) -> bool {
    self.lineage.iter().any(|ancestor| ancestor == other)
  }
}

impl fmt::Display for WorkflowType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.name)
  }
}
