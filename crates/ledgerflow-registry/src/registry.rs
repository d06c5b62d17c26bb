use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use ledgerflow_config::FlowOverride;
use ledgerflow_workflow::{
  DEFAULT_PROTOCOL_VERSION, Party, SessionId, WorkflowLogic, WorkflowType,
};
use tracing::{debug, info, warn};

use crate::error::RegistryError;

/// What a responder factory is told about the session it answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponderContext {
  pub counterparty: Party,
  /// Our end of the session, already bound to the initiator's.
  pub session: SessionId,
  /// Protocol version the initiator declared. For core responders this is
  /// the initiating node's platform version.
  pub initiator_version: u32,
}

/// Builds the responder workflow for a new incoming session.
pub type ResponderFactory = Arc<dyn Fn(ResponderContext) -> Box<dyn WorkflowLogic> + Send + Sync>;

/// Rank of a responder candidate. Higher wins.
///
/// Ad-hoc candidates (no responder type) outrank overrides, which outrank
/// every depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Weight {
  /// Inheritance depth of the responder type below the workflow root.
  Depth(u32),
  /// Named by a configured flow override.
  Override,
  /// Registered without a responder type.
  AdHoc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponderKind {
  /// Platform responder, versioned by the node's platform version.
  Core,
  /// Responder supplied by an application module.
  Application,
}

/// The responder chosen for an initiating type.
#[derive(Clone)]
pub struct ResolvedResponder {
  pub kind: ResponderKind,
  pub responder_type: Option<WorkflowType>,
  /// Protocol version advertised back to the initiator.
  pub protocol_version: u32,
  pub factory: ResponderFactory,
}

impl fmt::Debug for ResolvedResponder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ResolvedResponder")
      .field("kind", &self.kind)
      .field("responder_type", &self.responder_type)
      .field("protocol_version", &self.protocol_version)
      .finish_non_exhaustive()
  }
}

struct Candidate {
  responder: Option<WorkflowType>,
  factory: ResponderFactory,
  weight: Weight,
}

impl Candidate {
  fn label(&self) -> String {
    match &self.responder {
      Some(responder) => responder.name.clone(),
      None => "<ad-hoc>".to_string(),
    }
  }
}

enum Registration {
  Core(ResponderFactory),
  Application(Vec<Candidate>),
}

/// Maps initiating workflow types to the responders that answer them.
pub struct WorkflowRegistry {
  platform_version: u32,
  overrides: HashMap<String, String>,
  registrations: HashMap<String, Registration>,
}

impl WorkflowRegistry {
  /// Create an empty registry for a node running `platform_version`, with
  /// the node's configured overrides.
  pub fn new(platform_version: u32, overrides: &[FlowOverride]) -> Self {
    Self {
      platform_version,
      overrides: overrides
        .iter()
        .map(|o| (o.initiator.clone(), o.responder.clone()))
        .collect(),
      registrations: HashMap::new(),
    }
  }

  pub fn platform_version(&self) -> u32 {
    self.platform_version
  }

  /// Add an application responder candidate for `initiating_type`.
  ///
  /// `responder` is `None` for ad-hoc registrations that have no workflow
  /// type of their own; those win over every typed candidate.
  pub fn register_responder(
    &mut self,
    initiating_type: impl Into<String>,
    responder: Option<WorkflowType>,
    factory: ResponderFactory,
  ) -> Result<(), RegistryError> {
    let initiating_type = initiating_type.into();
    let weight = self.weight_of(&initiating_type, responder.as_ref());

    let registration = self
      .registrations
      .entry(initiating_type.clone())
      .or_insert_with(|| Registration::Application(Vec::new()));

    let candidates = match registration {
      Registration::Core(_) => {
        return Err(RegistryError::CoreResponderInstalled { initiating_type });
      }
      Registration::Application(candidates) => candidates,
    };

    let candidate = Candidate {
      responder,
      factory,
      weight,
    };
    let position = candidates
      .iter()
      .position(|existing| existing.weight < candidate.weight)
      .unwrap_or(candidates.len());

    info!(
      initiating_type = %initiating_type,
      responder = %candidate.label(),
      weight = ?weight,
      "registered responder"
    );
    candidates.insert(position, candidate);

    if candidates.len() > 1 {
      info!(
        initiating_type = %initiating_type,
        winner = %candidates[0].label(),
        candidates = candidates.len(),
        "multiple responders registered, most specific wins"
      );
    }

    Ok(())
  }

  /// Register the platform responder for `initiating_type`. Its protocol
  /// version is the node's platform version. A later core registration for
  /// the same type replaces an earlier one.
  pub fn register_core_responder(
    &mut self,
    initiating_type: impl Into<String>,
    factory: ResponderFactory,
  ) -> Result<(), RegistryError> {
    let initiating_type = initiating_type.into();

    match self.registrations.get(&initiating_type) {
      Some(Registration::Application(candidates)) if !candidates.is_empty() => {
        return Err(RegistryError::CoreResponderInstalled { initiating_type });
      }
      Some(Registration::Core(_)) => {
        warn!(initiating_type = %initiating_type, "replacing core responder");
      }
      _ => {
        debug!(initiating_type = %initiating_type, "installed core responder");
      }
    }

    self
      .registrations
      .insert(initiating_type, Registration::Core(factory));
    Ok(())
  }

  /// The winning responder for `initiating_type`, if any is registered.
  pub fn resolve_responder(&self, initiating_type: &str) -> Option<ResolvedResponder> {
    match self.registrations.get(initiating_type)? {
      Registration::Core(factory) => Some(ResolvedResponder {
        kind: ResponderKind::Core,
        responder_type: None,
        protocol_version: self.platform_version,
        factory: factory.clone(),
      }),
      Registration::Application(candidates) => {
        let top = candidates.first()?;
        Some(ResolvedResponder {
          kind: ResponderKind::Application,
          responder_type: top.responder.clone(),
          // Ad-hoc responders have no type to declare a version.
          protocol_version: top
            .responder
            .as_ref()
            .map_or(DEFAULT_PROTOCOL_VERSION, |r| r.version),
          factory: top.factory.clone(),
        })
      }
    }
  }

  /// Check that every initiating type with several candidates has exactly
  /// one at the top weight.
  pub fn validate_registrations(&self) -> Result<(), RegistryError> {
    let mut initiating_types: Vec<&String> = self.registrations.keys().collect();
    initiating_types.sort();

    for initiating_type in initiating_types {
      let Some(Registration::Application(candidates)) = self.registrations.get(initiating_type)
      else {
        continue;
      };
      if candidates.len() < 2 {
        continue;
      }

      let mut ranked: Vec<(Weight, String)> = candidates
        .iter()
        .map(|c| (self.weight_of(initiating_type, c.responder.as_ref()), c.label()))
        .collect();
      ranked.sort_by(|a, b| b.0.cmp(&a.0));

      let top = ranked[0].0;
      let tied: Vec<String> = ranked
        .into_iter()
        .take_while(|(weight, _)| *weight == top)
        .map(|(_, label)| label)
        .collect();

      if tied.len() > 1 {
        return Err(RegistryError::AmbiguousResponders {
          initiating_type: initiating_type.clone(),
          responders: tied,
        });
      }
    }

    Ok(())
  }

  /// Initiating types with at least one responder, sorted.
  pub fn initiating_types(&self) -> Vec<String> {
    let mut types: Vec<String> = self.registrations.keys().cloned().collect();
    types.sort();
    types
  }

  fn weight_of(&self, initiating_type: &str, responder: Option<&WorkflowType>) -> Weight {
    match responder {
      None => Weight::AdHoc,
      Some(responder)
        if self
          .overrides
          .get(initiating_type)
          .is_some_and(|name| *name == responder.name) =>
      {
        Weight::Override
      }
      Some(responder) => Weight::Depth(responder.depth()),
    }
  }
}
