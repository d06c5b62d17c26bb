use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use ledgerflow_workflow::{ModuleRef, WorkflowLogic};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::error::RegistryError;

/// Rebuilds a workflow from the state its frame persisted.
pub type Restorer =
  Arc<dyn Fn(serde_json::Value) -> Result<Box<dyn WorkflowLogic>, serde_json::Error> + Send + Sync>;

/// A restorer for workflows whose whole state is their serde form.
pub fn restorer_for<T>() -> Restorer
where
  T: WorkflowLogic + DeserializeOwned + 'static,
{
  Arc::new(|state| {
    let logic: T = serde_json::from_value(state)?;
    Ok(Box::new(logic) as Box<dyn WorkflowLogic>)
  })
}

/// Static registry of the workflow code compiled into this node.
#[derive(Default, Clone)]
pub struct WorkflowCatalog {
  modules: BTreeMap<String, ModuleRef>,
  restorers: HashMap<String, Restorer>,
}

impl WorkflowCatalog {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a platform workflow type, which belongs to no module.
  pub fn register_core(&mut self, workflow_type: impl Into<String>, restorer: Restorer) {
    let workflow_type = workflow_type.into();
    debug!(workflow_type = %workflow_type, "registered core workflow restorer");
    self.restorers.insert(workflow_type, restorer);
  }

  /// Install an application module together with the workflow types it contributes.
  pub fn install_module(
    &mut self,
    module: ModuleRef,
    workflows: impl IntoIterator<Item = (String, Restorer)>,
  ) -> Result<(), RegistryError> {
    if self.modules.contains_key(&module.name) {
      return Err(RegistryError::DuplicateModule { name: module.name });
    }

    let mut count = 0;
    for (workflow_type, restorer) in workflows {
      self.restorers.insert(workflow_type, restorer);
      count += 1;
    }

    info!(
      module = %module.name,
      hash = %module.hash,
      workflow_types = count,
      "installed workflow module"
    );
    self.modules.insert(module.name.clone(), module);
    Ok(())
  }

  /// Installed modules, ordered by name.
  pub fn installed_modules(&self) -> Vec<ModuleRef> {
    self.modules.values().cloned().collect()
  }

  pub fn contains(&self, workflow_type: &str) -> bool {
    self.restorers.contains_key(workflow_type)
  }

  /// Rebuild a workflow of the named type from its persisted state.
  pub fn restore(
    &self,
    workflow_type: &str,
    state: serde_json::Value,
  ) -> Result<Box<dyn WorkflowLogic>, RegistryError> {
    let restorer = self
      .restorers
      .get(workflow_type)
      .ok_or_else(|| RegistryError::UnknownWorkflowType {
        workflow_type: workflow_type.to_string(),
      })?;

    restorer(state).map_err(|source| RegistryError::Restore {
      workflow_type: workflow_type.to_string(),
      source,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use ledgerflow_workflow::{Resume, Step, StepContext, WorkflowFailure, WorkflowType};
  use serde::{Deserialize, Serialize};
  use serde_json::json;

  #[derive(Serialize, Deserialize)]
  struct Counter {
    count: u32,
  }

  impl WorkflowLogic for Counter {
    fn workflow_type(&self) -> WorkflowType {
      WorkflowType::new("Counter")
    }

    fn step(&mut self, _ctx: &mut StepContext<'_>, _resume: Resume) -> Result<Step, WorkflowFailure> {
      Ok(Step::Done(json!(self.count)))
    }

    fn snapshot(&self) -> Result<serde_json::Value, serde_json::Error> {
      serde_json::to_value(self)
    }
  }

  #[test]
  fn test_restore_round_trips_state() {
    let mut catalog = WorkflowCatalog::new();
    catalog.register_core("Counter", restorer_for::<Counter>());

    let restored = catalog.restore("Counter", json!({ "count": 3 })).unwrap();
    assert_eq!(restored.snapshot().unwrap(), json!({ "count": 3 }));
  }

  #[test]
  fn test_restore_unknown_type() {
    let catalog = WorkflowCatalog::new();
    let result = catalog.restore("Missing", json!({}));
    assert!(matches!(result, Err(RegistryError::UnknownWorkflowType { .. })));
  }

  #[test]
  fn test_restore_bad_state() {
    let mut catalog = WorkflowCatalog::new();
    catalog.register_core("Counter", restorer_for::<Counter>());

    let result = catalog.restore("Counter", json!({ "count": "three" }));
    assert!(matches!(result, Err(RegistryError::Restore { .. })));
  }

  #[test]
  fn test_duplicate_module_rejected() {
    let mut catalog = WorkflowCatalog::new();
    let module = ModuleRef::new("acme/trade", "sha256:01");

    catalog
      .install_module(module.clone(), vec![("Counter".to_string(), restorer_for::<Counter>())])
      .unwrap();
    let result = catalog.install_module(ModuleRef::new("acme/trade", "sha256:02"), vec![]);

    assert!(matches!(result, Err(RegistryError::DuplicateModule { name }) if name == "acme/trade"));
    assert_eq!(catalog.installed_modules(), vec![module]);
    assert!(catalog.contains("Counter"));
  }
}
