//! Script lookup by id.

use std::sync::Arc;

use tracing::warn;

use crate::script::Script;

/// Registered scripts in registration order.
///
/// Ids are unique: when two scripts share an id, the first registration
/// wins and the later one is dropped with a warning.
#[derive(Clone, Default)]
pub struct ScriptRegistry {
  scripts: Vec<Arc<dyn Script>>,
}

impl ScriptRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Returns false when the id was already taken.
  pub fn register(&mut self, script: Arc<dyn Script>) -> bool {
    if self.get(script.id()).is_some() {
      warn!(script_id = script.id(), name = script.name(), "duplicate script id ignored");
      return false;
    }
    self.scripts.push(script);
    true
  }

  pub fn register_all(&mut self, scripts: impl IntoIterator<Item = Arc<dyn Script>>) {
    for script in scripts {
      self.register(script);
    }
  }

  pub fn get(&self, id: &str) -> Option<Arc<dyn Script>> {
    self.scripts.iter().find(|s| s.id() == id).cloned()
  }

  pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Script>> {
    self.scripts.iter()
  }

  pub fn len(&self) -> usize {
    self.scripts.len()
  }

  pub fn is_empty(&self) -> bool {
    self.scripts.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::ScriptError;
  use crate::script::{Plan, PlanItem, ScriptContext};
  use async_trait::async_trait;
  use bulkops_config::{FieldSpec, ScriptValues};

  struct NamedScript {
    id: &'static str,
    name: &'static str,
  }

  #[async_trait]
  impl Script for NamedScript {
    fn id(&self) -> &str {
      self.id
    }

    fn name(&self) -> &str {
      self.name
    }

    fn fields(&self) -> Vec<FieldSpec> {
      Vec::new()
    }

    async fn preview(&self, _: &ScriptValues, _: &ScriptContext) -> Result<Plan, ScriptError> {
      Ok(Plan::default())
    }

    async fn plan(&self, _: &ScriptValues, _: &ScriptContext) -> Result<Plan, ScriptError> {
      Ok(Plan::default())
    }

    async fn execute(
      &self,
      _: &PlanItem,
      _: &ScriptValues,
      _: &ScriptContext,
    ) -> Result<(), ScriptError> {
      Ok(())
    }
  }

  fn create_test_script(id: &'static str, name: &'static str) -> Arc<dyn Script> {
    Arc::new(NamedScript { id, name })
  }

  #[test]
  fn test_first_registration_wins() {
    let mut registry = ScriptRegistry::new();
    assert!(registry.register(create_test_script("a", "first")));
    assert!(!registry.register(create_test_script("a", "second")));
    registry.register(create_test_script("b", "other"));

    assert_eq!(registry.len(), 2);
    assert_eq!(registry.get("a").map(|s| s.name().to_string()), Some("first".into()));
    assert!(registry.get("missing").is_none());
  }

  #[test]
  fn test_iter_keeps_registration_order() {
    let mut registry = ScriptRegistry::new();
    registry.register_all([
      create_test_script("z", "z"),
      create_test_script("a", "a"),
      create_test_script("m", "m"),
    ]);

    let ids: Vec<_> = registry.iter().map(|s| s.id().to_string()).collect();
    assert_eq!(ids, ["z", "a", "m"]);
  }
}
