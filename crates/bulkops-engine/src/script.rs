//! The script contract.
//!
//! A script is a packaged bulk operation with three phases:
//!
//! 1. `preview`: read-only, may stop after a bounded sample
//! 2. `plan`: the exact item list `execute` will process
//! 3. `execute`: one mutation per plan item
//!
//! Scripts reach the remote API, the reference cache and the run's
//! cancellation token only through [`ScriptContext`].

use std::collections::BTreeSet;

use async_trait::async_trait;
use bulkops_collect::ReferenceCache;
use bulkops_config::{FieldOption, FieldSpec, ScriptValues};
use bulkops_transport::ApiClient;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::ScriptError;

/// How many items a preview shows.
pub const PREVIEW_LIMIT: usize = 50;

/// What a script gets to work with.
#[derive(Clone)]
pub struct ScriptContext {
  client: ApiClient,
  cache: ReferenceCache,
  cancel: CancellationToken,
}

impl ScriptContext {
  pub fn new(client: ApiClient, cache: ReferenceCache, cancel: CancellationToken) -> Self {
    Self {
      client,
      cache,
      cancel,
    }
  }

  pub fn client(&self) -> &ApiClient {
    &self.client
  }

  pub fn cache(&self) -> &ReferenceCache {
    &self.cache
  }

  pub fn cancel(&self) -> &CancellationToken {
    &self.cancel
  }
}

/// Human-readable before/after of one item.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChangeSummary {
  pub current: Vec<String>,
  pub next: Vec<String>,
  /// Why the record matched, when that is not obvious from the states.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub note: Option<String>,
}

/// One record whose relation set changes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MutationItem {
  pub id: String,
  pub display_name: String,
  pub current_state: BTreeSet<i64>,
  pub next_state: BTreeSet<i64>,
  pub summary: ChangeSummary,
  /// The listing record the item was built from.
  #[serde(skip)]
  pub record: serde_json::Value,
}

impl MutationItem {
  pub fn label(&self) -> String {
    if self.display_name.is_empty() {
      format!("#{}", self.id)
    } else {
      format!("{} (#{})", self.display_name, self.id)
    }
  }
}

/// Many records written with one call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchItem {
  pub ids: Vec<String>,
  pub members: Vec<MutationItem>,
}

/// A unit of work for the batch runner.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanItem {
  /// One call for one record.
  Record(MutationItem),
  /// One call carrying every matched record.
  Batch(BatchItem),
}

impl PlanItem {
  pub fn label(&self) -> String {
    match self {
      Self::Record(item) => item.label(),
      Self::Batch(batch) => format!("batch of {} records", batch.ids.len()),
    }
  }

  /// The records this item touches.
  pub fn records(&self) -> &[MutationItem] {
    match self {
      Self::Record(item) => std::slice::from_ref(item),
      Self::Batch(batch) => &batch.members,
    }
  }
}

/// The result of `preview` or `plan`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Plan {
  pub items: Vec<PlanItem>,
  /// Listing records examined.
  pub scanned: usize,
}

impl Plan {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  /// Records touched across all items.
  pub fn record_count(&self) -> usize {
    self.items.iter().map(|item| item.records().len()).sum()
  }
}

/// A bulk operation.
#[async_trait]
pub trait Script: Send + Sync {
  /// Stable identifier used for lookup.
  fn id(&self) -> &str;

  fn name(&self) -> &str;

  /// The configuration surface.
  fn fields(&self) -> Vec<FieldSpec>;

  /// Options for a field declared with `loads_options`.
  async fn load_options(
    &self,
    field: &str,
    values: &ScriptValues,
    ctx: &ScriptContext,
  ) -> Result<Vec<FieldOption>, ScriptError> {
    let _ = (field, values, ctx);
    Ok(Vec::new())
  }

  /// Reload any reference data the script caches.
  async fn refresh(&self, values: &ScriptValues, ctx: &ScriptContext) -> Result<(), ScriptError> {
    let _ = (values, ctx);
    Ok(())
  }

  /// Read-only look at what `plan` would produce.
  async fn preview(&self, values: &ScriptValues, ctx: &ScriptContext) -> Result<Plan, ScriptError>;

  /// The full list of items to execute.
  async fn plan(&self, values: &ScriptValues, ctx: &ScriptContext) -> Result<Plan, ScriptError>;

  /// Perform the mutation for one item. Returns
  /// [`ScriptError::StopOnError`] when the failure should end the run.
  async fn execute(
    &self,
    item: &PlanItem,
    values: &ScriptValues,
    ctx: &ScriptContext,
  ) -> Result<(), ScriptError>;
}

#[cfg(test)]
mod tests {
  use super::*;

  fn create_test_item(id: &str, name: &str) -> MutationItem {
    MutationItem {
      id: id.to_string(),
      display_name: name.to_string(),
      current_state: BTreeSet::from([1]),
      next_state: BTreeSet::from([2]),
      summary: ChangeSummary::default(),
      record: serde_json::Value::Null,
    }
  }

  #[test]
  fn test_labels() {
    assert_eq!(create_test_item("7", "Ada").label(), "Ada (#7)");
    assert_eq!(create_test_item("7", "").label(), "#7");

    let batch = PlanItem::Batch(BatchItem {
      ids: vec!["1".into(), "2".into()],
      members: vec![create_test_item("1", "a"), create_test_item("2", "b")],
    });
    assert_eq!(batch.label(), "batch of 2 records");
  }

  #[test]
  fn test_record_count_spans_batches() {
    let plan = Plan {
      items: vec![
        PlanItem::Record(create_test_item("1", "a")),
        PlanItem::Batch(BatchItem {
          ids: vec!["2".into(), "3".into()],
          members: vec![create_test_item("2", "b"), create_test_item("3", "c")],
        }),
      ],
      scanned: 10,
    };
    assert_eq!(plan.record_count(), 3);
  }

  #[test]
  fn test_plan_item_serializes_with_kind() {
    let json = serde_json::to_value(PlanItem::Record(create_test_item("1", "a"))).unwrap();
    assert_eq!(json["kind"], "record");
    assert_eq!(json["next_state"], serde_json::json!([2]));
    assert!(json.get("record").is_none());
  }
}
