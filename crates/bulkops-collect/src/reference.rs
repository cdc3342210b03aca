//! Reference data (bundles, groups, locations).

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::Value;

/// One entry of a reference catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferenceEntry {
  pub id: i64,
  pub name: String,
  pub raw: Value,
}

impl ReferenceEntry {
  /// Build from a listing record. `name_keys` are tried in order. Records
  /// without a numeric id are rejected.
  pub fn from_value(raw: Value, name_keys: &[&str]) -> Option<Self> {
    let id = match raw.get("id")? {
      Value::Number(n) => n.as_i64()?,
      Value::String(s) => s.trim().parse().ok()?,
      _ => return None,
    };

    let name = name_keys
      .iter()
      .find_map(|key| raw.get(*key).and_then(Value::as_str).filter(|s| !s.trim().is_empty()))
      .unwrap_or_default()
      .to_string();

    Some(Self { id, name, raw })
  }

  /// `"Name (#id)"`, or `"#id"` when unnamed.
  pub fn label(&self) -> String {
    if self.name.is_empty() {
      format!("#{}", self.id)
    } else {
      format!("{} (#{})", self.name, self.id)
    }
  }
}

/// A loaded reference catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReferenceSet {
  entries: Vec<ReferenceEntry>,
}

impl ReferenceSet {
  pub fn new(entries: Vec<ReferenceEntry>) -> Self {
    Self { entries }
  }

  /// Build from raw listing records, skipping ones without an id.
  pub fn from_records(records: Vec<Value>, name_keys: &[&str]) -> Self {
    Self::new(
      records
        .into_iter()
        .filter_map(|record| ReferenceEntry::from_value(record, name_keys))
        .collect(),
    )
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &ReferenceEntry> {
    self.entries.iter()
  }

  pub fn get(&self, id: i64) -> Option<&ReferenceEntry> {
    self.entries.iter().find(|e| e.id == id)
  }

  /// Label for `id`; unknown ids are shown as `#id`.
  pub fn label(&self, id: i64) -> String {
    self
      .get(id)
      .map(ReferenceEntry::label)
      .unwrap_or_else(|| format!("#{}", id))
  }

  pub fn labels(&self, ids: &BTreeSet<i64>) -> Vec<String> {
    ids.iter().map(|id| self.label(*id)).collect()
  }
}
