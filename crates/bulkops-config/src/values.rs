//! Values collected for a script's fields.
//!
//! Values arrive either as JSON (numbers, booleans, arrays) or as plain
//! strings from the command line, so every accessor is loose about the
//! representation it accepts.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ConfigError;
use crate::field::FieldSpec;

/// Field values keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScriptValues(Map<String, Value>);

impl ScriptValues {
  pub fn new() -> Self {
    Self(Map::new())
  }

  /// Set a value, returning `self` for chaining.
  pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
    self.set(name, value);
    self
  }

  pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
    self.0.insert(name.into(), value.into());
  }

  pub fn get(&self, name: &str) -> Option<&Value> {
    self.0.get(name)
  }

  /// Fill every absent or empty field that declares a default.
  pub fn with_defaults(mut self, fields: &[FieldSpec]) -> Self {
    for field in fields {
      if let Some(default) = &field.default
        && self.0.get(&field.name).is_none_or(is_empty)
      {
        self.0.insert(field.name.clone(), default.clone());
      }
    }
    self
  }

  /// Check that every required field has a non-empty value.
  pub fn validate(&self, fields: &[FieldSpec]) -> Result<(), ConfigError> {
    for field in fields.iter().filter(|f| f.required && f.holds_value()) {
      if self.0.get(&field.name).is_none_or(is_empty) {
        return Err(ConfigError::MissingField {
          name: field.name.clone(),
          label: field.label.clone(),
        });
      }
    }
    Ok(())
  }

  /// A trimmed string value, empty when absent.
  pub fn text(&self, name: &str) -> String {
    match self.0.get(name) {
      Some(Value::String(s)) => s.trim().to_string(),
      Some(Value::Number(n)) => n.to_string(),
      Some(Value::Bool(b)) => b.to_string(),
      _ => String::new(),
    }
  }

  /// A trimmed string value, or `default` when absent or blank.
  pub fn text_or(&self, name: &str, default: &str) -> String {
    let value = self.text(name);
    if value.is_empty() {
      default.to_string()
    } else {
      value
    }
  }

  /// A non-negative integer, or `default` when absent or blank.
  pub fn u64_or(&self, name: &str, default: u64) -> Result<u64, ConfigError> {
    match self.0.get(name) {
      None | Some(Value::Null) => Ok(default),
      Some(Value::Number(n)) => n
        .as_u64()
        .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
        .ok_or_else(|| ConfigError::InvalidField {
          name: name.to_string(),
          message: format!("expected a non-negative number, got {n}"),
        }),
      Some(Value::String(s)) if s.trim().is_empty() => Ok(default),
      Some(Value::String(s)) => s
        .trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::InvalidField {
          name: name.to_string(),
          message: format!("expected a non-negative number, got '{}'", s.trim()),
        }),
      Some(other) => Err(ConfigError::InvalidField {
        name: name.to_string(),
        message: format!("expected a number, got {other}"),
      }),
    }
  }

  /// A checkbox value. Accepts booleans, numbers and the usual truthy strings.
  pub fn flag_or(&self, name: &str, default: bool) -> bool {
    match self.0.get(name) {
      Some(Value::Bool(b)) => *b,
      Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
      Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
        "" => default,
        "true" | "1" | "yes" | "on" => true,
        _ => false,
      },
      _ => default,
    }
  }

  /// A single id (select field). Blank or non-numeric values yield `None`.
  pub fn id(&self, name: &str) -> Option<i64> {
    match self.0.get(name) {
      Some(Value::Number(n)) => n.as_i64(),
      Some(Value::String(s)) => s.trim().parse().ok(),
      _ => None,
    }
  }

  /// An id list (multiselect field), de-duplicated and sorted ascending.
  ///
  /// Accepts a JSON array of numbers/strings or a single string of ids
  /// separated by commas and/or whitespace. Unparseable entries are dropped.
  pub fn ids(&self, name: &str) -> BTreeSet<i64> {
    match self.0.get(name) {
      Some(Value::Array(items)) => items
        .iter()
        .filter_map(|v| match v {
          Value::Number(n) => n.as_i64(),
          Value::String(s) => s.trim().parse().ok(),
          _ => None,
        })
        .collect(),
      Some(Value::String(s)) => parse_id_list(s),
      Some(Value::Number(n)) => n.as_i64().into_iter().collect(),
      _ => BTreeSet::new(),
    }
  }
}

/// Split `"1, 2 3,,4"` into a sorted, de-duplicated id set.
pub fn parse_id_list(input: &str) -> BTreeSet<i64> {
  input
    .split(|c: char| c == ',' || c.is_whitespace())
    .filter(|s| !s.is_empty())
    .filter_map(|s| s.parse().ok())
    .collect()
}

fn is_empty(value: &Value) -> bool {
  match value {
    Value::Null => true,
    Value::String(s) => s.trim().is_empty(),
    Value::Array(items) => items.is_empty(),
    _ => false,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::field::FieldKind;
  use serde_json::json;

  fn create_test_fields() -> Vec<FieldSpec> {
    vec![
      FieldSpec::new(FieldKind::Multiselect, "targets", "Targets").required(),
      FieldSpec::new(FieldKind::Number, "pageSize", "Page size").with_default(50),
      FieldSpec::new(FieldKind::Button, "refresh", "Refresh").required(),
    ]
  }

  #[test]
  fn test_values_deserialize_from_json_object() {
    let values: ScriptValues =
      serde_json::from_value(json!({"groupId": "40", "targetBundles": [5, 9]})).unwrap();

    assert_eq!(values.id("groupId"), Some(40));
    assert_eq!(values.ids("targetBundles").into_iter().collect::<Vec<_>>(), vec![5, 9]);
    assert_eq!(serde_json::to_value(&values).unwrap()["groupId"], json!("40"));
  }

  #[test]
  fn test_parse_id_list() {
    let ids = parse_id_list(" 9, 3 3,,x 5\n");
    assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec![3, 5, 9]);
  }

  #[test]
  fn test_ids_from_array_and_string() {
    let values = ScriptValues::new()
      .with("a", json!([7, "2", "nope", 2]))
      .with("b", "4,1");

    assert_eq!(values.ids("a").into_iter().collect::<Vec<_>>(), vec![2, 7]);
    assert_eq!(values.ids("b").into_iter().collect::<Vec<_>>(), vec![1, 4]);
    assert!(values.ids("missing").is_empty());
  }

  #[test]
  fn test_validate_reports_missing_required_field() {
    let fields = create_test_fields();
    let values = ScriptValues::new().with("targets", "  ");

    let err = values.validate(&fields).unwrap_err();
    assert!(matches!(err, ConfigError::MissingField { ref name, .. } if name == "targets"));
    assert_eq!(err.to_string(), "field required: Targets");
  }

  #[test]
  fn test_validate_ignores_buttons() {
    let fields = create_test_fields();
    let values = ScriptValues::new().with("targets", json!([1]));
    assert!(values.validate(&fields).is_ok());
  }

  #[test]
  fn test_with_defaults_fills_blank_values() {
    let fields = create_test_fields();
    let values = ScriptValues::new().with("pageSize", "").with_defaults(&fields);
    assert_eq!(values.u64_or("pageSize", 0).unwrap(), 50);
  }

  #[test]
  fn test_u64_rejects_garbage() {
    let values = ScriptValues::new().with("limit", "ten");
    assert!(matches!(
      values.u64_or("limit", 0),
      Err(ConfigError::InvalidField { .. })
    ));
    assert_eq!(values.u64_or("other", 3).unwrap(), 3);
  }

  #[test]
  fn test_flags() {
    let values = ScriptValues::new()
      .with("a", true)
      .with("b", "yes")
      .with("c", "false")
      .with("d", "");

    assert!(values.flag_or("a", false));
    assert!(values.flag_or("b", false));
    assert!(!values.flag_or("c", true));
    assert!(values.flag_or("d", true));
    assert!(!values.flag_or("missing", false));
  }
}
