//! Field specifications describing a script's configuration surface.
//!
//! A renderer (form, CLI prompt) only needs these to collect values:
//!
//! ```json
//! {
//!   "type": "multiselect",
//!   "name": "targetBundles",
//!   "label": "Bundles to remove",
//!   "required": true,
//!   "loads_options": true,
//!   "reload_on": ["bundlesPath"]
//! }
//! ```

use serde::{Deserialize, Serialize};

/// The kind of input a field is rendered as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
  Text,
  Number,
  Checkbox,
  Select,
  Multiselect,
  Textarea,
  /// Triggers a script action (e.g. reloading reference data) instead of holding a value.
  Button,
}

/// One selectable option of a select/multiselect field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldOption {
  pub value: String,
  pub label: String,
}

impl FieldOption {
  pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
    Self {
      value: value.into(),
      label: label.into(),
    }
  }
}

/// A single configuration field exposed by a script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
  #[serde(rename = "type")]
  pub kind: FieldKind,
  pub name: String,
  pub label: String,
  #[serde(default)]
  pub required: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub default: Option<serde_json::Value>,
  /// Static options.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub options: Vec<FieldOption>,
  /// Options are produced at runtime by the script's `load_options`.
  #[serde(default)]
  pub loads_options: bool,
  /// Names of fields whose change should trigger an option reload.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub reload_on: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub placeholder: Option<String>,
}

impl FieldSpec {
  pub fn new(kind: FieldKind, name: impl Into<String>, label: impl Into<String>) -> Self {
    Self {
      kind,
      name: name.into(),
      label: label.into(),
      required: false,
      default: None,
      options: Vec::new(),
      loads_options: false,
      reload_on: Vec::new(),
      placeholder: None,
    }
  }

  pub fn required(mut self) -> Self {
    self.required = true;
    self
  }

  pub fn with_default(mut self, value: impl Into<serde_json::Value>) -> Self {
    self.default = Some(value.into());
    self
  }

  pub fn with_options(mut self, options: Vec<FieldOption>) -> Self {
    self.options = options;
    self
  }

  /// Mark the field as having runtime-loaded options, reloaded when any of
  /// `reload_on` changes.
  pub fn loads_options(mut self, reload_on: &[&str]) -> Self {
    self.loads_options = true;
    self.reload_on = reload_on.iter().map(|s| s.to_string()).collect();
    self
  }

  pub fn with_placeholder(mut self, placeholder: impl Into<String>) -> Self {
    self.placeholder = Some(placeholder.into());
    self
  }

  /// Whether this field carries a value (buttons do not).
  pub fn holds_value(&self) -> bool {
    self.kind != FieldKind::Button
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_serializes_kind_as_type() {
    let field = FieldSpec::new(FieldKind::Multiselect, "targetBundles", "Bundles")
      .required()
      .loads_options(&["bundlesPath"]);

    let json = serde_json::to_value(&field).unwrap();
    assert_eq!(json["type"], "multiselect");
    assert_eq!(json["required"], true);
    assert_eq!(json["reload_on"][0], "bundlesPath");
    assert!(json.get("options").is_none());
  }

  #[test]
  fn test_deserializes_with_defaults() {
    let field: FieldSpec = serde_json::from_value(serde_json::json!({
      "type": "number",
      "name": "limit",
      "label": "Limit",
      "default": 0
    }))
    .unwrap();

    assert_eq!(field.kind, FieldKind::Number);
    assert!(!field.required);
    assert!(!field.loads_options);
    assert_eq!(field.default, Some(serde_json::json!(0)));
  }

  #[test]
  fn test_button_holds_no_value() {
    assert!(!FieldSpec::new(FieldKind::Button, "refresh", "Refresh").holds_value());
    assert!(FieldSpec::new(FieldKind::Checkbox, "stopOnError", "Stop").holds_value());
  }
}
