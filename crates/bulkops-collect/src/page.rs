//! Pages and listing body shapes.

use serde_json::Value;

use crate::error::CollectError;

const DEFAULT_TOTAL_POINTERS: &[&str] = &["/pagination/total_records", "/pagination/total", "/total"];

/// One page of a listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
  pub items: Vec<T>,
  /// Offset of the next page, when the API says so explicitly.
  pub next_cursor: Option<u64>,
  /// Total record count, when the API reports it.
  pub total: Option<u64>,
}

impl<T> Page<T> {
  pub fn new(items: Vec<T>) -> Self {
    Self {
      items,
      next_cursor: None,
      total: None,
    }
  }

  pub fn with_cursor(mut self, next_cursor: Option<u64>) -> Self {
    self.next_cursor = next_cursor;
    self
  }

  pub fn with_total(mut self, total: Option<u64>) -> Self {
    self.total = total;
    self
  }
}

/// Where a listing body keeps its items, cursor and total.
///
/// Items come from `body[entity]`, else `body.items`, else the body itself
/// when it is a bare array. The cursor is `pagination.next_offset`. The total
/// is the first of the configured JSON pointers that holds a number.
#[derive(Debug, Clone, PartialEq)]
pub struct ListShape {
  entity: String,
  total_pointers: Vec<String>,
}

impl ListShape {
  pub fn new(entity: impl Into<String>) -> Self {
    Self {
      entity: entity.into(),
      total_pointers: DEFAULT_TOTAL_POINTERS.iter().map(|p| p.to_string()).collect(),
    }
  }

  /// Also look for the total at `pointer`, after the defaults.
  pub fn with_total_pointer(mut self, pointer: impl Into<String>) -> Self {
    self.total_pointers.push(pointer.into());
    self
  }

  pub fn entity(&self) -> &str {
    &self.entity
  }

  pub fn parse(&self, body: &Value) -> Result<Page<Value>, CollectError> {
    let items = match body {
      Value::Array(items) => items.clone(),
      Value::Object(map) => map
        .get(&self.entity)
        .and_then(Value::as_array)
        .or_else(|| map.get("items").and_then(Value::as_array))
        .cloned()
        .unwrap_or_default(),
      Value::Null => Vec::new(),
      other => {
        return Err(CollectError::InvalidBody {
          message: format!("expected a '{}' listing, got {}", self.entity, type_name(other)),
        });
      }
    };

    let next_cursor = body.pointer("/pagination/next_offset").and_then(as_offset);
    let total = self
      .total_pointers
      .iter()
      .find_map(|pointer| body.pointer(pointer).and_then(as_offset));

    Ok(Page {
      items,
      next_cursor,
      total,
    })
  }
}

fn as_offset(value: &Value) -> Option<u64> {
  match value {
    Value::Number(n) => n.as_u64(),
    Value::String(s) => s.trim().parse().ok(),
    _ => None,
  }
}

fn type_name(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "a boolean",
    Value::Number(_) => "a number",
    Value::String(_) => "text",
    Value::Array(_) => "an array",
    Value::Object(_) => "an object",
  }
}
