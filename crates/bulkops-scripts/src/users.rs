//! Reading user records.

use bulkops_collect::{ListShape, Listing};
use bulkops_engine::RelationSet;
use bulkops_transport::ApiClient;
use serde_json::Value;

/// The user listing at `path`. Its total may also sit under
/// `summarization.all_users`.
pub(crate) fn listing<'a>(client: &'a ApiClient, path: &str) -> Listing<'a> {
  Listing::new(
    client,
    path,
    ListShape::new("users").with_total_pointer("/summarization/all_users"),
  )
}

/// A numeric id from a number or a numeric string.
pub(crate) fn numeric_id(value: &Value) -> Option<i64> {
  match value {
    Value::Number(n) => n
      .as_i64()
      .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
    Value::String(s) => s.trim().parse().ok(),
    _ => None,
  }
}

/// The user's id as text, for labels and URL templates.
pub(crate) fn user_id(user: &Value) -> Option<String> {
  match user.get("id")? {
    Value::Number(n) => Some(n.to_string()),
    Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
    _ => None,
  }
}

/// `"First Last"`, falling back to the email.
pub(crate) fn display_name(user: &Value) -> String {
  let part = |key: &str| user.get(key).and_then(Value::as_str).unwrap_or_default();
  let name = format!("{} {}", part("first_name"), part("last_name"))
    .trim()
    .to_string();
  if name.is_empty() {
    part("email").to_string()
  } else {
    name
  }
}

/// Bundle ids from `permission_bundles` (ids or `{id}` objects) plus
/// `permission_bundle.id`.
pub(crate) fn bundle_ids(user: &Value) -> RelationSet {
  let listed = user
    .get("permission_bundles")
    .and_then(Value::as_array)
    .into_iter()
    .flatten()
    .filter_map(|entry| match entry {
      Value::Object(_) => entry.get("id").and_then(numeric_id),
      other => numeric_id(other),
    });
  let single = user.pointer("/permission_bundle/id").and_then(numeric_id);

  listed.chain(single).collect()
}

/// Location ids from `location_ids` and `locations[].id`.
pub(crate) fn location_ids(user: &Value) -> RelationSet {
  let flat = user
    .get("location_ids")
    .and_then(Value::as_array)
    .into_iter()
    .flatten()
    .filter_map(numeric_id);
  let nested = ids_of_objects(user, "locations");

  flat.chain(nested).collect()
}

/// Group ids from `user_groups[].id`.
pub(crate) fn group_ids(user: &Value) -> RelationSet {
  ids_of_objects(user, "user_groups").collect()
}

fn ids_of_objects<'a>(user: &'a Value, key: &str) -> impl Iterator<Item = i64> + 'a {
  user
    .get(key)
    .and_then(Value::as_array)
    .into_iter()
    .flatten()
    .filter_map(|entry| entry.get("id").and_then(numeric_id))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn set(ids: &[i64]) -> RelationSet {
    ids.iter().copied().collect()
  }

  #[test]
  fn test_bundle_ids_accept_every_shape() {
    let user = json!({
      "permission_bundles": [5, "9", {"id": 3}, {"id": "11"}, null, "abc", {"name": "no id"}],
      "permission_bundle": {"id": 5}
    });
    assert_eq!(bundle_ids(&user), set(&[3, 5, 9, 11]));
    assert!(bundle_ids(&json!({"id": 1})).is_empty());
  }

  #[test]
  fn test_location_and_group_ids() {
    let user = json!({
      "location_ids": [4, "2"],
      "locations": [{"id": 2}, {"id": 8}, {"name": "x"}],
      "user_groups": [{"id": 10, "name": "Ops"}, {"id": "12"}, {}]
    });
    assert_eq!(location_ids(&user), set(&[2, 4, 8]));
    assert_eq!(group_ids(&user), set(&[10, 12]));
  }

  #[test]
  fn test_names_and_ids() {
    let user = json!({"id": 42, "first_name": "Ada", "last_name": "Lovelace"});
    assert_eq!(user_id(&user).as_deref(), Some("42"));
    assert_eq!(display_name(&user), "Ada Lovelace");

    let user = json!({"id": " u-7 ", "email": "ops@example.com"});
    assert_eq!(user_id(&user).as_deref(), Some("u-7"));
    assert_eq!(display_name(&user), "ops@example.com");

    assert_eq!(user_id(&json!({"id": null})), None);
  }
}
