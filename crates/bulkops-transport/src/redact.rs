//! Keeping credentials out of logs.

use std::collections::BTreeMap;

pub const REDACTED: &str = "«REDACTED_TOKEN»";

const SENSITIVE_HEADER_PARTS: &[&str] = &[
  "authorization",
  "api-key",
  "api_key",
  "api key",
  "apikey",
  "token",
  "secret",
];

/// Replace every occurrence of `token` in `text`.
pub fn redact(text: &str, token: Option<&str>) -> String {
  match token.map(str::trim).filter(|t| !t.is_empty()) {
    Some(token) => text.replace(token, REDACTED),
    None => text.to_string(),
  }
}

/// A copy of `headers` with credential-bearing values masked.
pub fn mask_headers(headers: &BTreeMap<String, String>) -> BTreeMap<String, String> {
  headers
    .iter()
    .map(|(name, value)| {
      let lower = name.to_ascii_lowercase();
      if SENSITIVE_HEADER_PARTS.iter().any(|part| lower.contains(part)) {
        (name.clone(), REDACTED.to_string())
      } else {
        (name.clone(), value.clone())
      }
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_redact_token() {
    assert_eq!(
      redact("GET with Bearer s3cr3t failed", Some("s3cr3t")),
      "GET with Bearer «REDACTED_TOKEN» failed"
    );
    assert_eq!(redact("nothing", None), "nothing");
    assert_eq!(redact("nothing", Some("  ")), "nothing");
  }

  #[test]
  fn test_mask_headers() {
    let mut headers = BTreeMap::new();
    headers.insert("Authorization".to_string(), "Bearer x".to_string());
    headers.insert("X-Api-Key".to_string(), "k".to_string());
    headers.insert("Accept".to_string(), "application/json".to_string());

    let masked = mask_headers(&headers);
    assert_eq!(masked["Authorization"], REDACTED);
    assert_eq!(masked["X-Api-Key"], REDACTED);
    assert_eq!(masked["Accept"], "application/json");
  }
}
