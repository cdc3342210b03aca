//! URL helpers.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use url::Url;

use crate::error::TransportError;

/// Resolve `path` against `base`.
///
/// Absolute `http(s)://` paths are returned unchanged. Otherwise the result is
/// `base` without trailing slashes, a single `/`, then `path` without leading
/// slashes. An empty base leaves the path as is.
pub fn resolve_url(base: &str, path: &str) -> String {
  let path = path.trim();
  if is_absolute(path) {
    return path.to_string();
  }

  let base = base.trim().trim_end_matches('/');
  if base.is_empty() {
    return path.to_string();
  }

  format!("{}/{}", base, path.trim_start_matches('/'))
}

/// Set query parameters on `url`, replacing existing values of the same name.
pub fn with_query(url: &str, params: &[(&str, String)]) -> Result<String, TransportError> {
  let mut parsed = Url::parse(url).map_err(|e| TransportError::InvalidRequest {
    message: format!("invalid url '{}': {}", url, e),
  })?;

  let kept: Vec<(String, String)> = parsed
    .query_pairs()
    .filter(|(k, _)| !params.iter().any(|(name, _)| *name == *k))
    .map(|(k, v)| (k.into_owned(), v.into_owned()))
    .collect();

  {
    let mut query = parsed.query_pairs_mut();
    query.clear();
    query.extend_pairs(kept);
    for (name, value) in params {
      query.append_pair(name, value);
    }
  }

  Ok(parsed.to_string())
}

/// Bytes left as is in a single path segment: alphanumerics and `-_.!~*'()`.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
  .remove(b'-')
  .remove(b'_')
  .remove(b'.')
  .remove(b'!')
  .remove(b'~')
  .remove(b'*')
  .remove(b'\'')
  .remove(b'(')
  .remove(b')');

/// Substitute `{id}` in a path template with the encoded id.
pub fn expand_path(template: &str, id: &str) -> String {
  let encoded = utf8_percent_encode(id, SEGMENT).to_string();
  template.replace("{id}", &encoded)
}

fn is_absolute(path: &str) -> bool {
  let lower = path.to_ascii_lowercase();
  lower.starts_with("http://") || lower.starts_with("https://")
}
