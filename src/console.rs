//! One-off requests through the configured transport.

use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use bulkops_transport::{ApiClient, Request, Response, parse_method};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Parse request headers from a JSON object or from `Key: Value` lines.
pub fn parse_headers(input: &str) -> Result<BTreeMap<String, String>> {
  let input = input.trim();
  if input.is_empty() {
    return Ok(BTreeMap::new());
  }

  if input.starts_with('{') {
    let object: serde_json::Map<String, Value> =
      serde_json::from_str(input).context("headers are not a valid JSON object")?;
    return Ok(
      object
        .into_iter()
        .map(|(name, value)| match value {
          Value::String(s) => (name, s),
          other => (name, other.to_string()),
        })
        .collect(),
    );
  }

  let mut headers = BTreeMap::new();
  for line in input.lines().map(str::trim).filter(|l| !l.is_empty()) {
    let Some((name, value)) = line.split_once(':') else {
      bail!("header line '{line}' is not in 'Key: Value' form");
    };
    let name = name.trim();
    if name.is_empty() {
      bail!("header line '{line}' has no name");
    }
    headers.insert(name.to_string(), value.trim().to_string());
  }
  Ok(headers)
}

/// A request body as the operator typed it.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
  Json(Value),
  Text(String),
}

/// JSON when it parses, the raw text otherwise. Blank input means no body.
pub fn parse_body(input: &str) -> Option<Body> {
  if input.trim().is_empty() {
    return None;
  }
  Some(match serde_json::from_str(input) {
    Ok(value) => Body::Json(value),
    Err(_) => Body::Text(input.to_string()),
  })
}

pub async fn send(
  client: &ApiClient,
  method: &str,
  path: &str,
  headers: BTreeMap<String, String>,
  body: Option<Body>,
  cancel: &CancellationToken,
) -> Result<Response> {
  let method = parse_method(method)?;
  let mut request = Request::new(method, path);
  for (name, value) in headers {
    request = request.header(name, value);
  }
  // Raw text goes out as is; the content type is left to the caller's headers.
  match body {
    Some(Body::Json(value)) => request = request.json(value),
    Some(Body::Text(text)) => request.body = Some(Value::String(text)),
    None => {}
  }

  Ok(client.send(request, cancel).await?)
}

/// Status line, headers sorted by name, then the body pretty-printed.
pub fn render(response: &Response) -> String {
  let mut out = format!("HTTP {}\n", response.status);
  for (name, value) in &response.headers {
    out.push_str(&format!("{name}: {value}\n"));
  }
  out.push('\n');
  match &response.body {
    Value::Null => {}
    Value::String(text) => out.push_str(text),
    body => out.push_str(&serde_json::to_string_pretty(body).unwrap_or_else(|_| body.to_string())),
  }
  out
}
