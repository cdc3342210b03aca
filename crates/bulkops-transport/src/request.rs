//! Request and response types.

use std::collections::BTreeMap;
use std::time::Duration;

pub use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A single logical HTTP request. Immutable once sent.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
  pub method: Method,
  pub url: String,
  pub headers: BTreeMap<String, String>,
  /// JSON body. A `Value::String` is sent as raw text.
  pub body: Option<serde_json::Value>,
  pub timeout: Duration,
}

impl Request {
  pub fn new(method: Method, url: impl Into<String>) -> Self {
    Self {
      method,
      url: url.into(),
      headers: BTreeMap::new(),
      body: None,
      timeout: DEFAULT_TIMEOUT,
    }
  }

  pub fn get(url: impl Into<String>) -> Self {
    Self::new(Method::GET, url)
  }

  pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.insert(name.into(), value.into());
    self
  }

  /// Attach a JSON body and the matching content type.
  pub fn json(mut self, body: serde_json::Value) -> Self {
    if !self.has_header("content-type") {
      self
        .headers
        .insert("Content-Type".to_string(), "application/json".to_string());
    }
    self.body = Some(body);
    self
  }

  pub fn timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  /// Case-insensitive header presence check.
  pub fn has_header(&self, name: &str) -> bool {
    self.headers.keys().any(|k| k.eq_ignore_ascii_case(name))
  }

  /// Headers with `Authorization: Bearer <token>` added when a token is
  /// configured and the caller did not set the header itself.
  pub(crate) fn authorized_headers(&self, token: Option<&str>) -> BTreeMap<String, String> {
    let mut headers = self.headers.clone();
    if let Some(token) = token
      && !self.has_header("authorization")
    {
      headers.insert("Authorization".to_string(), format!("Bearer {token}"));
    }
    headers
  }

  pub(crate) fn timeout_ms(&self) -> u64 {
    u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
  }
}

/// A response header value; repeated headers become a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
  One(String),
  Many(Vec<String>),
}

impl std::fmt::Display for HeaderValue {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::One(v) => f.write_str(v),
      Self::Many(vs) => f.write_str(&vs.join(", ")),
    }
  }
}

/// A response from the remote API. `status` alone decides success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  #[serde(default)]
  pub headers: BTreeMap<String, HeaderValue>,
  /// Parsed JSON, raw text as `Value::String`, or `Null` when empty.
  #[serde(default)]
  pub body: serde_json::Value,
}

impl Response {
  pub fn new(status: u16, body: serde_json::Value) -> Self {
    Self {
      status,
      headers: BTreeMap::new(),
      body,
    }
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// 429 and 5xx are worth retrying.
pub fn is_transient_status(status: u16) -> bool {
  status == 429 || (500..=599).contains(&status)
}

pub fn parse_method(method: &str) -> Result<Method, TransportError> {
  match method.trim().to_uppercase().as_str() {
    "GET" => Ok(Method::GET),
    "POST" => Ok(Method::POST),
    "PUT" => Ok(Method::PUT),
    "DELETE" => Ok(Method::DELETE),
    "PATCH" => Ok(Method::PATCH),
    "HEAD" => Ok(Method::HEAD),
    "OPTIONS" => Ok(Method::OPTIONS),
    _ => Err(TransportError::InvalidRequest {
      message: format!("unsupported HTTP method: {}", method),
    }),
  }
}

/// Parse a response body: JSON when possible, otherwise the raw text.
pub(crate) fn parse_body(text: String) -> serde_json::Value {
  if text.trim().is_empty() {
    return serde_json::Value::Null;
  }
  serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text))
}
