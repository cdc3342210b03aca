//! Transport through the local forwarding proxy.
//!
//! Every request becomes one `POST` to the proxy endpoint:
//!
//! ```json
//! {"method": "PUT", "url": "https://api.example.com/users/1",
//!  "headers": {"Authorization": "Bearer ..."}, "body": {...}, "timeout": 30}
//! ```
//!
//! and the proxy answers `{"status", "headers", "body"}` or `{"error"}`.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::error::TransportError;
use crate::redact::mask_headers;
use crate::request::{Request, Response};
use crate::transport::Transport;

/// Extra time the client waits beyond the timeout handed to the proxy, so the
/// proxy's own timeout error wins when both fire.
const CLIENT_GRACE: Duration = Duration::from_millis(500);

#[derive(Serialize)]
struct ProxyRequest<'a> {
  method: &'a str,
  url: &'a str,
  headers: &'a BTreeMap<String, String>,
  body: Option<&'a serde_json::Value>,
  /// Whole seconds.
  timeout: u64,
}

/// Sends requests through the forwarding proxy.
pub struct ProxyTransport {
  client: Client,
  endpoint: String,
  token: Option<String>,
}

impl ProxyTransport {
  pub fn new(endpoint: impl Into<String>) -> Self {
    Self {
      client: Client::new(),
      endpoint: endpoint.into(),
      token: None,
    }
  }

  /// Bearer token injected into requests that carry no `Authorization`.
  pub fn with_token(mut self, token: Option<String>) -> Self {
    self.token = token.filter(|t| !t.trim().is_empty());
    self
  }

  pub fn endpoint(&self) -> &str {
    &self.endpoint
  }
}

#[async_trait]
impl Transport for ProxyTransport {
  #[instrument(
    name = "proxy_send",
    skip(self, request, cancel),
    fields(method = %request.method, url = %request.url)
  )]
  async fn send(
    &self,
    request: &Request,
    cancel: &CancellationToken,
  ) -> Result<Response, TransportError> {
    if cancel.is_cancelled() {
      return Err(TransportError::Cancelled);
    }

    let headers = request.authorized_headers(self.token.as_deref());
    debug!(headers = ?mask_headers(&headers), "forwarding request");

    let envelope = ProxyRequest {
      method: request.method.as_str(),
      url: &request.url,
      headers: &headers,
      body: request.body.as_ref(),
      timeout: request.timeout.as_secs().max(1),
    };

    let timeout_ms = request.timeout_ms();
    let call = async {
      let response = self.client.post(&self.endpoint).json(&envelope).send().await?;
      let status = response.status().as_u16();
      let text = response.text().await?;
      Ok::<_, reqwest::Error>((status, text))
    };

    let (status, text) = tokio::select! {
      _ = cancel.cancelled() => return Err(TransportError::Cancelled),
      result = tokio::time::timeout(request.timeout + CLIENT_GRACE, call) => match result {
        Err(_) => return Err(TransportError::Timeout { timeout_ms }),
        Ok(Err(e)) => return Err(TransportError::from_reqwest(e, timeout_ms)),
        Ok(Ok(pair)) => pair,
      },
    };

    parse_envelope(status, &text)
  }
}

/// Turn the proxy's answer into a [`Response`].
///
/// A proxy-level non-2xx status or an `{error}` body fails the call; an
/// `{error}` reported with a 2xx proxy status is treated as a 502.
fn parse_envelope(proxy_status: u16, text: &str) -> Result<Response, TransportError> {
  let proxy_ok = (200..300).contains(&proxy_status);
  let failure_status = if proxy_ok { 502 } else { proxy_status };

  let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
    return Err(TransportError::proxy(failure_status, "invalid JSON from proxy"));
  };

  if let Some(error) = value.get("error") {
    let message = error
      .as_str()
      .map(str::to_string)
      .unwrap_or_else(|| error.to_string());
    return Err(TransportError::proxy(failure_status, message));
  }

  if !proxy_ok {
    return Err(TransportError::proxy(
      proxy_status,
      format!("proxy HTTP {}", proxy_status),
    ));
  }

  serde_json::from_value(value)
    .map_err(|e| TransportError::proxy(502, format!("malformed proxy envelope: {}", e)))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_envelope_success() {
    let response = parse_envelope(
      200,
      r#"{"status": 404, "headers": {"x": "1"}, "body": {"error": "no user"}}"#,
    )
    .unwrap();
    assert_eq!(response.status, 404);
    assert_eq!(response.body, json!({"error": "no user"}));
  }

  #[test]
  fn test_envelope_error_with_ok_status_is_bad_gateway() {
    let err = parse_envelope(200, r#"{"error": "connection refused"}"#).unwrap_err();
    assert_eq!(err, TransportError::proxy(502, "connection refused"));
    assert!(err.is_transient());
  }

  #[test]
  fn test_envelope_error_keeps_proxy_status() {
    let err = parse_envelope(400, r#"{"error": "Host not allowed: evil.com"}"#).unwrap_err();
    assert_eq!(err, TransportError::proxy(400, "Host not allowed: evil.com"));
    assert!(!err.is_transient());
  }

  #[test]
  fn test_envelope_invalid_json() {
    let err = parse_envelope(200, "<html>").unwrap_err();
    assert!(matches!(err, TransportError::Proxy { status: 502, .. }));
  }

  #[test]
  fn test_envelope_non_ok_without_error() {
    let err = parse_envelope(503, "{}").unwrap_err();
    assert_eq!(err, TransportError::proxy(503, "proxy HTTP 503"));
  }

  #[test]
  fn test_request_envelope_shape() {
    let request = Request::new(reqwest::Method::PUT, "https://api.example.com/users/1")
      .json(json!({"user": {"id": 1}}))
      .timeout(Duration::from_millis(2500));
    let headers = request.authorized_headers(Some("t"));
    let envelope = ProxyRequest {
      method: request.method.as_str(),
      url: &request.url,
      headers: &headers,
      body: request.body.as_ref(),
      timeout: request.timeout.as_secs().max(1),
    };

    let json = serde_json::to_value(&envelope).unwrap();
    assert_eq!(json["method"], "PUT");
    assert_eq!(json["timeout"], 2);
    assert_eq!(json["headers"]["Authorization"], "Bearer t");
    assert_eq!(json["body"]["user"]["id"], 1);
  }

  #[tokio::test]
  async fn test_cancelled_before_send() {
    let transport = ProxyTransport::new("http://127.0.0.1:9/proxy");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = transport
      .send(&Request::get("https://api.example.com"), &cancel)
      .await
      .unwrap_err();
    assert_eq!(err, TransportError::Cancelled);
  }
}
