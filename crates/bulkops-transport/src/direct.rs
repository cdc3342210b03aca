//! Direct transport with host policy enforcement.
//!
//! Does in-process what the forwarding proxy does: validates the destination,
//! relays the request and normalizes the answer into a [`Response`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use url::Url;

use crate::error::TransportError;
use crate::redact::mask_headers;
use crate::request::{HeaderValue, Request, Response, parse_body};
use crate::transport::Transport;

/// Which hosts requests may reach.
///
/// Patterns are exact host names or `*.domain`, which matches `domain` itself
/// and any of its subdomains. An empty policy allows every host.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostPolicy {
  patterns: Vec<String>,
}

impl HostPolicy {
  pub fn allow_all() -> Self {
    Self::default()
  }

  pub fn new<I, S>(patterns: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    Self {
      patterns: patterns
        .into_iter()
        .map(|p| p.as_ref().trim().to_ascii_lowercase())
        .filter(|p| !p.is_empty())
        .collect(),
    }
  }

  pub fn is_allowed(&self, host: &str) -> bool {
    if self.patterns.is_empty() {
      return true;
    }

    let host = host.to_ascii_lowercase();
    self.patterns.iter().any(|pattern| match pattern.strip_prefix("*.") {
      Some(domain) => host == domain || host.ends_with(&format!(".{}", domain)),
      None => host == *pattern,
    })
  }

  /// Parse `url` and check its scheme and host.
  pub fn check(&self, url: &str) -> Result<Url, TransportError> {
    let parsed = Url::parse(url).map_err(|e| TransportError::InvalidRequest {
      message: format!("invalid url '{}': {}", url, e),
    })?;

    if !matches!(parsed.scheme(), "http" | "https") {
      return Err(TransportError::InvalidRequest {
        message: format!("unsupported scheme '{}'", parsed.scheme()),
      });
    }

    let Some(host) = parsed.host_str() else {
      return Err(TransportError::InvalidRequest {
        message: format!("url '{}' has no host", url),
      });
    };

    if !self.is_allowed(host) {
      return Err(TransportError::HostNotAllowed {
        host: host.to_string(),
      });
    }

    Ok(parsed)
  }
}

/// Sends requests straight to the remote API.
pub struct DirectTransport {
  client: Client,
  policy: HostPolicy,
  token: Option<String>,
}

impl DirectTransport {
  pub fn new(policy: HostPolicy) -> Self {
    Self {
      client: Client::new(),
      policy,
      token: None,
    }
  }

  pub fn with_token(mut self, token: Option<String>) -> Self {
    self.token = token.filter(|t| !t.trim().is_empty());
    self
  }
}

#[async_trait]
impl Transport for DirectTransport {
  #[instrument(
    name = "direct_send",
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

    let url = self.policy.check(&request.url)?;
    let headers = request.authorized_headers(self.token.as_deref());
    debug!(headers = ?mask_headers(&headers), "sending request");

    let mut builder = self
      .client
      .request(request.method.clone(), url)
      .timeout(request.timeout);
    for (name, value) in &headers {
      builder = builder.header(name, value);
    }
    builder = match &request.body {
      Some(serde_json::Value::String(text)) => builder.body(text.clone()),
      Some(body) => builder.json(body),
      None => builder,
    };

    let timeout_ms = request.timeout_ms();
    let call = async move {
      let response = builder.send().await?;
      let status = response.status().as_u16();
      let headers = collect_headers(response.headers());
      let text = response.text().await?;
      Ok::<_, reqwest::Error>(Response {
        status,
        headers,
        body: parse_body(text),
      })
    };

    tokio::select! {
      _ = cancel.cancelled() => Err(TransportError::Cancelled),
      result = tokio::time::timeout(request.timeout, call) => match result {
        Err(_) => Err(TransportError::Timeout { timeout_ms }),
        Ok(result) => result.map_err(|e| TransportError::from_reqwest(e, timeout_ms)),
      },
    }
  }
}

fn collect_headers(headers: &reqwest::header::HeaderMap) -> BTreeMap<String, HeaderValue> {
  let mut out: BTreeMap<String, HeaderValue> = BTreeMap::new();
  for (name, value) in headers {
    let Ok(value) = value.to_str() else {
      continue;
    };
    let value = value.to_string();
    match out.remove(name.as_str()) {
      None => {
        out.insert(name.as_str().to_string(), HeaderValue::One(value));
      }
      Some(HeaderValue::One(first)) => {
        out.insert(name.as_str().to_string(), HeaderValue::Many(vec![first, value]));
      }
      Some(HeaderValue::Many(mut values)) => {
        values.push(value);
        out.insert(name.as_str().to_string(), HeaderValue::Many(values));
      }
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use reqwest::header::{HeaderMap, HeaderName};

  #[test]
  fn test_empty_policy_allows_everything() {
    assert!(HostPolicy::allow_all().is_allowed("anything.example"));
  }

  #[test]
  fn test_wildcard_matches_domain_and_subdomains() {
    let policy = HostPolicy::new(["*.example.com", "api.other.io"]);
    assert!(policy.is_allowed("example.com"));
    assert!(policy.is_allowed("eu.api.example.com"));
    assert!(policy.is_allowed("API.OTHER.IO"));
    assert!(!policy.is_allowed("badexample.com"));
    assert!(!policy.is_allowed("www.other.io"));
  }

  #[test]
  fn test_check_rejects_scheme_and_host() {
    let policy = HostPolicy::new(["api.example.com"]);
    assert!(policy.check("https://api.example.com/users").is_ok());
    assert!(matches!(
      policy.check("ftp://api.example.com/file"),
      Err(TransportError::InvalidRequest { .. })
    ));
    assert_eq!(
      policy.check("https://evil.com/"),
      Err(TransportError::HostNotAllowed {
        host: "evil.com".to_string()
      })
    );
  }

  #[test]
  fn test_collect_headers_groups_repeats() {
    let mut headers = HeaderMap::new();
    let cookie = HeaderName::from_static("set-cookie");
    headers.append(cookie.clone(), "a=1".parse().unwrap());
    headers.append(cookie, "b=2".parse().unwrap());
    headers.insert("content-type", "text/plain".parse().unwrap());

    let collected = collect_headers(&headers);
    assert_eq!(
      collected["set-cookie"],
      HeaderValue::Many(vec!["a=1".to_string(), "b=2".to_string()])
    );
    assert_eq!(collected["content-type"], HeaderValue::One("text/plain".to_string()));
  }

  #[tokio::test]
  async fn test_disallowed_host_fails_before_sending() {
    let transport = DirectTransport::new(HostPolicy::new(["api.example.com"]));
    let err = transport
      .send(&Request::get("https://evil.com/x"), &CancellationToken::new())
      .await
      .unwrap_err();
    assert!(matches!(err, TransportError::HostNotAllowed { .. }));
  }
}
