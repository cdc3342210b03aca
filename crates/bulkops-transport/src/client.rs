//! The client scripts talk to.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::RequestError;
use crate::request::{Request, Response};
use crate::retry::{RetryPolicy, with_retry};
use crate::transport::Transport;
use crate::urls::resolve_url;

/// A transport plus the base URL, default timeout and retry policy.
#[derive(Clone)]
pub struct ApiClient {
  transport: Arc<dyn Transport>,
  base_url: String,
  timeout: Duration,
  retry: RetryPolicy,
}

impl ApiClient {
  pub fn new(transport: Arc<dyn Transport>, base_url: impl Into<String>) -> Self {
    Self {
      transport,
      base_url: base_url.into(),
      timeout: Duration::from_secs(30),
      retry: RetryPolicy::default(),
    }
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }

  pub fn base_url(&self) -> &str {
    &self.base_url
  }

  pub fn timeout(&self) -> Duration {
    self.timeout
  }

  /// Resolve a path (or absolute URL) against the base URL.
  pub fn resolve(&self, path: &str) -> String {
    resolve_url(&self.base_url, path)
  }

  /// Send with retry and return the final response, whatever its status.
  ///
  /// The request's URL is resolved against the base URL and the client
  /// timeout replaces the request's default one.
  pub async fn send(
    &self,
    request: Request,
    cancel: &CancellationToken,
  ) -> Result<Response, RequestError> {
    let request = Request {
      url: self.resolve(&request.url),
      timeout: self.timeout,
      ..request
    };

    with_retry(&self.retry, cancel, |_| self.transport.send(&request, cancel)).await
  }

  /// Like [`send`](Self::send), but a non-2xx status is an error.
  pub async fn send_ok(
    &self,
    request: Request,
    cancel: &CancellationToken,
  ) -> Result<Response, RequestError> {
    let response = self.send(request, cancel).await?;
    if response.is_success() {
      Ok(response)
    } else {
      Err(RequestError::remote(response.status, response.body))
    }
  }
}
