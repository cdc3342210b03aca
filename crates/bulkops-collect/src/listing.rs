//! Listing endpoints fetched through an [`ApiClient`].

use std::ops::ControlFlow;

use bulkops_transport::{ApiClient, Request, with_query};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::error::CollectError;
use crate::page::{ListShape, Page};
use crate::paginator::{Paginator, ScanStats};
use crate::reference::ReferenceSet;

/// A paginated listing endpoint.
pub struct Listing<'a> {
  client: &'a ApiClient,
  url: String,
  shape: ListShape,
}

impl<'a> Listing<'a> {
  /// `path` is resolved against the client's base URL.
  pub fn new(client: &'a ApiClient, path: &str, shape: ListShape) -> Self {
    Self {
      client,
      url: client.resolve(path),
      shape,
    }
  }

  /// The resolved listing URL (also the reference-cache key).
  pub fn url(&self) -> &str {
    &self.url
  }

  /// `GET {url}?limit=..&offset=..` and parse the body.
  pub async fn fetch_page(
    &self,
    offset: u64,
    limit: u64,
    cancel: &CancellationToken,
  ) -> Result<Page<Value>, CollectError> {
    let url = with_query(
      &self.url,
      &[("limit", limit.to_string()), ("offset", offset.to_string())],
    )?;
    let response = self.client.send_ok(Request::get(url), cancel).await?;
    self.shape.parse(&response.body)
  }

  /// Collect every record with `paginator`.
  #[instrument(name = "listing_collect", skip(self, paginator, cancel), fields(url = %self.url))]
  pub async fn collect(
    &self,
    paginator: &Paginator,
    cancel: &CancellationToken,
  ) -> Result<Vec<Value>, CollectError> {
    let limit = paginator.page_size();
    paginator
      .collect(|offset| self.fetch_page(offset, limit, cancel))
      .await
  }

  /// Walk the listing record by record until `visit` breaks.
  #[instrument(name = "listing_scan", skip(self, paginator, cancel, visit), fields(url = %self.url))]
  pub async fn scan<V>(
    &self,
    paginator: &Paginator,
    cancel: &CancellationToken,
    visit: V,
  ) -> Result<ScanStats, CollectError>
  where
    V: FnMut(Value) -> ControlFlow<()>,
  {
    let limit = paginator.page_size();
    paginator
      .scan(|offset| self.fetch_page(offset, limit, cancel), visit)
      .await
  }

  /// Load a reference catalog: cursor-only pages of 100, entries named by
  /// the first of `name_keys` present.
  pub async fn load_reference_set(
    &self,
    guard_limit: usize,
    name_keys: &[&str],
    cancel: &CancellationToken,
  ) -> Result<ReferenceSet, CollectError> {
    let paginator = Paginator::new(100)
      .cursor_only()
      .with_guard_limit(guard_limit);
    let records = self.collect(&paginator, cancel).await?;
    Ok(ReferenceSet::from_records(records, name_keys))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use bulkops_transport::Method;
  use bulkops_transport::mock::ScriptedTransport;
  use serde_json::json;
  use std::sync::Arc;

  #[tokio::test]
  async fn test_reference_set_follows_cursor() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.route(Method::GET, "https://api.example.com/bundles", |request| {
      let body = if request.url.contains("offset=0") {
        json!({"bundles": [{"id": 1, "bundle_name": "A"}], "pagination": {"next_offset": 100}})
      } else {
        json!({"bundles": [{"id": 2, "name": "B"}]})
      };
      Ok(bulkops_transport::Response::new(200, body))
    });
    let client = ApiClient::new(transport.clone(), "https://api.example.com");

    let listing = Listing::new(&client, "/bundles", ListShape::new("bundles"));
    let set = listing
      .load_reference_set(500, &["bundle_name", "name"], &CancellationToken::new())
      .await
      .unwrap();

    assert_eq!(set.len(), 2);
    assert_eq!(set.label(2), "B (#2)");
    let urls: Vec<_> = transport.requests().into_iter().map(|r| r.url).collect();
    assert_eq!(
      urls,
      vec![
        "https://api.example.com/bundles?limit=100&offset=0",
        "https://api.example.com/bundles?limit=100&offset=100",
      ]
    );
  }

  #[tokio::test]
  async fn test_scan_stops_when_visitor_breaks() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.respond(
      Method::GET,
      "https://api.example.com/users",
      200,
      json!({"users": [{"id": 1}, {"id": 2}, {"id": 3}], "pagination": {"total": 9}}),
    );
    let client = ApiClient::new(transport.clone(), "https://api.example.com");

    let listing = Listing::new(&client, "/users", ListShape::new("users"));
    let mut seen = Vec::new();
    let stats = listing
      .scan(&Paginator::new(3), &CancellationToken::new(), |user| {
        seen.push(user["id"].clone());
        if seen.len() == 4 {
          ControlFlow::Break(())
        } else {
          ControlFlow::Continue(())
        }
      })
      .await
      .unwrap();

    assert!(stats.stopped_early);
    assert_eq!(stats.pages, 2);
    assert_eq!(seen.len(), 4);
    assert_eq!(transport.count(Method::GET, "https://api.example.com/users"), 2);
  }

  #[tokio::test]
  async fn test_failed_page_is_request_error() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.respond(Method::GET, "https://api.example.com/users", 403, json!({}));
    let client = ApiClient::new(transport, "https://api.example.com");

    let listing = Listing::new(&client, "users", ListShape::new("users"));
    let err = listing
      .collect(&Paginator::new(50), &CancellationToken::new())
      .await
      .unwrap_err();

    assert!(matches!(err, CollectError::Request(ref e) if e.status() == Some(403)));
  }
}
