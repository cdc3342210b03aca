//! An in-memory [`Transport`] with canned responses.
//!
//! Routes match on method plus URL without its query string. One-shot
//! outcomes queued with [`ScriptedTransport::enqueue`] are served first, then
//! the route's handler. Unrouted requests get a 404.
//!
//! ```ignore
//! let transport = Arc::new(ScriptedTransport::new());
//! transport.respond(Method::GET, "https://api.example.com/bundles", 200, json!({"bundles": []}));
//! transport.enqueue(Method::PUT, "https://api.example.com/users/1", Ok(Response::new(503, Value::Null)));
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::request::{Method, Request, Response};
use crate::transport::Transport;

type Handler = Box<dyn Fn(&Request) -> Result<Response, TransportError> + Send + Sync>;
type RouteKey = (Method, String);

#[derive(Default)]
struct State {
  handlers: HashMap<RouteKey, Handler>,
  queued: HashMap<RouteKey, VecDeque<Result<Response, TransportError>>>,
  requests: Vec<Request>,
}

/// Records every request and answers from registered routes.
#[derive(Default)]
pub struct ScriptedTransport {
  state: Mutex<State>,
  latency: Duration,
}

impl ScriptedTransport {
  pub fn new() -> Self {
    Self::default()
  }

  /// Delay every answer; cancellation still interrupts the wait.
  pub fn with_latency(mut self, latency: Duration) -> Self {
    self.latency = latency;
    self
  }

  /// Always answer `status`/`body` for this route.
  pub fn respond(&self, method: Method, url: &str, status: u16, body: serde_json::Value) {
    self.route(method, url, move |_| Ok(Response::new(status, body.clone())));
  }

  /// Answer this route with `handler`.
  pub fn route<F>(&self, method: Method, url: &str, handler: F)
  where
    F: Fn(&Request) -> Result<Response, TransportError> + Send + Sync + 'static,
  {
    let key = (method, strip_query(url).to_string());
    self.lock().handlers.insert(key, Box::new(handler));
  }

  /// Serve `outcome` once for this route before falling back to its handler.
  pub fn enqueue(&self, method: Method, url: &str, outcome: Result<Response, TransportError>) {
    let key = (method, strip_query(url).to_string());
    self.lock().queued.entry(key).or_default().push_back(outcome);
  }

  /// Every request received so far, in arrival order.
  pub fn requests(&self) -> Vec<Request> {
    self.lock().requests.clone()
  }

  /// How many requests hit this method and URL (query ignored).
  pub fn count(&self, method: Method, url: &str) -> usize {
    let url = strip_query(url);
    self
      .lock()
      .requests
      .iter()
      .filter(|r| r.method == method && strip_query(&r.url) == url)
      .count()
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, State> {
    // A panicking test thread can poison the lock; the state is still usable.
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn answer(&self, request: &Request) -> Result<Response, TransportError> {
    let mut state = self.lock();
    state.requests.push(request.clone());

    let key = (request.method.clone(), strip_query(&request.url).to_string());
    if let Some(outcome) = state.queued.get_mut(&key).and_then(VecDeque::pop_front) {
      return outcome;
    }

    match state.handlers.get(&key) {
      Some(handler) => handler(request),
      None => Ok(Response::new(404, serde_json::json!({"error": "no route"}))),
    }
  }
}

#[async_trait]
impl Transport for ScriptedTransport {
  async fn send(
    &self,
    request: &Request,
    cancel: &CancellationToken,
  ) -> Result<Response, TransportError> {
    if cancel.is_cancelled() {
      return Err(TransportError::Cancelled);
    }

    if !self.latency.is_zero() {
      tokio::select! {
        _ = cancel.cancelled() => return Err(TransportError::Cancelled),
        _ = tokio::time::sleep(self.latency) => {}
      }
    }

    self.answer(request)
  }
}

fn strip_query(url: &str) -> &str {
  url.split_once('?').map_or(url, |(base, _)| base)
}
