//! Bulkops Transport
//!
//! Issues single logical HTTP requests and wraps them in retry.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        ApiClient                            │
//! │  - resolves paths against the base URL                      │
//! │  - send(request, cancel) → Response                         │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     with_retry(policy)                      │
//! │  - retries 429 / 5xx / network failure / timeout            │
//! │  - exponential backoff with jitter, cancellable waits       │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     dyn Transport                           │
//! │  - ProxyTransport: POST {method,url,...} to the proxy       │
//! │  - DirectTransport: reqwest + allowed-host policy           │
//! │  - ScriptedTransport: canned responses for tests            │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod client;
mod direct;
mod error;
pub mod mock;
mod proxy;
mod redact;
mod request;
mod retry;
mod transport;
mod urls;

pub use client::ApiClient;
pub use direct::{DirectTransport, HostPolicy};
pub use error::{RequestError, TransportError};
pub use proxy::ProxyTransport;
pub use redact::{REDACTED, mask_headers, redact};
pub use request::{HeaderValue, Method, Request, Response, is_transient_status, parse_method};
pub use retry::{RetryPolicy, with_retry};
pub use transport::Transport;
pub use urls::{expand_path, resolve_url, with_query};
