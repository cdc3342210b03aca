//! The transport seam.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::request::{Request, Response};

/// Sends one request and returns the remote response, whatever its status.
///
/// Implementations must:
/// - fail with [`TransportError::Cancelled`] as soon as `cancel` fires
/// - enforce `request.timeout` independently and fail with
///   [`TransportError::Timeout`]
/// - inject `Authorization: Bearer <token>` when they hold a token and the
///   request has no `Authorization` header
#[async_trait]
pub trait Transport: Send + Sync {
  async fn send(
    &self,
    request: &Request,
    cancel: &CancellationToken,
  ) -> Result<Response, TransportError>;
}
