//! Collection errors.

use bulkops_transport::{RequestError, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum CollectError {
  /// The listing kept producing pages past the guard limit.
  #[error("pagination exceeded guard threshold of {limit} pages")]
  PaginationGuardExceeded { limit: usize },

  /// Fetching a page failed.
  #[error("listing request failed: {0}")]
  Request(#[from] RequestError),

  /// A page body had an unexpected shape.
  #[error("invalid listing body: {message}")]
  InvalidBody { message: String },
}

impl From<TransportError> for CollectError {
  fn from(error: TransportError) -> Self {
    Self::Request(error.into())
  }
}

impl CollectError {
  pub fn is_cancelled(&self) -> bool {
    matches!(self, Self::Request(e) if e.is_cancelled())
  }
}
