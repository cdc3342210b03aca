//! Transport and request errors.
//!
//! Each error decides whether it is transient when it is constructed, so
//! retry never has to guess from message text.

use crate::request::is_transient_status;

/// A failure before a response from the remote API was obtained.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
  /// Connection, DNS or protocol failure.
  #[error("network failure: {message}")]
  Network { message: String },

  /// The request did not complete within its timeout.
  #[error("request timed out after {timeout_ms}ms")]
  Timeout { timeout_ms: u64 },

  /// The caller's cancellation token fired.
  #[error("request cancelled")]
  Cancelled,

  /// The forwarding proxy rejected or failed the call.
  #[error("proxy error (HTTP {status}): {message}")]
  Proxy {
    status: u16,
    message: String,
    transient: bool,
  },

  /// The destination host is not in the allowed host list.
  #[error("host not allowed: {host}")]
  HostNotAllowed { host: String },

  /// The request could not be built (bad URL, bad method).
  #[error("invalid request: {message}")]
  InvalidRequest { message: String },
}

impl TransportError {
  /// A proxy-level failure, transient when the status is 429 or 5xx.
  pub fn proxy(status: u16, message: impl Into<String>) -> Self {
    Self::Proxy {
      status,
      message: message.into(),
      transient: is_transient_status(status),
    }
  }

  pub fn is_transient(&self) -> bool {
    match self {
      Self::Network { .. } | Self::Timeout { .. } => true,
      Self::Proxy { transient, .. } => *transient,
      Self::Cancelled | Self::HostNotAllowed { .. } | Self::InvalidRequest { .. } => false,
    }
  }

  pub fn is_cancelled(&self) -> bool {
    matches!(self, Self::Cancelled)
  }

  pub(crate) fn from_reqwest(error: reqwest::Error, timeout_ms: u64) -> Self {
    if error.is_timeout() {
      Self::Timeout { timeout_ms }
    } else if error.is_builder() {
      Self::InvalidRequest {
        message: error.to_string(),
      }
    } else {
      Self::Network {
        message: error.to_string(),
      }
    }
  }
}

/// A failed logical request: either no response, or a non-2xx one.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RequestError {
  #[error(transparent)]
  Transport(#[from] TransportError),

  /// The remote API answered with a non-2xx status.
  #[error("remote returned HTTP {status}")]
  Remote {
    status: u16,
    body: serde_json::Value,
    transient: bool,
  },
}

impl RequestError {
  pub fn remote(status: u16, body: serde_json::Value) -> Self {
    Self::Remote {
      status,
      body,
      transient: is_transient_status(status),
    }
  }

  pub fn is_transient(&self) -> bool {
    match self {
      Self::Transport(e) => e.is_transient(),
      Self::Remote { transient, .. } => *transient,
    }
  }

  pub fn is_cancelled(&self) -> bool {
    matches!(self, Self::Transport(TransportError::Cancelled))
  }

  /// The HTTP status involved, if any.
  pub fn status(&self) -> Option<u16> {
    match self {
      Self::Transport(TransportError::Proxy { status, .. }) | Self::Remote { status, .. } => {
        Some(*status)
      }
      Self::Transport(_) => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_transient_classification() {
    assert!(TransportError::Network { message: "reset".into() }.is_transient());
    assert!(TransportError::Timeout { timeout_ms: 10 }.is_transient());
    assert!(!TransportError::Cancelled.is_transient());
    assert!(TransportError::proxy(503, "unavailable").is_transient());
    assert!(TransportError::proxy(429, "slow down").is_transient());
    assert!(!TransportError::proxy(400, "Invalid URL").is_transient());
    assert!(!TransportError::HostNotAllowed { host: "evil".into() }.is_transient());
  }

  #[test]
  fn test_remote_errors() {
    let err = RequestError::remote(404, serde_json::json!({"error": "missing"}));
    assert!(!err.is_transient());
    assert_eq!(err.status(), Some(404));
    assert_eq!(err.to_string(), "remote returned HTTP 404");

    assert!(RequestError::remote(500, serde_json::Value::Null).is_transient());
  }

  #[test]
  fn test_cancelled() {
    let err: RequestError = TransportError::Cancelled.into();
    assert!(err.is_cancelled());
    assert_eq!(err.status(), None);
  }
}
