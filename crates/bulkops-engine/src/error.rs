//! Script and engine errors.

use bulkops_collect::CollectError;
use bulkops_config::ConfigError;
use bulkops_transport::{RequestError, TransportError};

/// Errors raised by a script's preview, plan or execute phase.
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
  /// Missing or invalid field values. Raised before any remote call.
  #[error("configuration error: {message}")]
  Configuration { message: String },

  #[error(transparent)]
  Request(#[from] RequestError),

  #[error(transparent)]
  Collect(#[from] CollectError),

  /// A failure the script wants to end the whole run.
  #[error("stopping run after failure on {item}: {source}")]
  StopOnError {
    item: String,
    #[source]
    source: Box<ScriptError>,
  },
}

impl ScriptError {
  pub fn configuration(message: impl Into<String>) -> Self {
    Self::Configuration {
      message: message.into(),
    }
  }

  /// Escalate to a run-ending failure when `stop_on_error` is set.
  pub fn escalate(self, item: impl Into<String>, stop_on_error: bool) -> Self {
    if stop_on_error && !self.is_cancelled() {
      Self::StopOnError {
        item: item.into(),
        source: Box::new(self),
      }
    } else {
      self
    }
  }

  pub fn is_fatal(&self) -> bool {
    matches!(self, Self::StopOnError { .. })
  }

  pub fn is_cancelled(&self) -> bool {
    match self {
      Self::Request(e) => e.is_cancelled(),
      Self::Collect(e) => e.is_cancelled(),
      Self::StopOnError { source, .. } => source.is_cancelled(),
      Self::Configuration { .. } => false,
    }
  }

  /// The HTTP status behind this failure, if any.
  pub fn status(&self) -> Option<u16> {
    match self {
      Self::Request(e) | Self::Collect(CollectError::Request(e)) => e.status(),
      Self::StopOnError { source, .. } => source.status(),
      _ => None,
    }
  }
}

impl From<ConfigError> for ScriptError {
  fn from(error: ConfigError) -> Self {
    Self::configuration(error.to_string())
  }
}

impl From<TransportError> for ScriptError {
  fn from(error: TransportError) -> Self {
    Self::Request(error.into())
  }
}

/// Errors surfaced by the [`Engine`](crate::Engine).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  #[error("unknown script '{id}'")]
  UnknownScript { id: String },

  #[error("script '{script_id}' failed")]
  Script {
    script_id: String,
    #[source]
    source: ScriptError,
  },

  /// The background run task panicked or was aborted.
  #[error("run task failed: {message}")]
  Join { message: String },
}

impl EngineError {
  pub fn is_cancelled(&self) -> bool {
    matches!(self, Self::Script { source, .. } if source.is_cancelled())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_escalate_only_when_requested() {
    let err = ScriptError::from(RequestError::remote(409, serde_json::Value::Null));
    assert!(!err.is_fatal());

    let err = err.escalate("user 7", true);
    assert!(err.is_fatal());
    assert_eq!(err.status(), Some(409));
    assert_eq!(
      err.to_string(),
      "stopping run after failure on user 7: remote returned HTTP 409"
    );
  }

  #[test]
  fn test_cancellation_is_never_escalated() {
    let err = ScriptError::from(TransportError::Cancelled).escalate("user 7", true);
    assert!(!err.is_fatal());
    assert!(err.is_cancelled());
  }

  #[test]
  fn test_config_error_becomes_configuration() {
    let err: ScriptError = ConfigError::MissingField {
      name: "groupId".into(),
      label: "User group".into(),
    }
    .into();
    assert_eq!(err.to_string(), "configuration error: field required: User group");
  }
}
