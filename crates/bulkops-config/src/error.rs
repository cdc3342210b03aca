//! Configuration errors.

/// Errors raised while reading settings or validating script values.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  /// A required field has no value.
  #[error("field required: {label}")]
  MissingField { name: String, label: String },

  /// A field holds a value of the wrong shape.
  #[error("invalid value for '{name}': {message}")]
  InvalidField { name: String, message: String },

  /// Reading or writing the settings directory failed.
  #[error("settings io error: {0}")]
  Io(#[from] std::io::Error),

  /// The settings file is not valid JSON.
  #[error("failed to parse settings: {0}")]
  Parse(#[from] serde_json::Error),
}
