//! Connection settings and their on-disk store.
//!
//! ```text
//! {data_dir}/
//! ├── settings.json
//! └── token          (only when persist_token is set)
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

use crate::error::ConfigError;

const SETTINGS_FILE: &str = "settings.json";
const TOKEN_FILE: &str = "token";

/// Connection and run settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
  /// Base URL relative request paths are resolved against.
  pub base_url: String,
  /// Forwarding proxy endpoint. Empty means requests go out directly.
  pub proxy_url: String,
  /// Whether the bearer token is written to disk.
  pub persist_token: bool,
  /// Workers per chunk.
  pub concurrency: usize,
  /// Items per sequentially processed chunk.
  pub chunk_size: usize,
  /// Per-request timeout in milliseconds.
  pub timeout_ms: u64,
  /// Attempts per request including the first one.
  pub max_attempts: u32,
  /// Hosts direct requests may reach (`api.example.com`, `*.example.com`).
  /// Empty allows any host.
  pub allowed_hosts: Vec<String>,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      base_url: String::new(),
      proxy_url: "http://127.0.0.1:8000/proxy".to_string(),
      persist_token: false,
      concurrency: 4,
      chunk_size: 50,
      timeout_ms: 30_000,
      max_attempts: 4,
      allowed_hosts: Vec::new(),
    }
  }
}

impl Settings {
  /// Clamp counters to at least one and trim URLs.
  pub fn normalized(mut self) -> Self {
    self.base_url = self.base_url.trim().to_string();
    self.proxy_url = self.proxy_url.trim().to_string();
    self.concurrency = self.concurrency.max(1);
    self.chunk_size = self.chunk_size.max(1);
    self.max_attempts = self.max_attempts.max(1);
    self
  }
}

/// Reads and writes [`Settings`] and the token under a data directory.
pub struct SettingsStore {
  root: PathBuf,
}

impl SettingsStore {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Load settings, falling back to defaults when nothing was saved yet.
  pub async fn load(&self) -> Result<Settings, ConfigError> {
    let path = self.root.join(SETTINGS_FILE);
    let content = match fs::read_to_string(&path).await {
      Ok(content) => content,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        debug!(path = %path.display(), "no saved settings, using defaults");
        return Ok(Settings::default());
      }
      Err(e) => return Err(e.into()),
    };

    let settings: Settings = serde_json::from_str(&content)?;
    Ok(settings.normalized())
  }

  pub async fn save(&self, settings: &Settings) -> Result<(), ConfigError> {
    fs::create_dir_all(&self.root).await?;
    let content = serde_json::to_string_pretty(settings)?;
    fs::write(self.root.join(SETTINGS_FILE), content).await?;
    Ok(())
  }

  /// The saved token, if any.
  pub async fn load_token(&self) -> Result<Option<String>, ConfigError> {
    match fs::read_to_string(self.root.join(TOKEN_FILE)).await {
      Ok(token) => {
        let token = token.trim().to_string();
        Ok((!token.is_empty()).then_some(token))
      }
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
      Err(e) => Err(e.into()),
    }
  }

  /// Persist `token` when `settings.persist_token` is set, otherwise make
  /// sure no token is left on disk.
  pub async fn save_token(&self, settings: &Settings, token: Option<&str>) -> Result<(), ConfigError> {
    match token.map(str::trim).filter(|t| !t.is_empty()) {
      Some(token) if settings.persist_token => {
        fs::create_dir_all(&self.root).await?;
        fs::write(self.root.join(TOKEN_FILE), token).await?;
        Ok(())
      }
      _ => remove_if_exists(&self.root.join(TOKEN_FILE)).await,
    }
  }

  /// Remove saved settings and token.
  pub async fn clear(&self) -> Result<(), ConfigError> {
    remove_if_exists(&self.root.join(SETTINGS_FILE)).await?;
    remove_if_exists(&self.root.join(TOKEN_FILE)).await
  }
}

async fn remove_if_exists(path: &Path) -> Result<(), ConfigError> {
  match fs::remove_file(path).await {
    Ok(()) => Ok(()),
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
    Err(e) => Err(e.into()),
  }
}
