//! Reference-data caching.
//!
//! Reference sets are loaded once per resolved listing URL and reused across
//! plans. There is no expiry: callers reload explicitly. Loads for the same
//! key are serialized, and a caller that waited on someone else's load gets
//! that result instead of fetching again.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::Mutex;
use tracing::debug;

use crate::reference::ReferenceSet;

#[derive(Default)]
struct Slot {
  /// Bumped after every completed load.
  generation: AtomicU64,
  set: Mutex<Option<Arc<ReferenceSet>>>,
}

/// Process-wide reference-set cache keyed by resolved URL.
#[derive(Clone, Default)]
pub struct ReferenceCache {
  slots: Arc<RwLock<HashMap<String, Arc<Slot>>>>,
}

impl ReferenceCache {
  pub fn new() -> Self {
    Self::default()
  }

  /// Return the cached non-empty set for `key`, or run `loader` and cache
  /// its result.
  pub async fn ensure_cached<F, Fut, E>(&self, key: &str, loader: F) -> Result<Arc<ReferenceSet>, E>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<ReferenceSet, E>>,
  {
    self.load(key, false, loader).await
  }

  /// Run `loader` and replace the entry for `key`, unless a load for the same
  /// key completed while this call was waiting its turn.
  pub async fn reload<F, Fut, E>(&self, key: &str, loader: F) -> Result<Arc<ReferenceSet>, E>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<ReferenceSet, E>>,
  {
    self.load(key, true, loader).await
  }

  /// The cached set for `key`, without loading.
  pub async fn get(&self, key: &str) -> Option<Arc<ReferenceSet>> {
    let slot = self.existing_slot(key)?;
    slot.set.lock().await.clone()
  }

  /// Drop every cached set.
  pub fn clear(&self) {
    let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
    slots.clear();
  }

  async fn load<F, Fut, E>(&self, key: &str, force: bool, loader: F) -> Result<Arc<ReferenceSet>, E>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<ReferenceSet, E>>,
  {
    let slot = self.slot(key);
    let seen = slot.generation.load(Ordering::Acquire);
    let mut cached = slot.set.lock().await;
    let loaded_meanwhile = slot.generation.load(Ordering::Acquire) != seen;

    if let Some(set) = cached.as_ref()
      && (loaded_meanwhile || (!force && !set.is_empty()))
    {
      debug!(key, entries = set.len(), loaded_meanwhile, "reference cache hit");
      return Ok(set.clone());
    }

    debug!(key, force, "loading reference set");
    let set = Arc::new(loader().await?);
    *cached = Some(set.clone());
    slot.generation.fetch_add(1, Ordering::Release);

    Ok(set)
  }

  fn existing_slot(&self, key: &str) -> Option<Arc<Slot>> {
    let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
    slots.get(key).cloned()
  }

  fn slot(&self, key: &str) -> Arc<Slot> {
    if let Some(slot) = self.existing_slot(key) {
      return slot;
    }

    let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
    slots.entry(key.to_string()).or_default().clone()
  }
}
