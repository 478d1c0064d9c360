//! Cache layer that orchestrates caching logic with network fetching.

use color_eyre::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::entry::{CacheResult, CachedEntry, Clock, SystemClock};
use super::kv::KeyValueStore;
use super::tasks::BackgroundTasks;
use crate::network::NetworkMonitor;
use crate::store::StoreError;

/// Default validity window of a cached entry.
pub const DEFAULT_TTL: Duration = Duration::from_secs(180);

/// Cache layer that manages caching logic and network fetching.
///
/// This layer sits between the application and the document store,
/// providing a read-through cache with optimistic writes and offline
/// fallback. Cloning is cheap; clones share storage, clock and tasks.
#[derive(Clone)]
pub struct CacheLayer {
  storage: Arc<dyn KeyValueStore>,
  clock: Arc<dyn Clock>,
  /// How long a cached entry is served without asking the network
  ttl: Duration,
  network: NetworkMonitor,
  tasks: BackgroundTasks,
}

impl CacheLayer {
  /// Create a new cache layer with the given storage backend.
  pub fn new<S: KeyValueStore + 'static>(storage: S, network: NetworkMonitor) -> Self {
    Self {
      storage: Arc::new(storage),
      clock: Arc::new(SystemClock),
      ttl: DEFAULT_TTL,
      network,
      tasks: BackgroundTasks::new(),
    }
  }

  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = ttl;
    self
  }

  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  pub fn ttl(&self) -> Duration {
    self.ttl
  }

  pub fn network(&self) -> &NetworkMonitor {
    &self.network
  }

  /// Background refreshes spawned by `fetch_with_refresh`.
  pub fn tasks(&self) -> &BackgroundTasks {
    &self.tasks
  }

  fn is_fresh<T>(&self, entry: &CachedEntry<T>) -> bool {
    entry.is_valid(self.clock.now_millis(), self.ttl)
  }

  /// Read an entry regardless of age. Corrupt entries are dropped.
  fn read_entry<T: DeserializeOwned>(&self, key: &str) -> Option<CachedEntry<T>> {
    let raw = match self.storage.get(key) {
      Ok(raw) => raw?,
      Err(e) => {
        warn!("Failed to read cache key {}: {}", key, e);
        return None;
      }
    };

    match serde_json::from_str(&raw) {
      Ok(entry) => Some(entry),
      Err(e) => {
        debug!("Discarding corrupt cache entry {}: {}", key, e);
        self.remove(key);
        None
      }
    }
  }

  /// Cached value for `key` if present and within the TTL.
  pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
    self
      .read_entry(key)
      .filter(|entry| self.is_fresh(entry))
      .map(|entry| entry.data)
  }

  /// Store `data` under `key` stamped with the current time.
  ///
  /// Write failures are logged and otherwise ignored.
  pub fn set<T: Serialize>(&self, key: &str, data: &T) {
    let entry = CachedEntry::new(data, self.clock.now_millis());
    let result = serde_json::to_string(&entry)
      .map_err(color_eyre::Report::from)
      .and_then(|raw| self.storage.set(key, &raw));

    if let Err(e) = result {
      warn!("Failed to set cache {}: {}", key, e);
    }
  }

  pub fn remove(&self, key: &str) {
    if let Err(e) = self.storage.remove(key) {
      warn!("Failed to remove cache {}: {}", key, e);
    }
  }

  pub fn clear(&self) -> Result<()> {
    self.storage.clear()
  }

  /// Apply `mutate` to the fresh cached value, if any, and write it back.
  ///
  /// This is the optimistic half of a mutation: the caller performs the
  /// remote write afterwards, and a failed remote write is not rolled back.
  /// Returns the updated value, or `None` when nothing fresh was cached.
  pub fn update<T, F>(&self, key: &str, mutate: F) -> Option<T>
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce(&mut T),
  {
    let mut data: T = self.get(key)?;
    mutate(&mut data);
    self.set(key, &data);
    Some(data)
  }

  /// Read-through fetch.
  ///
  /// 1. Fresh cache entry - return it without touching the network
  /// 2. Offline - return the expired entry if there is one
  /// 3. Otherwise fetch; store and return the result
  /// 4. On a connectivity failure return the expired entry (offline mode)
  ///
  /// `Ok(None)` means neither the cache nor the store has a value. A fetcher
  /// answering `Ok(None)` (document missing) also drops the cache entry.
  /// Errors that are not connectivity related are returned.
  pub async fn fetch<T, F, Fut>(&self, key: &str, fetcher: F) -> Result<Option<CacheResult<T>>, StoreError>
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Option<T>, StoreError>>,
  {
    let stale = match self.read_entry::<T>(key) {
      Some(entry) if self.is_fresh(&entry) => return Ok(Some(CacheResult::from_cache(entry))),
      other => other,
    };

    self.fetch_remote(key, stale, fetcher).await
  }

  /// Like `fetch`, but a cache hit also schedules a background refresh so
  /// the next read finds a warm entry. The refresh is tracked in `tasks()`.
  pub async fn fetch_with_refresh<T, F, Fut>(
    &self,
    key: &str,
    fetcher: F,
  ) -> Result<Option<CacheResult<T>>, StoreError>
  where
    T: Serialize + DeserializeOwned + Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Option<T>, StoreError>> + Send + 'static,
  {
    match self.read_entry::<T>(key) {
      Some(entry) if self.is_fresh(&entry) => {
        if self.network.is_online() {
          self.spawn_refresh(key.to_string(), fetcher);
        }
        Ok(Some(CacheResult::from_cache(entry)))
      }
      stale => self.fetch_remote(key, stale, fetcher).await,
    }
  }

  /// Fetch from the store even if the cached entry is fresh.
  ///
  /// The cached entry is kept as the fallback, so a connectivity failure
  /// (or being offline) still serves it, flagged `Offline`.
  pub async fn refetch<T, F, Fut>(&self, key: &str, fetcher: F) -> Result<Option<CacheResult<T>>, StoreError>
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Option<T>, StoreError>>,
  {
    let cached = self.read_entry::<T>(key);
    self.fetch_remote(key, cached, fetcher).await
  }

  async fn fetch_remote<T, F, Fut>(
    &self,
    key: &str,
    stale: Option<CachedEntry<T>>,
    fetcher: F,
  ) -> Result<Option<CacheResult<T>>, StoreError>
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Option<T>, StoreError>>,
  {
    if !self.network.is_online() {
      debug!("Offline, serving {} from cache", key);
      return Ok(stale.map(CacheResult::offline));
    }

    match fetcher().await {
      Ok(Some(data)) => {
        self.set(key, &data);
        Ok(Some(CacheResult::from_network(data)))
      }
      Ok(None) => {
        self.remove(key);
        Ok(None)
      }
      Err(e) if e.is_connectivity() => {
        warn!("Fetching {} failed, using cached data: {}", key, e);
        Ok(stale.map(CacheResult::offline))
      }
      Err(e) => Err(e),
    }
  }

  fn spawn_refresh<T, F, Fut>(&self, key: String, fetcher: F)
  where
    T: Serialize + Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Option<T>, StoreError>> + Send + 'static,
  {
    let cache = self.clone();
    self.tasks.spawn(async move {
      match fetcher().await {
        Ok(Some(data)) => {
          cache.set(&key, &data);
          debug!("Refreshed cache {}", key);
        }
        Ok(None) => cache.remove(&key),
        Err(e) => debug!("Background refresh of {} failed: {}", key, e),
      }
    });
  }
}
