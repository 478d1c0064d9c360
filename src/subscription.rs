//! Bridge between a document change feed and the cache.
//!
//! A subscriber hears the cached value first, synchronously, and then every
//! change the feed reports. Each change is written through to the cache.
//! There is no buffering or replay: the latest value wins.

use futures::StreamExt;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::CacheLayer;
use crate::store::{DocumentStream, Fields, StoreError};

/// Lifecycle of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
  /// Not attached to a feed (never was, detached, or the feed ended)
  Unsubscribed,
  /// Attached, waiting for the first snapshot
  Subscribing,
  /// The feed has delivered at least one snapshot
  Live,
}

/// Handle to a live subscription. Dropping it unsubscribes.
pub struct Subscription {
  state: Arc<Mutex<SubscriptionState>>,
  task: Option<JoinHandle<()>>,
}

fn lock(state: &Mutex<SubscriptionState>) -> MutexGuard<'_, SubscriptionState> {
  state.lock().unwrap_or_else(|e| e.into_inner())
}

impl Subscription {
  fn detached() -> Self {
    Self {
      state: Arc::new(Mutex::new(SubscriptionState::Unsubscribed)),
      task: None,
    }
  }

  pub fn state(&self) -> SubscriptionState {
    *lock(&self.state)
  }

  pub fn is_live(&self) -> bool {
    self.state() == SubscriptionState::Live
  }

  /// Detach from the feed. No callback runs once this returns.
  pub fn unsubscribe(mut self) {
    self.detach();
  }

  fn detach(&mut self) {
    // Callbacks run while holding this lock, so taking it waits out any in-flight one
    *lock(&self.state) = SubscriptionState::Unsubscribed;
    if let Some(task) = self.task.take() {
      task.abort();
    }
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    self.detach();
  }
}

/// Subscribe to `key`.
///
/// `on_change` is called with the fresh cached value, if any, before this
/// function returns. When `feed` is given, a task follows it: snapshots are
/// decoded, cached and passed on; a missing document clears the cache entry
/// and is passed on as `None`. Feed errors and undecodable snapshots are
/// logged and skipped.
///
/// `on_change` must not drop or unsubscribe its own handle.
pub fn subscribe<T, D, F>(
  cache: &CacheLayer,
  key: &str,
  feed: Option<DocumentStream>,
  decode: D,
  mut on_change: F,
) -> Subscription
where
  T: Serialize + DeserializeOwned + Send + 'static,
  D: Fn(Fields) -> Result<T, StoreError> + Send + 'static,
  F: FnMut(Option<T>) + Send + 'static,
{
  if let Some(cached) = cache.get::<T>(key) {
    on_change(Some(cached));
  }

  let Some(mut feed) = feed else {
    debug!("No change feed for {}, serving cache only", key);
    return Subscription::detached();
  };

  let state = Arc::new(Mutex::new(SubscriptionState::Subscribing));
  let task = tokio::spawn({
    let state = state.clone();
    let cache = cache.clone();
    let key = key.to_string();

    async move {
      while let Some(item) = feed.next().await {
        let attached = {
          let mut current = lock(&state);
          if *current == SubscriptionState::Unsubscribed {
            false
          } else {
            if item.is_ok() {
              *current = SubscriptionState::Live;
            }
            match item {
              Ok(Some(fields)) => match decode(fields) {
                Ok(value) => {
                  cache.set(&key, &value);
                  on_change(Some(value));
                }
                Err(e) => warn!("Ignoring undecodable snapshot for {}: {}", key, e),
              },
              Ok(None) => {
                cache.remove(&key);
                on_change(None);
              }
              Err(e) => warn!("{} listener error: {}", key, e),
            }
            true
          }
        };

        if !attached {
          return;
        }
      }

      debug!("Change feed for {} ended", key);
      *lock(&state) = SubscriptionState::Unsubscribed;
    }
  });

  Subscription {
    state,
    task: Some(task),
  }
}
