//! Tracked background work (cache refreshes).

use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use tracing::debug;

/// Set of spawned background tasks that can be awaited or cancelled.
#[derive(Clone, Default)]
pub struct BackgroundTasks {
  set: Arc<Mutex<JoinSet<()>>>,
}

impl BackgroundTasks {
  pub fn new() -> Self {
    Self::default()
  }

  /// Spawn `task` onto the current runtime and track it.
  pub fn spawn<F>(&self, task: F)
  where
    F: Future<Output = ()> + Send + 'static,
  {
    let mut set = self.set.lock().unwrap_or_else(|e| e.into_inner());
    // Reap whatever already finished so the set doesn't grow unbounded
    while set.try_join_next().is_some() {}
    set.spawn(task);
  }

  /// Number of tasks not yet reaped.
  pub fn len(&self) -> usize {
    self.set.lock().unwrap_or_else(|e| e.into_inner()).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Wait for every tracked task to finish.
  pub async fn join_all(&self) {
    let mut set = self.take();
    while set.join_next().await.is_some() {}
  }

  /// Cancel every tracked task and wait for them to unwind.
  pub async fn shutdown(&self) {
    let mut set = self.take();
    if !set.is_empty() {
      debug!("Cancelling {} background task(s)", set.len());
    }
    set.abort_all();
    while set.join_next().await.is_some() {}
  }

  fn take(&self) -> JoinSet<()> {
    std::mem::take(&mut *self.set.lock().unwrap_or_else(|e| e.into_inner()))
  }
}
