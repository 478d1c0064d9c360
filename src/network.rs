//! Online/offline signal.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

/// Shared reachability flag with change notification.
#[derive(Clone)]
pub struct NetworkMonitor {
  state: Arc<watch::Sender<bool>>,
}

impl NetworkMonitor {
  pub fn new(online: bool) -> Self {
    let (state, _) = watch::channel(online);
    Self {
      state: Arc::new(state),
    }
  }

  pub fn is_online(&self) -> bool {
    *self.state.borrow()
  }

  /// Record the current reachability. Returns true if it changed.
  pub fn set_online(&self, online: bool) -> bool {
    self.state.send_if_modified(|current| {
      if *current == online {
        false
      } else {
        *current = online;
        true
      }
    })
  }

  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.state.subscribe()
  }

  /// Log every transition until the monitor is dropped.
  pub async fn log_transitions(self) {
    let mut changes = self.subscribe();
    drop(self);
    while changes.changed().await.is_ok() {
      if *changes.borrow_and_update() {
        info!("Network connection restored");
      } else {
        info!("Network connection lost");
      }
    }
  }

  /// Re-evaluate reachability with `check` every `period`, forever.
  pub async fn poll<F, Fut>(self, period: Duration, mut check: F)
  where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
  {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
      ticker.tick().await;
      self.set_online(check().await);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_set_online_reports_changes() {
    let network = NetworkMonitor::new(true);
    assert!(!network.set_online(true));
    assert!(network.set_online(false));
    assert!(!network.is_online());
  }

  #[tokio::test]
  async fn test_subscribers_see_transitions() {
    let network = NetworkMonitor::new(true);
    let mut changes = network.subscribe();

    network.set_online(false);
    changes.changed().await.unwrap();
    assert!(!*changes.borrow_and_update());
  }

  #[tokio::test]
  async fn test_poll_applies_check_result() {
    let network = NetworkMonitor::new(true);
    let task = tokio::spawn(network.clone().poll(Duration::from_millis(5), || async { false }));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!network.is_online());
    task.abort();
  }
}
