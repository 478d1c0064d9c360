//! Bounded retry with backoff for transient store failures.

use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::store::StoreError;

/// Default total number of attempts (one initial call plus one retry).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

/// Default delay before the first retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
  /// `base * k` before attempt `k + 1`
  #[default]
  Linear,
  /// `base * 2^(k-1)` before attempt `k + 1`
  Exponential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Total invocations, including the first one. Never less than one.
  pub max_attempts: u32,
  pub base_delay: Duration,
  pub backoff: Backoff,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: DEFAULT_MAX_ATTEMPTS,
      base_delay: DEFAULT_BASE_DELAY,
      backoff: Backoff::Linear,
    }
  }
}

impl RetryPolicy {
  pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
    Self {
      max_attempts,
      base_delay,
      backoff: Backoff::Linear,
    }
  }

  pub fn with_backoff(mut self, backoff: Backoff) -> Self {
    self.backoff = backoff;
    self
  }

  /// Delay to wait after the `attempt`-th failed call (1-based).
  pub fn delay_after(&self, attempt: u32) -> Duration {
    let attempt = attempt.max(1);
    match self.backoff {
      Backoff::Linear => self.base_delay.saturating_mul(attempt),
      Backoff::Exponential => self
        .base_delay
        .saturating_mul(2u32.saturating_pow(attempt - 1)),
    }
  }

  /// Run `operation` under this policy.
  pub async fn run<T, F, Fut>(&self, operation: F) -> Result<T, StoreError>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
  {
    retry(operation, self.max_attempts, self.base_delay, self.backoff).await
  }
}

/// Invoke `operation` until it succeeds, fails with a non-transient error,
/// or `max_attempts` calls have been made.
///
/// Non-transient errors are returned as-is after a single call. Running out
/// of attempts yields `StoreError::RetriesExhausted` wrapping the last error.
pub async fn retry<T, F, Fut>(
  mut operation: F,
  max_attempts: u32,
  base_delay: Duration,
  backoff: Backoff,
) -> Result<T, StoreError>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T, StoreError>>,
{
  let policy = RetryPolicy {
    max_attempts: max_attempts.max(1),
    base_delay,
    backoff,
  };
  let mut attempt = 0;

  loop {
    attempt += 1;
    match operation().await {
      Ok(result) => return Ok(result),
      Err(e) if !e.is_transient() => return Err(e),
      Err(e) if attempt >= policy.max_attempts => {
        return Err(StoreError::RetriesExhausted {
          attempts: attempt,
          last: Box::new(e),
        });
      }
      Err(e) => {
        let delay = policy.delay_after(attempt);
        warn!(
          "Operation failed (attempt {}/{}): {}, retrying in {:?}",
          attempt, policy.max_attempts, e, delay
        );
        tokio::time::sleep(delay).await;
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Arc;

  /// Operation that fails transiently `failures` times, then returns its call count.
  fn flaky(failures: u32, calls: Arc<AtomicU32>) -> impl FnMut() -> futures::future::Ready<Result<u32, StoreError>> {
    move || {
      let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
      if n <= failures {
        futures::future::ready(Err(StoreError::Unavailable("offline".into())))
      } else {
        futures::future::ready(Ok(n))
      }
    }
  }

  #[tokio::test]
  async fn test_succeeds_when_failures_below_max_attempts() {
    let calls = Arc::new(AtomicU32::new(0));
    let result = retry(flaky(2, calls.clone()), 3, Duration::from_millis(1), Backoff::Linear).await;

    assert_eq!(result.unwrap(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn test_exhausts_when_failures_reach_max_attempts() {
    let calls = Arc::new(AtomicU32::new(0));
    let result = retry(flaky(2, calls.clone()), 2, Duration::from_millis(1), Backoff::Linear).await;

    match result {
      Err(StoreError::RetriesExhausted { attempts, last }) => {
        assert_eq!(attempts, 2);
        assert!(last.is_transient());
      }
      other => panic!("expected exhaustion, got {:?}", other),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_non_network_error_fails_after_one_call() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();

    let result: Result<(), _> = retry(
      move || {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Err(StoreError::PermissionDenied("users/u1".into())) }
      },
      2,
      Duration::from_millis(500),
      Backoff::Linear,
    )
    .await;

    assert!(matches!(result, Err(StoreError::PermissionDenied(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_zero_attempts_still_calls_once() {
    let calls = Arc::new(AtomicU32::new(0));
    let result = retry(flaky(0, calls.clone()), 0, Duration::ZERO, Backoff::Linear).await;
    assert_eq!(result.unwrap(), 1);
  }

  #[test]
  fn test_linear_delays() {
    let policy = RetryPolicy::new(4, Duration::from_millis(500));
    assert_eq!(policy.delay_after(1), Duration::from_millis(500));
    assert_eq!(policy.delay_after(2), Duration::from_millis(1000));
    assert_eq!(policy.delay_after(3), Duration::from_millis(1500));
  }

  #[test]
  fn test_exponential_delays() {
    let policy = RetryPolicy::new(4, Duration::from_millis(100)).with_backoff(Backoff::Exponential);
    assert_eq!(policy.delay_after(1), Duration::from_millis(100));
    assert_eq!(policy.delay_after(2), Duration::from_millis(200));
    assert_eq!(policy.delay_after(3), Duration::from_millis(400));
  }
}
