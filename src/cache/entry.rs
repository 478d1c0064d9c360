//! Cached entry envelope, clocks, and cache result metadata.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// A value as it is persisted in the key-value store.
///
/// Serialized as `{"data": ..., "timestamp": <epoch millis>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedEntry<T> {
  pub data: T,
  pub timestamp: i64,
}

impl<T> CachedEntry<T> {
  pub fn new(data: T, timestamp: i64) -> Self {
    Self { data, timestamp }
  }

  /// An entry is valid iff `0 <= now - timestamp <= ttl`.
  ///
  /// Timestamps in the future or too far off to subtract are invalid.
  pub fn is_valid(&self, now: i64, ttl: Duration) -> bool {
    let ttl = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    match now.checked_sub(self.timestamp) {
      Some(age) => (0..=ttl).contains(&age),
      None => false,
    }
  }

  /// When the entry was written, if the timestamp is representable.
  pub fn cached_at(&self) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(self.timestamp).single()
  }
}

/// Source of "now" for cache expiry decisions.
pub trait Clock: Send + Sync {
  /// Current time in milliseconds since the Unix epoch.
  fn now_millis(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now_millis(&self) -> i64 {
    Utc::now().timestamp_millis()
  }
}

/// A clock that only moves when told to. Used by tests.
#[derive(Debug, Default)]
pub struct ManualClock {
  now: AtomicI64,
}

impl ManualClock {
  pub fn new(start_millis: i64) -> Self {
    Self {
      now: AtomicI64::new(start_millis),
    }
  }

  pub fn advance(&self, by: Duration) {
    self.now.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
  }

  pub fn set(&self, millis: i64) {
    self.now.store(millis, Ordering::SeqCst);
  }
}

impl Clock for ManualClock {
  fn now_millis(&self) -> i64 {
    self.now.load(Ordering::SeqCst)
  }
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from a fresh cache entry.
  pub fn from_cache(entry: CachedEntry<T>) -> Self {
    let cached_at = entry.cached_at();
    Self {
      data: entry.data,
      source: CacheSource::CacheFresh,
      cached_at,
    }
  }

  /// Create a new cache result for offline mode (expired entry served as fallback).
  pub fn offline(entry: CachedEntry<T>) -> Self {
    let cached_at = entry.cached_at();
    Self {
      data: entry.data,
      source: CacheSource::Offline,
      cached_at,
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still within its TTL
  CacheFresh,
  /// Network unavailable or failing, serving whatever was cached last
  Offline,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_entry_valid_through_ttl_boundary() {
    let ttl = Duration::from_secs(180);
    let entry = CachedEntry::new(true, 1_000);

    assert!(entry.is_valid(1_000, ttl));
    assert!(entry.is_valid(1_000 + 180_000, ttl));
    assert!(!entry.is_valid(1_000 + 180_001, ttl));
  }

  #[test]
  fn test_entry_from_the_future_is_invalid() {
    let entry = CachedEntry::new(true, 10_000);
    assert!(!entry.is_valid(9_999, Duration::from_secs(180)));
  }

  #[test]
  fn test_extreme_timestamps_do_not_overflow() {
    let ttl = Duration::from_secs(180);
    assert!(!CachedEntry::new(true, i64::MIN).is_valid(1_000, ttl));
    assert!(!CachedEntry::new(true, i64::MAX).is_valid(-1_000, ttl));
  }

  #[test]
  fn test_huge_ttl_saturates() {
    let entry = CachedEntry::new(true, 0);
    assert!(entry.is_valid(1_700_000_000_000, Duration::from_secs(u64::MAX)));
  }

  #[test]
  fn test_entry_wire_format() {
    let entry = CachedEntry::new(vec![1, 2], 42);
    let json = serde_json::to_string(&entry).unwrap();
    assert_eq!(json, r#"{"data":[1,2],"timestamp":42}"#);
  }

  #[test]
  fn test_manual_clock_advances() {
    let clock = ManualClock::new(10);
    clock.advance(Duration::from_secs(1));
    assert_eq!(clock.now_millis(), 1_010);
    clock.set(5);
    assert_eq!(clock.now_millis(), 5);
  }

  #[test]
  fn test_offline_result_keeps_timestamp() {
    let result = CacheResult::offline(CachedEntry::new("x", 0));
    assert_eq!(result.source, CacheSource::Offline);
    assert_eq!(result.cached_at, Utc.timestamp_millis_opt(0).single());
  }
}
