//! Persistent string key-value store trait and its backends.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Trait for local key-value backends.
///
/// String-only and synchronous. There are no transactions: a read followed
/// by a write can race with another writer, and the last writer wins.
pub trait KeyValueStore: Send + Sync {
  fn get(&self, key: &str) -> Result<Option<String>>;

  fn set(&self, key: &str, value: &str) -> Result<()>;

  fn remove(&self, key: &str) -> Result<()>;

  /// Drop every key.
  fn clear(&self) -> Result<()>;
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopKv;

impl KeyValueStore for NoopKv {
  fn get(&self, _key: &str) -> Result<Option<String>> {
    Ok(None) // Always miss
  }

  fn set(&self, _key: &str, _value: &str) -> Result<()> {
    Ok(()) // Discard
  }

  fn remove(&self, _key: &str) -> Result<()> {
    Ok(())
  }

  fn clear(&self) -> Result<()> {
    Ok(())
  }
}

/// In-process map. Lost on exit; used by tests.
#[derive(Default)]
pub struct MemoryKv {
  entries: Mutex<HashMap<String, String>>,
}

impl MemoryKv {
  pub fn new() -> Self {
    Self::default()
  }

  fn entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
    self.entries.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl KeyValueStore for MemoryKv {
  fn get(&self, key: &str) -> Result<Option<String>> {
    Ok(self.entries()?.get(key).cloned())
  }

  fn set(&self, key: &str, value: &str) -> Result<()> {
    self.entries()?.insert(key.to_string(), value.to_string());
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    self.entries()?.remove(key);
    Ok(())
  }

  fn clear(&self) -> Result<()> {
    self.entries()?.clear();
    Ok(())
  }
}

/// SQLite-backed key-value store.
pub struct SqliteKv {
  conn: Mutex<Connection>,
}

/// Schema for the key-value table.
const KV_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv_cache (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    written_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl SqliteKv {
  /// Open the cache database at `path`, falling back to `default_path()`.
  /// Missing parent directories are created.
  pub fn open(path: Option<&Path>) -> Result<Self> {
    let path = path.map_or_else(Self::default_path, |p| Ok(p.to_path_buf()))?;
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
      std::fs::create_dir_all(dir)
        .map_err(|e| eyre!("Cannot create cache directory {}: {}", dir.display(), e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Cannot open cache database {}: {}", path.display(), e))?;
    Self::with_connection(conn)
  }

  /// Private in-memory database. Nothing survives the process.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory().map_err(|e| eyre!("Cannot open in-memory cache: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let kv = Self {
      conn: Mutex::new(conn),
    };
    kv.run_migrations()?;
    Ok(kv)
  }

  /// `pcmi/cache.db` under the platform data directory.
  pub fn default_path() -> Result<PathBuf> {
    dirs::data_dir()
      .map(|dir| dir.join("pcmi").join("cache.db"))
      .ok_or_else(|| eyre!("No data directory on this platform; set cache.path in the config"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self.conn()?;

    conn
      .execute_batch(KV_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl KeyValueStore for SqliteKv {
  fn get(&self, key: &str) -> Result<Option<String>> {
    let conn = self.conn()?;

    conn
      .query_row(
        "SELECT value FROM kv_cache WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache key {}: {}", key, e))
  }

  fn set(&self, key: &str, value: &str) -> Result<()> {
    let conn = self.conn()?;

    conn
      .execute(
        "INSERT OR REPLACE INTO kv_cache (key, value, written_at)
         VALUES (?, ?, datetime('now'))",
        params![key, value],
      )
      .map_err(|e| eyre!("Failed to write cache key {}: {}", key, e))?;

    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    let conn = self.conn()?;

    conn
      .execute("DELETE FROM kv_cache WHERE key = ?", params![key])
      .map_err(|e| eyre!("Failed to remove cache key {}: {}", key, e))?;

    Ok(())
  }

  fn clear(&self) -> Result<()> {
    let conn = self.conn()?;

    conn
      .execute("DELETE FROM kv_cache", [])
      .map_err(|e| eyre!("Failed to clear cache: {}", e))?;

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn exercise(store: &dyn KeyValueStore) {
    assert_eq!(store.get("a").unwrap(), None);

    store.set("a", "1").unwrap();
    store.set("b", "2").unwrap();
    assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));

    store.set("a", "3").unwrap();
    assert_eq!(store.get("a").unwrap().as_deref(), Some("3"));

    store.remove("a").unwrap();
    assert_eq!(store.get("a").unwrap(), None);

    store.clear().unwrap();
    assert_eq!(store.get("b").unwrap(), None);
  }

  #[test]
  fn test_memory_kv() {
    exercise(&MemoryKv::new());
  }

  #[test]
  fn test_sqlite_kv() {
    exercise(&SqliteKv::open_in_memory().unwrap());
  }

  #[test]
  fn test_sqlite_kv_persists_across_reopen() {
    let dir = std::env::temp_dir().join(format!("pcmi-kv-{}", std::process::id()));
    let path = dir.join("nested").join("cache.db");

    SqliteKv::open(Some(path.as_path())).unwrap().set("meeting_status", "{}").unwrap();
    let reopened = SqliteKv::open(Some(path.as_path())).unwrap();
    assert_eq!(reopened.get("meeting_status").unwrap().as_deref(), Some("{}"));

    drop(reopened);
    let _ = std::fs::remove_dir_all(dir);
  }

  #[test]
  fn test_noop_kv_always_misses() {
    let store = NoopKv;
    store.set("a", "1").unwrap();
    assert_eq!(store.get("a").unwrap(), None);
  }
}
