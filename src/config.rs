use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::{Backoff, RetryPolicy};

/// Meeting room used when the config doesn't name one.
pub const DEFAULT_ROOM_ID: &str = "kamustahan01";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub firestore: FirestoreConfig,
  /// The single meeting room of this deployment
  #[serde(default = "default_room_id")]
  pub room_id: String,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub retry: RetryConfig,
  /// Who is running the client; used when creating missing user documents
  pub identity: Option<Identity>,
  #[serde(default)]
  pub log: LogConfig,
}

fn default_room_id() -> String {
  DEFAULT_ROOM_ID.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct FirestoreConfig {
  pub project_id: String,
  #[serde(default = "default_database")]
  pub database: String,
  /// Web API key, sent as the `key` query parameter
  pub api_key: Option<String>,
  #[serde(default = "default_base_url")]
  pub base_url: String,
  /// How often watched documents are polled for changes
  #[serde(default = "default_poll_interval")]
  pub poll_interval_secs: u64,
  #[serde(default = "default_timeout")]
  pub timeout_secs: u64,
}

fn default_database() -> String {
  "(default)".to_string()
}

fn default_base_url() -> String {
  "https://firestore.googleapis.com".to_string()
}

fn default_poll_interval() -> u64 {
  5
}

fn default_timeout() -> u64 {
  15
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  #[serde(default = "default_true")]
  pub enabled: bool,
  #[serde(default = "default_ttl")]
  pub ttl_secs: u64,
  /// SQLite file (default: $XDG_DATA_HOME/pcmi/cache.db)
  pub path: Option<PathBuf>,
  /// Refresh entries in the background after serving them from cache
  #[serde(default)]
  pub refresh_on_hit: bool,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      ttl_secs: default_ttl(),
      path: None,
      refresh_on_hit: false,
    }
  }
}

impl CacheConfig {
  pub fn ttl(&self) -> Duration {
    Duration::from_secs(self.ttl_secs)
  }
}

fn default_true() -> bool {
  true
}

fn default_ttl() -> u64 {
  180
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
  #[serde(default = "default_max_attempts")]
  pub max_attempts: u32,
  #[serde(default = "default_base_delay")]
  pub base_delay_ms: u64,
  #[serde(default)]
  pub backoff: Backoff,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      max_attempts: default_max_attempts(),
      base_delay_ms: default_base_delay(),
      backoff: Backoff::default(),
    }
  }
}

impl RetryConfig {
  pub fn policy(&self) -> RetryPolicy {
    RetryPolicy::new(self.max_attempts, Duration::from_millis(self.base_delay_ms))
      .with_backoff(self.backoff)
  }
}

fn default_max_attempts() -> u32 {
  2
}

fn default_base_delay() -> u64 {
  1000
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Identity {
  pub uid: String,
  pub email: Option<String>,
  pub display_name: Option<String>,
  pub photo_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
  /// `tracing` filter directive; `RUST_LOG` takes precedence
  #[serde(default = "default_log_filter")]
  pub filter: String,
  /// Write logs to this file instead of stderr
  pub file: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      filter: default_log_filter(),
      file: None,
    }
  }
}

fn default_log_filter() -> String {
  "warn,pcmi_sync=info".to_string()
}

impl Config {
  /// Files tried when no `--config` is given, in order.
  fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("pcmi.yaml")];
    paths.extend(dirs::config_dir().map(|dir| dir.join("pcmi").join("config.yaml")));
    paths
  }

  /// Load the explicit `path`, or the first existing file of
  /// `./pcmi.yaml` and `$XDG_CONFIG_HOME/pcmi/config.yaml`.
  pub fn load(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::search_paths()
        .into_iter()
        .find(|p| p.is_file())
        .ok_or_else(|| {
          eyre!(
            "No pcmi config found (tried ./pcmi.yaml and the pcmi/config.yaml user config); \
             it needs at least `firestore: {{ project_id: <id> }}`"
          )
        })?,
    };

    let contents = std::fs::read_to_string(&path)
      .map_err(|e| eyre!("Cannot read config {}: {}", path.display(), e))?;
    Self::parse(&contents).map_err(|e| eyre!("Invalid config {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Get the Firebase ID token from environment variables.
  ///
  /// Checks PCMI_FIRESTORE_TOKEN first, then FIREBASE_ID_TOKEN as fallback.
  /// Without a token requests go out unauthenticated and are subject to the
  /// database's public rules.
  pub fn get_id_token() -> Option<String> {
    std::env::var("PCMI_FIRESTORE_TOKEN")
      .or_else(|_| std::env::var("FIREBASE_ID_TOKEN"))
      .ok()
      .filter(|t| !t.is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::parse("firestore:\n  project_id: pcmi-prod\n").unwrap();

    assert_eq!(config.firestore.database, "(default)");
    assert_eq!(config.firestore.poll_interval_secs, 5);
    assert_eq!(config.room_id, DEFAULT_ROOM_ID);
    assert!(config.cache.enabled);
    assert_eq!(config.cache.ttl(), Duration::from_secs(180));
    assert_eq!(config.retry.policy(), RetryPolicy::default());
    assert!(config.identity.is_none());
  }

  #[test]
  fn test_full_config() {
    let config = Config::parse(
      r#"
firestore:
  project_id: pcmi-prod
  api_key: abc
  poll_interval_secs: 2
room_id: lobby
cache:
  enabled: false
  ttl_secs: 300
  refresh_on_hit: true
retry:
  max_attempts: 4
  base_delay_ms: 250
  backoff: exponential
identity:
  uid: u1
  email: ana@example.com
log:
  filter: debug
"#,
    )
    .unwrap();

    assert_eq!(config.firestore.api_key.as_deref(), Some("abc"));
    assert_eq!(config.room_id, "lobby");
    assert!(!config.cache.enabled);
    assert!(config.cache.refresh_on_hit);
    assert_eq!(config.retry.max_attempts, 4);
    assert_eq!(config.retry.backoff, Backoff::Exponential);
    assert_eq!(config.identity.unwrap().uid, "u1");
    assert_eq!(config.log.filter, "debug");
  }

  #[test]
  fn test_search_starts_in_working_directory() {
    assert_eq!(Config::search_paths()[0], PathBuf::from("pcmi.yaml"));
  }

  #[test]
  fn test_explicit_missing_file_is_an_error() {
    let err = Config::load(Some(Path::new("/nonexistent/pcmi.yaml"))).unwrap_err();
    assert!(err.to_string().contains("/nonexistent/pcmi.yaml"));
  }

  #[test]
  fn test_missing_project_is_an_error() {
    assert!(Config::parse("room_id: lobby\n").is_err());
  }
}
