//! Remote document store abstraction.
//!
//! The cache layer only needs a handful of primitives from the source of
//! truth: read one document, write one document (overwrite or merge),
//! update an existing document, scan a collection, and follow changes to a
//! single document.

mod firestore;
mod memory;
pub mod value;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

pub use firestore::FirestoreStore;
pub use memory::MemoryStore;

/// Field map of a single document.
pub type Fields = Map<String, Value>;

/// Stream of snapshots for one document. `None` means the document does not exist.
pub type DocumentStream = BoxStream<'static, Result<Option<Fields>, StoreError>>;

/// Path of a document inside a top-level collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocPath {
  pub collection: String,
  pub id: String,
}

impl DocPath {
  pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
    Self {
      collection: collection.into(),
      id: id.into(),
    }
  }
}

impl fmt::Display for DocPath {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.collection, self.id)
  }
}

/// How `set` treats fields already present on the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetMode {
  /// Replace the whole document
  Overwrite,
  /// Only touch the given fields; create the document if missing
  Merge,
}

/// Errors from the remote store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
  #[error("store unavailable: {0}")]
  Unavailable(String),

  #[error("client is offline")]
  Offline,

  #[error("permission denied: {0}")]
  PermissionDenied(String),

  #[error("document not found: {0}")]
  NotFound(String),

  #[error("malformed document {path}: {reason}")]
  Malformed { path: String, reason: String },

  #[error("store error: {0}")]
  Other(String),

  #[error("operation failed after {attempts} attempts: {last}")]
  RetriesExhausted {
    attempts: u32,
    last: Box<StoreError>,
  },
}

impl StoreError {
  /// Network-unavailable or offline failures. Only these are retried.
  pub fn is_transient(&self) -> bool {
    matches!(self, StoreError::Unavailable(_) | StoreError::Offline)
  }

  /// Failures caused by connectivity, including retries that ran out on one.
  pub fn is_connectivity(&self) -> bool {
    match self {
      StoreError::RetriesExhausted { last, .. } => last.is_connectivity(),
      e => e.is_transient(),
    }
  }

  pub fn malformed(path: &DocPath, reason: impl fmt::Display) -> Self {
    StoreError::Malformed {
      path: path.to_string(),
      reason: reason.to_string(),
    }
  }
}

impl From<reqwest::Error> for StoreError {
  fn from(e: reqwest::Error) -> Self {
    if e.is_connect() || e.is_timeout() {
      StoreError::Unavailable(e.to_string())
    } else if e.is_decode() {
      StoreError::Other(format!("invalid response body: {}", e))
    } else {
      StoreError::Other(e.to_string())
    }
  }
}

/// Operations the cache layer needs from the source of truth.
#[async_trait]
pub trait DocumentStore: Send + Sync {
  /// Read a document. `Ok(None)` if it does not exist.
  async fn get(&self, doc: &DocPath) -> Result<Option<Fields>, StoreError>;

  async fn set(&self, doc: &DocPath, fields: Fields, mode: SetMode) -> Result<(), StoreError>;

  /// Patch fields of an existing document. Fails with `NotFound` if it is missing.
  async fn update(&self, doc: &DocPath, fields: Fields) -> Result<(), StoreError>;

  /// All documents in a collection as `(id, fields)` pairs.
  async fn list(&self, collection: &str) -> Result<Vec<(String, Fields)>, StoreError>;

  /// Follow a document. The first item is the current snapshot.
  fn watch(&self, doc: &DocPath) -> DocumentStream;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_transient_classification() {
    assert!(StoreError::Unavailable("503".into()).is_transient());
    assert!(StoreError::Offline.is_transient());
    assert!(!StoreError::PermissionDenied("rules".into()).is_transient());
    assert!(!StoreError::NotFound("users/u1".into()).is_transient());
    assert!(!StoreError::RetriesExhausted {
      attempts: 2,
      last: Box::new(StoreError::Offline),
    }
    .is_transient());
  }

  #[test]
  fn test_exhausted_network_failure_is_connectivity() {
    let exhausted = StoreError::RetriesExhausted {
      attempts: 2,
      last: Box::new(StoreError::Unavailable("503".into())),
    };
    assert!(exhausted.is_connectivity());
    assert!(!StoreError::Other("bad request".into()).is_connectivity());
  }

  #[test]
  fn test_doc_path_display() {
    assert_eq!(DocPath::new("meetings", "kamustahan01").to_string(), "meetings/kamustahan01");
  }
}
