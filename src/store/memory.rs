//! In-memory document store with a change feed.
//!
//! Stands in for the remote store in tests. Every operation counts as one
//! remote call, and failures can be queued to make the next calls fail.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::broadcast;

use super::{DocPath, DocumentStore, DocumentStream, Fields, SetMode, StoreError};

type Change = (DocPath, Option<Fields>);

pub struct MemoryStore {
  documents: Mutex<BTreeMap<String, BTreeMap<String, Fields>>>,
  changes: broadcast::Sender<Change>,
  failures: Mutex<VecDeque<StoreError>>,
  calls: AtomicUsize,
}

impl Default for MemoryStore {
  fn default() -> Self {
    Self::new()
  }
}

impl MemoryStore {
  pub fn new() -> Self {
    let (changes, _) = broadcast::channel(64);
    Self {
      documents: Mutex::new(BTreeMap::new()),
      changes,
      failures: Mutex::new(VecDeque::new()),
      calls: AtomicUsize::new(0),
    }
  }

  /// Make the next remote call fail with `error`. Queued failures are consumed in order.
  pub fn fail_next(&self, error: StoreError) {
    self
      .failures
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .push_back(error);
  }

  /// Number of remote calls made so far (successful or not).
  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  /// Seed a document without counting a call. Watchers are notified.
  pub fn insert(&self, doc: &DocPath, fields: Fields) {
    self.write(doc, Some(fields));
  }

  /// Delete a document without counting a call. Watchers are notified.
  pub fn delete(&self, doc: &DocPath) {
    self.write(doc, None);
  }

  /// Current contents of a document, without counting a call.
  pub fn peek(&self, doc: &DocPath) -> Option<Fields> {
    self.read(doc)
  }

  fn begin_call(&self) -> Result<(), StoreError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    match self
      .failures
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .pop_front()
    {
      Some(error) => Err(error),
      None => Ok(()),
    }
  }

  fn read(&self, doc: &DocPath) -> Option<Fields> {
    let documents = self.documents.lock().unwrap_or_else(|e| e.into_inner());
    documents
      .get(&doc.collection)
      .and_then(|c| c.get(&doc.id))
      .cloned()
  }

  fn write(&self, doc: &DocPath, fields: Option<Fields>) {
    {
      let mut documents = self.documents.lock().unwrap_or_else(|e| e.into_inner());
      let collection = documents.entry(doc.collection.clone()).or_default();
      match &fields {
        Some(f) => {
          collection.insert(doc.id.clone(), f.clone());
        }
        None => {
          collection.remove(&doc.id);
        }
      }
    }
    // No receivers is fine
    let _ = self.changes.send((doc.clone(), fields));
  }
}

#[async_trait]
impl DocumentStore for MemoryStore {
  async fn get(&self, doc: &DocPath) -> Result<Option<Fields>, StoreError> {
    self.begin_call()?;
    Ok(self.read(doc))
  }

  async fn set(&self, doc: &DocPath, fields: Fields, mode: SetMode) -> Result<(), StoreError> {
    self.begin_call()?;
    let merged = match (mode, self.read(doc)) {
      (SetMode::Merge, Some(mut existing)) => {
        existing.extend(fields);
        existing
      }
      _ => fields,
    };
    self.write(doc, Some(merged));
    Ok(())
  }

  async fn update(&self, doc: &DocPath, fields: Fields) -> Result<(), StoreError> {
    self.begin_call()?;
    let mut existing = self
      .read(doc)
      .ok_or_else(|| StoreError::NotFound(doc.to_string()))?;
    existing.extend(fields);
    self.write(doc, Some(existing));
    Ok(())
  }

  async fn list(&self, collection: &str) -> Result<Vec<(String, Fields)>, StoreError> {
    self.begin_call()?;
    let documents = self.documents.lock().unwrap_or_else(|e| e.into_inner());
    Ok(
      documents
        .get(collection)
        .map(|c| c.iter().map(|(id, f)| (id.clone(), f.clone())).collect())
        .unwrap_or_default(),
    )
  }

  fn watch(&self, doc: &DocPath) -> DocumentStream {
    // Subscribe before reading so no change between the two is lost
    let receiver = self.changes.subscribe();
    let initial = self.read(doc);
    let target = doc.clone();

    let changes = stream::unfold(receiver, move |mut receiver| {
      let target = target.clone();
      async move {
        loop {
          match receiver.recv().await {
            Ok((path, fields)) if path == target => return Some((Ok(fields), receiver)),
            Ok(_) => continue,
            // Latest value wins; skipped snapshots are not replayed
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return None,
          }
        }
      }
    });

    stream::once(async move { Ok(initial) })
      .chain(changes)
      .boxed()
  }
}
