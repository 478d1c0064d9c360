//! Firestore REST document store.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use futures::stream::{self, StreamExt};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::debug;

use super::value::{decode_fields, encode_fields};
use super::{DocPath, DocumentStore, DocumentStream, Fields, SetMode, StoreError};
use crate::config::FirestoreConfig;

const PAGE_SIZE: u32 = 300;

/// Document store backed by the Firestore v1 REST API.
///
/// Change notification is done by polling the document at a fixed
/// interval and emitting only when its contents differ from the last
/// snapshot.
#[derive(Clone)]
pub struct FirestoreStore {
  client: reqwest::Client,
  documents_url: String,
  api_key: Option<String>,
  token: Option<String>,
  poll_interval: Duration,
}

#[derive(Debug, Deserialize)]
struct ApiDocument {
  name: String,
  #[serde(default)]
  fields: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiListResponse {
  #[serde(default)]
  documents: Vec<ApiDocument>,
  next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
  error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
  #[serde(default)]
  message: String,
  #[serde(default)]
  status: String,
}

impl FirestoreStore {
  pub fn new(config: &FirestoreConfig, token: Option<String>) -> Result<Self> {
    let base = url::Url::parse(&config.base_url)
      .map_err(|e| eyre!("Invalid Firestore base URL {}: {}", config.base_url, e))?;

    let documents_url = format!(
      "{}/v1/projects/{}/databases/{}/documents",
      base.as_str().trim_end_matches('/'),
      config.project_id,
      config.database
    );

    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      documents_url,
      api_key: config.api_key.clone(),
      token,
      poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
    })
  }

  /// Whether the Firestore endpoint answers at all. Any HTTP response counts.
  pub async fn reachable(&self) -> bool {
    match self.request(Method::GET, &self.documents_url).send().await {
      Ok(_) => true,
      Err(e) => {
        debug!("Firestore unreachable: {}", e);
        false
      }
    }
  }

  fn document_url(&self, doc: &DocPath) -> String {
    format!("{}/{}/{}", self.documents_url, doc.collection, doc.id)
  }

  fn request(&self, method: Method, url: &str) -> RequestBuilder {
    let mut builder = self.client.request(method, url);
    if let Some(token) = &self.token {
      builder = builder.bearer_auth(token);
    }
    if let Some(key) = &self.api_key {
      builder = builder.query(&[("key", key)]);
    }
    builder
  }

  async fn patch(
    &self,
    doc: &DocPath,
    fields: &Fields,
    mask: bool,
    must_exist: bool,
  ) -> Result<(), StoreError> {
    let query = patch_query(fields, mask, must_exist);
    let response = self
      .request(Method::PATCH, &self.document_url(doc))
      .query(&query)
      .json(&json!({ "fields": encode_fields(fields) }))
      .send()
      .await?;

    check_status(&doc.to_string(), response).await?;
    Ok(())
  }
}

/// Map an HTTP error status onto the store's error taxonomy.
async fn check_status(target: &str, response: Response) -> Result<Response, StoreError> {
  let status = response.status();
  if status.is_success() {
    return Ok(response);
  }

  let detail = match response.json::<ApiErrorBody>().await {
    Ok(body) if !body.error.message.is_empty() => {
      format!("{} ({})", body.error.message, body.error.status)
    }
    _ => status.to_string(),
  };
  let message = format!("{}: {}", target, detail);

  Err(classify(status, message))
}

fn classify(status: StatusCode, message: String) -> StoreError {
  match status {
    StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StoreError::PermissionDenied(message),
    StatusCode::NOT_FOUND => StoreError::NotFound(message),
    StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => StoreError::Unavailable(message),
    s if s.is_server_error() => StoreError::Unavailable(message),
    _ => StoreError::Other(message),
  }
}

/// Query parameters of a document PATCH.
///
/// With `mask` only the given fields are written (merge); without it the
/// document is replaced. `must_exist` makes Firestore reject the write when
/// the document is missing instead of creating it.
fn patch_query(fields: &Fields, mask: bool, must_exist: bool) -> Vec<(&'static str, String)> {
  let mut query = Vec::new();
  if mask {
    query.extend(fields.keys().map(|k| ("updateMask.fieldPaths", k.clone())));
  }
  if must_exist {
    query.push(("currentDocument.exists", "true".to_string()));
  }
  query
}

/// Remember `current` as the latest polled snapshot. Returns whether it
/// differs from the previous one; the first snapshot always does.
fn record_snapshot(last: &mut Option<Option<Fields>>, current: &Option<Fields>) -> bool {
  if last.as_ref() == Some(current) {
    return false;
  }
  *last = Some(current.clone());
  true
}

/// Document id is the last segment of the resource name.
fn document_id(name: &str) -> String {
  name.rsplit('/').next().unwrap_or(name).to_string()
}

#[async_trait]
impl DocumentStore for FirestoreStore {
  async fn get(&self, doc: &DocPath) -> Result<Option<Fields>, StoreError> {
    let response = self
      .request(Method::GET, &self.document_url(doc))
      .send()
      .await?;

    if response.status() == StatusCode::NOT_FOUND {
      return Ok(None);
    }

    let document: ApiDocument = check_status(&doc.to_string(), response)
      .await?
      .json()
      .await
      .map_err(|e| StoreError::malformed(doc, e))?;

    Ok(Some(decode_fields(&document.fields)))
  }

  async fn set(&self, doc: &DocPath, fields: Fields, mode: SetMode) -> Result<(), StoreError> {
    self
      .patch(doc, &fields, mode == SetMode::Merge, false)
      .await
  }

  async fn update(&self, doc: &DocPath, fields: Fields) -> Result<(), StoreError> {
    self.patch(doc, &fields, true, true).await
  }

  async fn list(&self, collection: &str) -> Result<Vec<(String, Fields)>, StoreError> {
    let url = format!("{}/{}", self.documents_url, collection);
    let mut all_documents = Vec::new();
    let mut page_token: Option<String> = None;

    loop {
      let mut query = vec![("pageSize", PAGE_SIZE.to_string())];
      if let Some(token) = &page_token {
        query.push(("pageToken", token.clone()));
      }

      let response = self.request(Method::GET, &url).query(&query).send().await?;
      let page: ApiListResponse = check_status(collection, response)
        .await?
        .json()
        .await
        .map_err(|e| StoreError::Malformed {
          path: collection.to_string(),
          reason: e.to_string(),
        })?;

      all_documents.extend(
        page
          .documents
          .into_iter()
          .map(|d| (document_id(&d.name), decode_fields(&d.fields))),
      );

      match page.next_page_token {
        Some(token) if !token.is_empty() => page_token = Some(token),
        _ => break,
      }
    }

    Ok(all_documents)
  }

  fn watch(&self, doc: &DocPath) -> DocumentStream {
    struct PollState {
      store: FirestoreStore,
      doc: DocPath,
      ticker: Option<Interval>,
      last: Option<Option<Fields>>,
    }

    let state = PollState {
      store: self.clone(),
      doc: doc.clone(),
      ticker: None,
      last: None,
    };

    stream::unfold(state, |mut state| async move {
      loop {
        let period = state.store.poll_interval;
        let ticker = state.ticker.get_or_insert_with(|| {
          let mut ticker = tokio::time::interval(period);
          ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
          ticker
        });
        ticker.tick().await;

        match state.store.get(&state.doc).await {
          Ok(current) => {
            if record_snapshot(&mut state.last, &current) {
              return Some((Ok(current), state));
            }
          }
          Err(e) => return Some((Err(e), state)),
        }
      }
    })
    .boxed()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn config() -> FirestoreConfig {
    serde_yaml::from_str("project_id: pcmi-test").unwrap()
  }

  #[test]
  fn test_document_url() {
    let store = FirestoreStore::new(&config(), None).unwrap();
    assert_eq!(
      store.document_url(&DocPath::new("users", "u1")),
      "https://firestore.googleapis.com/v1/projects/pcmi-test/databases/(default)/documents/users/u1"
    );
  }

  #[test]
  fn test_document_id_from_name() {
    assert_eq!(
      document_id("projects/p/databases/(default)/documents/users/abc"),
      "abc"
    );
    assert_eq!(document_id("abc"), "abc");
  }

  #[test]
  fn test_status_classification() {
    let error_for = |code: u16| classify(StatusCode::from_u16(code).unwrap(), "users/u1".into());

    assert!(matches!(error_for(401), StoreError::PermissionDenied(_)));
    assert!(matches!(error_for(403), StoreError::PermissionDenied(_)));
    assert!(matches!(error_for(404), StoreError::NotFound(_)));
    assert!(matches!(error_for(408), StoreError::Unavailable(_)));
    assert!(matches!(error_for(429), StoreError::Unavailable(_)));
    assert!(matches!(error_for(500), StoreError::Unavailable(_)));
    assert!(matches!(error_for(503), StoreError::Unavailable(_)));
    assert!(matches!(error_for(400), StoreError::Other(_)));
  }

  #[test]
  fn test_patch_query_for_each_write_kind() {
    let fields = json!({"isActive": false, "participantCount": 0})
      .as_object()
      .cloned()
      .unwrap();

    // Overwrite
    assert!(patch_query(&fields, false, false).is_empty());

    // Merge
    let merge = patch_query(&fields, true, false);
    assert_eq!(
      merge,
      vec![
        ("updateMask.fieldPaths", "isActive".to_string()),
        ("updateMask.fieldPaths", "participantCount".to_string()),
      ]
    );

    // Update of an existing document
    let update = patch_query(&fields, true, true);
    assert_eq!(update.len(), 3);
    assert_eq!(update[2], ("currentDocument.exists", "true".to_string()));
  }

  #[test]
  fn test_polled_snapshots_emit_only_on_change() {
    let active = json!({"isActive": true}).as_object().cloned();
    let ended = json!({"isActive": false}).as_object().cloned();
    let mut last = None;

    assert!(record_snapshot(&mut last, &active));
    assert!(!record_snapshot(&mut last, &active));
    assert!(record_snapshot(&mut last, &ended));
    assert!(record_snapshot(&mut last, &None));
    assert!(!record_snapshot(&mut last, &None));
  }

  #[test]
  fn test_missing_document_is_first_snapshot() {
    let mut last = None;
    assert!(record_snapshot(&mut last, &None));
    assert_eq!(last, Some(None));
  }

  #[test]
  fn test_invalid_base_url_is_rejected() {
    let mut config = config();
    config.base_url = "not a url".to_string();
    assert!(FirestoreStore::new(&config, None).is_err());
  }
}
