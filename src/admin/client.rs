//! Admin and meeting-room operations with transparent caching.

use chrono::{SecondsFormat, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::CacheLayer;
use crate::config::{Config, Identity, DEFAULT_ROOM_ID};
use crate::retry::RetryPolicy;
use crate::store::{DocPath, DocumentStore, SetMode, StoreError};
use crate::subscription::{self, Subscription};

use super::cache::CacheKey;
use super::types::{to_fields, AdminStats, MeetingStatus, UserRecord};

const USERS: &str = "users";
const MEETINGS: &str = "meetings";

/// Timestamp format stored in documents (`2024-05-01T10:00:00.000Z`).
fn now_iso() -> String {
  Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Admin client over a document store.
///
/// Reads go through the cache and degrade to cached or empty data; writes
/// update the cache first and then the store, without rollback if the store
/// write fails. The next successful read corrects any drift.
#[derive(Clone)]
pub struct AdminClient {
  store: Arc<dyn DocumentStore>,
  cache: CacheLayer,
  retry: RetryPolicy,
  room_id: String,
  identity: Option<Identity>,
  refresh_on_hit: bool,
}

impl AdminClient {
  pub fn new(store: Arc<dyn DocumentStore>, cache: CacheLayer) -> Self {
    Self {
      store,
      cache,
      retry: RetryPolicy::default(),
      room_id: DEFAULT_ROOM_ID.to_string(),
      identity: None,
      refresh_on_hit: false,
    }
  }

  pub fn from_config(config: &Config, store: Arc<dyn DocumentStore>, cache: CacheLayer) -> Self {
    Self::new(store, cache)
      .with_retry(config.retry.policy())
      .with_room_id(&config.room_id)
      .with_identity(config.identity.clone())
      .with_refresh_on_hit(config.cache.refresh_on_hit)
  }

  pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }

  pub fn with_room_id(mut self, room_id: &str) -> Self {
    self.room_id = room_id.to_string();
    self
  }

  pub fn with_identity(mut self, identity: Option<Identity>) -> Self {
    self.identity = identity;
    self
  }

  pub fn with_refresh_on_hit(mut self, refresh_on_hit: bool) -> Self {
    self.refresh_on_hit = refresh_on_hit;
    self
  }

  pub fn cache(&self) -> &CacheLayer {
    &self.cache
  }

  pub fn room_id(&self) -> &str {
    &self.room_id
  }

  pub fn is_online(&self) -> bool {
    self.cache.network().is_online()
  }

  fn meeting_doc(&self) -> DocPath {
    DocPath::new(MEETINGS, &self.room_id)
  }

  // ==========================================================================
  // Users
  // ==========================================================================

  /// Whether `user_id` has the admin flag. Unknown users and failures read as `false`.
  pub async fn check_is_admin(&self, user_id: &str) -> bool {
    if user_id.is_empty() {
      return false;
    }

    let key = CacheKey::admin_status(user_id);
    let doc = DocPath::new(USERS, user_id);
    let store = &self.store;
    let doc = &doc;
    let result = self
      .cache
      .fetch(&key.key(), move || async move {
        let fields = store.get(doc).await?;
        Ok::<_, StoreError>(Some(
          fields
            .map(|f| f.get("isAdmin") == Some(&json!(true)))
            .unwrap_or(false),
        ))
      })
      .await;

    match result {
      Ok(found) => found.map(|r| r.data).unwrap_or(false),
      Err(e) => {
        warn!("Error checking {}: {}", key.description(), e);
        false
      }
    }
  }

  pub async fn make_user_admin(&self, user_id: &str) -> Result<(), StoreError> {
    self.set_admin(user_id, true).await
  }

  pub async fn remove_user_admin(&self, user_id: &str) -> Result<(), StoreError> {
    self.set_admin(user_id, false).await
  }

  async fn set_admin(&self, user_id: &str, is_admin: bool) -> Result<(), StoreError> {
    self
      .cache
      .set(&CacheKey::admin_status(user_id).key(), &is_admin);
    self
      .cache
      .update::<Vec<UserRecord>, _>(&CacheKey::AllUsers.key(), |users| {
        users
          .iter_mut()
          .filter(|u| u.uid == user_id)
          .for_each(|u| u.is_admin = is_admin);
      });

    let doc = DocPath::new(USERS, user_id);
    let patch = to_fields(json!({
      "isAdmin": is_admin,
      "updatedAt": now_iso(),
    }));

    let this = self;
    let doc = &doc;
    let result = self
      .retry
      .run(move || {
        let patch = patch.clone();
        async move {
          this.ensure_user_document_exists(user_id).await?;
          this.store.update(doc, patch).await
        }
      })
      .await;

    match &result {
      Ok(()) => info!("Set admin flag of {} to {}", user_id, is_admin),
      Err(e) => warn!("Failed to set admin flag of {}, keeping local value: {}", user_id, e),
    }
    result
  }

  /// Create the user's document if it is missing. Returns whether it was created.
  pub async fn ensure_user_document_exists(&self, user_id: &str) -> Result<bool, StoreError> {
    let doc = DocPath::new(USERS, user_id);
    if self.store.get(&doc).await?.is_some() {
      return Ok(false);
    }

    info!("Creating missing user document for {}", user_id);
    let fields = UserRecord::legacy_document(user_id, self.identity.as_ref(), &now_iso());
    self.store.set(&doc, fields, SetMode::Overwrite).await?;
    Ok(true)
  }

  /// Every user, normalized. Failures read as an empty list.
  pub async fn get_all_users(&self) -> Vec<UserRecord> {
    self.load_users(false).await
  }

  /// Like `get_all_users` but always asks the store first. The cached list
  /// is still served if the store can't be reached.
  pub async fn refresh_all_users(&self) -> Vec<UserRecord> {
    self.load_users(true).await
  }

  async fn load_users(&self, force: bool) -> Vec<UserRecord> {
    let key = CacheKey::AllUsers.key();
    let store = self.store.clone();
    let fetcher = move || async move {
      let now = now_iso();
      let documents = store.list(USERS).await?;
      debug!("Found {} user documents", documents.len());
      Ok::<_, StoreError>(Some(
        documents
          .iter()
          .map(|(uid, fields)| UserRecord::from_document(uid, fields, &now))
          .collect::<Vec<_>>(),
      ))
    };

    let result = if force {
      self.cache.refetch(&key, fetcher).await
    } else if self.refresh_on_hit {
      self.cache.fetch_with_refresh(&key, fetcher).await
    } else {
      self.cache.fetch(&key, fetcher).await
    };

    match result {
      Ok(found) => found.map(|r| r.data).unwrap_or_default(),
      Err(e) => {
        warn!("Error fetching users: {}", e);
        Vec::new()
      }
    }
  }

  /// Make sure the local identity has a user document and force the user
  /// list to be re-read.
  pub async fn sync_auth_users(&self) {
    if let Some(identity) = &self.identity {
      match self.ensure_user_document_exists(&identity.uid).await {
        Ok(created) => debug!("User document for {} ensured (created: {})", identity.uid, created),
        Err(e) => warn!("Failed to sync user {}: {}", identity.uid, e),
      }
    } else {
      debug!("No identity configured, nothing to sync");
    }

    self.cache.remove(&CacheKey::AllUsers.key());
  }

  // ==========================================================================
  // Meeting room
  // ==========================================================================

  pub async fn start_meeting(
    &self,
    admin_id: &str,
    admin_name: &str,
  ) -> Result<MeetingStatus, StoreError> {
    let now = now_iso();
    let status = MeetingStatus {
      room_id: self.room_id.clone(),
      is_active: true,
      participant_count: 1,
      started_by: Some(admin_id.to_string()),
      started_at: Some(now.clone()),
      last_updated: now,
    };

    info!("{} ({}) is starting meeting {}", admin_name, admin_id, self.room_id);
    self.cache.set(&CacheKey::MeetingStatus.key(), &status);

    let doc = self.meeting_doc();
    let fields = status.to_fields();
    let store = &self.store;
    let doc = &doc;
    self
      .retry
      .run(move || {
        let fields = fields.clone();
        async move { store.set(doc, fields, SetMode::Overwrite).await }
      })
      .await?;

    Ok(status)
  }

  pub async fn end_meeting(&self) -> Result<(), StoreError> {
    let now = now_iso();
    self
      .cache
      .update::<MeetingStatus, _>(&CacheKey::MeetingStatus.key(), |status| {
        status.is_active = false;
        status.participant_count = 0;
        status.last_updated = now.clone();
      });

    let patch = to_fields(json!({
      "isActive": false,
      "participantCount": 0,
      "lastUpdated": now,
    }));

    let doc = self.meeting_doc();
    let store = &self.store;
    let doc = &doc;
    self
      .retry
      .run(move || {
        let patch = patch.clone();
        async move { store.update(doc, patch).await }
      })
      .await?;

    info!("Meeting {} ended", self.room_id);
    Ok(())
  }

  /// Record the current participant count.
  ///
  /// The cache is updated immediately; the store write only happens while
  /// online and its failure is logged, not returned.
  pub async fn update_participant_count(&self, count: u32) {
    let now = now_iso();
    self
      .cache
      .update::<MeetingStatus, _>(&CacheKey::MeetingStatus.key(), |status| {
        status.participant_count = count;
        status.last_updated = now.clone();
      });

    if !self.is_online() {
      debug!("Offline, participant count {} kept locally", count);
      return;
    }

    let patch = to_fields(json!({
      "participantCount": count,
      "lastUpdated": now,
    }));

    let doc = self.meeting_doc();
    let store = &self.store;
    let doc = &doc;
    let result = self
      .retry
      .run(move || {
        let patch = patch.clone();
        async move { store.update(doc, patch).await }
      })
      .await;

    if let Err(e) = result {
      warn!("Failed to update participant count on server: {}", e);
    }
  }

  /// Follow the meeting room's status.
  ///
  /// `on_change` gets the cached status before this returns, then every
  /// change; `None` when the status document is deleted. No feed is attached
  /// while offline.
  pub fn listen_to_meeting_status<F>(&self, on_change: F) -> Subscription
  where
    F: FnMut(Option<MeetingStatus>) + Send + 'static,
  {
    let doc = self.meeting_doc();
    let feed = self.is_online().then(|| self.store.watch(&doc));

    subscription::subscribe(
      &self.cache,
      &CacheKey::MeetingStatus.key(),
      feed,
      move |fields| MeetingStatus::from_document(&doc, fields),
      on_change,
    )
  }

  /// Current meeting status. Failures and a missing document read as `None`.
  pub async fn get_meeting_status(&self) -> Option<MeetingStatus> {
    let doc = self.meeting_doc();
    let store = &self.store;
    let doc = &doc;
    let result = self
      .cache
      .fetch(&CacheKey::MeetingStatus.key(), move || async move {
        match store.get(doc).await? {
          Some(fields) => MeetingStatus::from_document(doc, fields).map(Some),
          None => Ok::<_, StoreError>(None),
        }
      })
      .await;

    match result {
      Ok(found) => found.map(|r| r.data),
      Err(e) => {
        warn!("Error getting meeting status: {}", e);
        None
      }
    }
  }

  /// Dashboard counters. Meetings are counted from the store; if that
  /// fails only the cached room status is counted.
  pub async fn admin_stats(&self) -> AdminStats {
    let users = self.get_all_users().await;

    let meetings: Vec<MeetingStatus> = match self.store.list(MEETINGS).await {
      Ok(documents) => documents
        .into_iter()
        .filter_map(|(id, fields)| {
          MeetingStatus::from_document(&DocPath::new(MEETINGS, id), fields)
            .map_err(|e| debug!("Skipping meeting: {}", e))
            .ok()
        })
        .collect(),
      Err(e) => {
        warn!("Error listing meetings: {}", e);
        self
          .cache
          .get::<MeetingStatus>(&CacheKey::MeetingStatus.key())
          .into_iter()
          .collect()
      }
    };

    AdminStats::new(&users, &meetings)
  }
}
