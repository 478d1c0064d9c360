//! Records mirrored from the `users` and `meetings` collections.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::Identity;
use crate::store::{DocPath, Fields, StoreError};

/// A user as shown in the admin views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
  pub uid: String,
  pub email: String,
  pub display_name: String,
  #[serde(rename = "photoURL", default, skip_serializing_if = "Option::is_none")]
  pub photo_url: Option<String>,
  pub is_admin: bool,
  pub created_at: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_active: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub status: Option<String>,
  /// Created on demand because no document existed for an authenticated user
  #[serde(default)]
  pub is_legacy_user: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub legacy_created_at: Option<String>,
}

fn text(fields: &Fields, name: &str) -> Option<String> {
  fields
    .get(name)
    .and_then(Value::as_str)
    .filter(|s| !s.is_empty())
    .map(String::from)
}

/// Local part of an email address.
fn email_name(email: &str) -> Option<String> {
  email
    .split('@')
    .next()
    .filter(|s| !s.is_empty())
    .map(String::from)
}

impl UserRecord {
  /// Build a record from a raw user document, filling in missing fields.
  ///
  /// `now` stands in for a missing creation time.
  pub fn from_document(uid: &str, fields: &Fields, now: &str) -> Self {
    let raw_email = text(fields, "email");
    let display_name = text(fields, "displayName")
      .or_else(|| raw_email.as_deref().and_then(email_name))
      .unwrap_or_else(|| "Unknown User".to_string());
    let created_at = text(fields, "createdAt").unwrap_or_else(|| now.to_string());
    let last_active = text(fields, "lastActive").unwrap_or_else(|| created_at.clone());

    Self {
      uid: uid.to_string(),
      email: raw_email.unwrap_or_else(|| "Unknown Email".to_string()),
      display_name,
      photo_url: text(fields, "photoURL"),
      is_admin: fields.get("isAdmin") == Some(&Value::Bool(true)),
      created_at,
      last_active: Some(last_active),
      status: Some(text(fields, "status").unwrap_or_else(|| "offline".to_string())),
      is_legacy_user: fields.get("isLegacyUser") == Some(&Value::Bool(true)),
      legacy_created_at: text(fields, "legacyCreatedAt"),
    }
  }

  /// Document written for a user that has no document yet.
  ///
  /// Profile details are only known when the user is the local identity.
  pub fn legacy_document(uid: &str, identity: Option<&Identity>, now: &str) -> Fields {
    let identity = identity.filter(|i| i.uid == uid);
    let email = identity.and_then(|i| i.email.clone()).unwrap_or_default();
    let display_name = identity
      .and_then(|i| i.display_name.clone())
      .or_else(|| email_name(&email))
      .unwrap_or_else(|| "Unknown User".to_string());
    let photo_url = identity.and_then(|i| i.photo_url.clone());

    to_fields(json!({
      "uid": uid,
      "email": email,
      "displayName": display_name,
      "photoURL": photo_url,
      "createdAt": now,
      "lastActive": now,
      "status": "offline",
      "isAdmin": false,
      "isLegacyUser": true,
      "legacyCreatedAt": now,
    }))
  }
}

/// The singleton status document of the meeting room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingStatus {
  pub room_id: String,
  pub is_active: bool,
  pub participant_count: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub started_by: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub started_at: Option<String>,
  pub last_updated: String,
}

impl MeetingStatus {
  pub fn from_document(path: &DocPath, fields: Fields) -> Result<Self, StoreError> {
    serde_json::from_value(Value::Object(fields)).map_err(|e| StoreError::malformed(path, e))
  }

  pub fn to_fields(&self) -> Fields {
    to_fields(serde_json::to_value(self).unwrap_or(Value::Null))
  }
}

/// Counters for the admin dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminStats {
  pub total_users: usize,
  pub total_admins: usize,
  pub active_meetings: usize,
  pub total_meetings: usize,
}

impl AdminStats {
  pub fn new(users: &[UserRecord], meetings: &[MeetingStatus]) -> Self {
    Self {
      total_users: users.len(),
      total_admins: users.iter().filter(|u| u.is_admin).count(),
      active_meetings: meetings.iter().filter(|m| m.is_active).count(),
      total_meetings: meetings.len(),
    }
  }
}

/// Field map of a JSON object; anything else is empty.
pub fn to_fields(value: Value) -> Fields {
  match value {
    Value::Object(map) => map,
    _ => Fields::new(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const NOW: &str = "2024-05-01T10:00:00.000Z";

  #[test]
  fn test_sparse_user_document_is_normalized() {
    let fields = to_fields(json!({"email": "ana@example.com", "isAdmin": "true"}));
    let user = UserRecord::from_document("u1", &fields, NOW);

    assert_eq!(user.display_name, "ana");
    assert!(!user.is_admin);
    assert_eq!(user.created_at, NOW);
    assert_eq!(user.last_active.as_deref(), Some(NOW));
    assert_eq!(user.status.as_deref(), Some("offline"));
  }

  #[test]
  fn test_empty_user_document_gets_placeholders() {
    let user = UserRecord::from_document("u2", &Fields::new(), NOW);
    assert_eq!(user.email, "Unknown Email");
    assert_eq!(user.display_name, "Unknown User");
  }

  #[test]
  fn test_user_record_round_trips_through_camel_case() {
    let fields = to_fields(json!({
      "email": "ben@example.com",
      "displayName": "Ben",
      "photoURL": "https://img/ben.png",
      "isAdmin": true,
      "createdAt": "2024-01-01T00:00:00Z",
    }));
    let user = UserRecord::from_document("u3", &fields, NOW);
    let value = serde_json::to_value(&user).unwrap();

    assert_eq!(value["photoURL"], json!("https://img/ben.png"));
    assert_eq!(value["isAdmin"], json!(true));
    assert_eq!(serde_json::from_value::<UserRecord>(value).unwrap(), user);
  }

  #[test]
  fn test_legacy_document_uses_matching_identity_only() {
    let identity = Identity {
      uid: "u1".into(),
      email: Some("ana@example.com".into()),
      display_name: None,
      photo_url: None,
    };

    let own = UserRecord::legacy_document("u1", Some(&identity), NOW);
    assert_eq!(own["displayName"], json!("ana"));
    assert_eq!(own["isLegacyUser"], json!(true));

    let other = UserRecord::legacy_document("u9", Some(&identity), NOW);
    assert_eq!(other["email"], json!(""));
    assert_eq!(other["displayName"], json!("Unknown User"));
  }

  #[test]
  fn test_meeting_status_from_document() {
    let path = DocPath::new("meetings", "kamustahan01");
    let fields = to_fields(json!({
      "roomId": "kamustahan01",
      "isActive": true,
      "participantCount": 4,
      "lastUpdated": NOW,
    }));

    let status = MeetingStatus::from_document(&path, fields).unwrap();
    assert_eq!(status.participant_count, 4);
    assert_eq!(status.started_by, None);

    let bad = to_fields(json!({"roomId": "kamustahan01"}));
    assert!(matches!(
      MeetingStatus::from_document(&path, bad),
      Err(StoreError::Malformed { .. })
    ));
  }

  #[test]
  fn test_stats_counts() {
    let admin = UserRecord::from_document("a", &to_fields(json!({"isAdmin": true})), NOW);
    let user = UserRecord::from_document("b", &Fields::new(), NOW);
    let meeting = MeetingStatus {
      room_id: "r".into(),
      is_active: true,
      participant_count: 2,
      started_by: None,
      started_at: None,
      last_updated: NOW.into(),
    };

    let stats = AdminStats::new(&[admin, user], &[meeting]);
    assert_eq!(
      stats,
      AdminStats {
        total_users: 2,
        total_admins: 1,
        active_meetings: 1,
        total_meetings: 1,
      }
    );
  }
}
