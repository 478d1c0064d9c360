//! Cache keys for the admin service.

use std::fmt;

/// Logical resources kept in the local cache.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CacheKey {
  /// Every user document, normalized
  AllUsers,
  /// Admin flag of one user
  AdminStatus { user_id: String },
  /// The meeting room's status document
  MeetingStatus,
}

impl CacheKey {
  pub fn admin_status(user_id: &str) -> Self {
    Self::AdminStatus {
      user_id: user_id.to_string(),
    }
  }

  /// Key under which the entry is stored.
  pub fn key(&self) -> String {
    match self {
      Self::AllUsers => "all_users".to_string(),
      Self::AdminStatus { user_id } => format!("admin_status_{}", user_id),
      Self::MeetingStatus => "meeting_status".to_string(),
    }
  }

  pub fn description(&self) -> String {
    match self {
      Self::AllUsers => "all users".to_string(),
      Self::AdminStatus { user_id } => format!("admin flag of {}", user_id),
      Self::MeetingStatus => "meeting status".to_string(),
    }
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.key())
  }
}
