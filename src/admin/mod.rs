//! Admin dashboard and meeting-room operations over the cached document store.

mod cache;
mod client;
mod types;

pub use cache::CacheKey;
pub use client::AdminClient;
pub use types::{AdminStats, MeetingStatus, UserRecord};
