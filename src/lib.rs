//! Offline-first access layer for the PCMI meeting backend.
//!
//! Reads are served from a local TTL cache and fall back to stale data when
//! the document store can't be reached. Writes update the cache first and
//! are retried on transient network failures. The meeting room status can
//! be followed live through a subscription that keeps the cache current.

pub mod admin;
pub mod cache;
pub mod config;
pub mod logging;
pub mod network;
pub mod retry;
pub mod store;
pub mod subscription;
