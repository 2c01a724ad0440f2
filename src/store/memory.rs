//! In-process store backend with per-entry TTL.
//!
//! Expiry is checked lazily on read against [`tokio::time::Instant`], so
//! tests can drive the clock with `tokio::time::{pause, advance}`.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{Store, StoreFuture};

struct Entry {
    value: String,
    expires_at: Instant,
}

/// An in-memory [`Store`] for tests and local development.
///
/// Not a production cache: entries are only reclaimed when read after expiry,
/// and nothing bounds the map's size.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> StoreFuture<'_, Option<String>> {
        let key = key.to_owned();
        Box::pin(async move {
            let mut entries = self.entries.lock().await;
            let expired = entries
                .get(&key)
                .is_some_and(|entry| entry.expires_at <= Instant::now());
            if expired {
                entries.remove(&key);
                return Ok(None);
            }
            Ok(entries.get(&key).map(|entry| entry.value.clone()))
        })
    }

    fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> StoreFuture<'_, ()> {
        let key = key.to_owned();
        let value = value.to_owned();
        Box::pin(async move {
            let entry = Entry {
                value,
                expires_at: Instant::now() + Duration::from_secs(ttl_seconds),
            };
            self.entries.lock().await.insert(key, entry);
            Ok(())
        })
    }

    fn del(&self, keys: Vec<String>) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let mut entries = self.entries.lock().await;
            let removed = keys
                .iter()
                .filter(|key| entries.remove(key.as_str()).is_some())
                .count();
            Ok(removed as u64)
        })
    }
}
