//! In-memory result cache with per-entry TTL, used to skip the vision model
//! for uploads that were already analyzed.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    value: T,
    stored_at: Instant,
    ttl: Duration,
}

impl<T> CacheEntry<T> {
    fn is_live(&self, now: Instant) -> bool {
        now.duration_since(self.stored_at) < self.ttl
    }
}

/// TTL cache keyed by strings such as `crop:<sha3>:<ext>:<mime>`.
#[derive(Debug)]
pub struct ResultCache<T> {
    entries: RwLock<HashMap<String, CacheEntry<T>>>,
    default_ttl: Duration,
}

impl<T: Clone> ResultCache<T> {
    /// Entries live for `default_ttl` unless stored with an explicit TTL.
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            default_ttl: clamp_ttl(default_ttl),
        }
    }

    /// Look up a live entry. Expired entries are removed.
    pub fn get(&self, key: &str) -> Option<T> {
        let now = Instant::now();
        {
            let entries = self.entries.read().ok()?;
            match entries.get(key) {
                Some(entry) if entry.is_live(now) => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        self.delete(key);
        None
    }

    /// Store with the default TTL.
    pub fn set(&self, key: impl Into<String>, value: T) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    /// Store with an explicit TTL (at least one second).
    pub fn set_with_ttl(&self, key: impl Into<String>, value: T, ttl: Duration) {
        let now = Instant::now();
        match self.entries.write() {
            Ok(mut entries) => {
                entries.retain(|_, e| e.is_live(now));
                entries.insert(
                    key.into(),
                    CacheEntry {
                        value,
                        stored_at: now,
                        ttl: clamp_ttl(ttl),
                    },
                );
            }
            Err(e) => log::error!("cache lock poisoned, dropping write: {}", e),
        }
    }

    /// Remove an entry.
    pub fn delete(&self, key: &str) {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(key);
        }
    }

    /// Number of stored entries, live or not yet swept.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn clamp_ttl(ttl: Duration) -> Duration {
    ttl.max(Duration::from_secs(1))
}
