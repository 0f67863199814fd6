use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

/// Process-wide embedding cache keyed by content hash.
///
/// Single-writer/many-reader via `RwLock`; entries expire after the
/// configured TTL and are evicted lazily when read.  No lock is ever held
/// across an await point — callers hash, probe, and insert around their own
/// HTTP calls.
pub struct TtlCache {
    ttl: Duration,
    inner: RwLock<HashMap<String, Entry>>,
}

struct Entry {
    stored_at: Instant,
    value: Vec<f32>,
}

impl TtlCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// SHA-256 hex of the content — the canonical cache key.
    pub fn content_key(text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn get(&self, key: &str) -> Option<Vec<f32>> {
        let expired = {
            let map = self.inner.read().expect("cache lock poisoned");
            match map.get(key) {
                None => return None,
                Some(entry) if entry.stored_at.elapsed() <= self.ttl => {
                    return Some(entry.value.clone());
                }
                Some(_) => true,
            }
        };

        if expired {
            let mut map = self.inner.write().expect("cache lock poisoned");
            // Re-check under the write lock: a concurrent set may have
            // refreshed the entry between the two lock acquisitions.
            if map.get(key).is_some_and(|e| e.stored_at.elapsed() > self.ttl) {
                map.remove(key);
            }
        }
        None
    }

    pub fn set(&self, key: String, value: Vec<f32>) {
        let mut map = self.inner.write().expect("cache lock poisoned");
        map.insert(
            key,
            Entry {
                stored_at: Instant::now(),
                value,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
