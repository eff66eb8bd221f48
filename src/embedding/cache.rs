//! Bounded LRU cache mapping SHA-256(text) to a shared embedding vector.
//!
//! Entries are `Arc<[f32]>` so a cache hit clones a pointer, not a vector.
//! Capacity is measured in entries (not bytes) per the fixed 1000-entry
//! contract this cache is built to.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

struct Inner {
    map: HashMap<u64, (Arc<[f32]>, u64)>,
    tick: u64,
}

/// Process-wide text→vector LRU, keyed by a hash of the input text.
pub struct EmbeddingCache {
    inner: Mutex<Inner>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

fn key_for(text: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    u64::from_le_bytes(digest[..8].try_into().unwrap())
}

impl EmbeddingCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner { map: HashMap::new(), tick: 0 }),
            capacity: capacity.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, text: &str) -> Option<Arc<[f32]>> {
        let key = key_for(text);
        let mut inner = self.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;
        if let Some((vector, last_used)) = inner.map.get_mut(&key) {
            *last_used = tick;
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(vector.clone());
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn insert(&self, text: &str, vector: Vec<f32>) {
        let key = key_for(text);
        let mut inner = self.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;

        if inner.map.len() >= self.capacity && !inner.map.contains_key(&key) {
            self.evict_lru(&mut inner);
        }
        inner.map.insert(key, (Arc::from(vector.into_boxed_slice()), tick));
    }

    fn evict_lru(&self, inner: &mut Inner) {
        if let Some((&oldest_key, _)) = inner.map.iter().min_by_key(|(_, (_, last_used))| *last_used) {
            inner.map.remove(&oldest_key);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed) as f64;
        let misses = self.misses.load(Ordering::Relaxed) as f64;
        if hits + misses == 0.0 {
            0.0
        } else {
            hits / (hits + misses)
        }
    }
}
