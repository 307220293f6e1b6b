//! Embedding cache keyed by content hash.
//!
//! Batch submissions frequently contain near-duplicate tickets (template
//! emails, retries), so the pipeline caches embeddings by a SHA-256 key of
//! the embedded text and skips the provider call on a hit.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Cache key for an embedded text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(pub String);

impl CacheKey {
    /// Generate a cache key from raw content.
    pub fn from_content(content: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        let hash = hasher.finalize();
        CacheKey(format!("{:x}", hash))
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0[..16]) // Short form for display
    }
}

/// Hit/miss statistics for the cache.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

impl CacheStats {
    /// Hit rate over all lookups, 0.0 when empty.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// In-memory embedding cache with bounded size.
///
/// Eviction is oldest-insertion-first; the cache is an optimization, not a
/// store of record, so a coarse policy is fine.
pub struct EmbeddingCache {
    entries: Arc<RwLock<HashMap<CacheKey, Vec<f32>>>>,
    insertion_order: Arc<RwLock<Vec<CacheKey>>>,
    max_entries: usize,
    hits: Arc<RwLock<u64>>,
    misses: Arc<RwLock<u64>>,
}

impl EmbeddingCache {
    /// Default maximum number of cached embeddings.
    pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            insertion_order: Arc::new(RwLock::new(Vec::new())),
            max_entries: max_entries.max(1),
            hits: Arc::new(RwLock::new(0)),
            misses: Arc::new(RwLock::new(0)),
        }
    }

    /// Look up an embedding by text content.
    pub async fn get(&self, text: &str) -> Option<Vec<f32>> {
        let key = CacheKey::from_content(text);
        let entries = self.entries.read().await;
        match entries.get(&key) {
            Some(embedding) => {
                *self.hits.write().await += 1;
                Some(embedding.clone())
            }
            None => {
                *self.misses.write().await += 1;
                None
            }
        }
    }

    /// Insert an embedding, evicting the oldest entry when full.
    pub async fn put(&self, text: &str, embedding: Vec<f32>) {
        let key = CacheKey::from_content(text);
        let mut entries = self.entries.write().await;
        let mut order = self.insertion_order.write().await;

        if entries.contains_key(&key) {
            entries.insert(key, embedding);
            return;
        }

        if entries.len() >= self.max_entries {
            if let Some(oldest) = order.first().cloned() {
                entries.remove(&oldest);
                order.remove(0);
            }
        }

        entries.insert(key.clone(), embedding);
        order.push(key);
    }

    /// Current statistics.
    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            hits: *self.hits.read().await,
            misses: *self.misses.read().await,
            entries: self.entries.read().await.len(),
        }
    }

    /// Drop all entries and counters.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
        self.insertion_order.write().await.clear();
        *self.hits.write().await = 0;
        *self.misses.write().await = 0;
    }
}

impl Default for EmbeddingCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ENTRIES)
    }
}
