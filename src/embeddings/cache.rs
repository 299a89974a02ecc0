//! Scope-keyed embedding cache with fuzzy text matching.
//!
//! Two layers: an exact-match layer keyed by a hash of `scope:text` (moka,
//! TTL-based eviction) and a fuzzy layer holding the most recent
//! `(text, embedding)` pairs per scope, matched by normalized Levenshtein
//! similarity. Keying by scope keeps cached embeddings from leaking across
//! tenants.

use std::collections::{HashMap, VecDeque};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::time::Duration;

use moka::future::Cache;
use tokio::sync::RwLock;

use crate::config::EmbeddingCacheConfig;
use crate::similarity::text_similarity;

/// Cache key helper: hash a string to u64
fn hash_key(s: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    s.hash(&mut hasher);
    hasher.finish()
}

/// A cached embedding candidate returned by [`EmbeddingCache::lookup`]
#[derive(Debug, Clone)]
pub struct CachedEmbedding {
    /// The previously computed embedding
    pub embedding: Vec<f32>,
    /// Text similarity to the query, in [0, 1]; 1.0 means identical
    pub similarity: f32,
}

#[derive(Debug, Clone)]
struct FuzzyEntry {
    text: String,
    embedding: Vec<f32>,
}

/// Scope-keyed cache of previously computed embeddings
pub struct EmbeddingCache {
    exact: Cache<u64, Vec<f32>>,
    fuzzy: RwLock<HashMap<String, VecDeque<FuzzyEntry>>>,
    config: EmbeddingCacheConfig,
}

impl EmbeddingCache {
    /// Create a cache with the given tuning
    pub fn new(config: EmbeddingCacheConfig) -> Self {
        EmbeddingCache {
            exact: Cache::builder()
                .max_capacity(config.exact_capacity)
                .time_to_live(Duration::from_secs(config.ttl_secs))
                .build(),
            fuzzy: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Return cached embeddings for text effectively the same as `text`,
    /// best first.
    ///
    /// An exact hit short-circuits with similarity 1.0. Otherwise the
    /// scope's candidates are scored by normalized Levenshtein similarity
    /// and entries at or above `min_similarity` are returned, sorted
    /// descending.
    pub async fn lookup(&self, scope_key: &str, text: &str) -> Vec<CachedEmbedding> {
        if let Some(embedding) = self.exact.get(&hash_key(&exact_key(scope_key, text))).await {
            return vec![CachedEmbedding {
                embedding,
                similarity: 1.0,
            }];
        }

        let fuzzy = self.fuzzy.read().await;
        let Some(entries) = fuzzy.get(scope_key) else {
            return Vec::new();
        };

        let mut candidates: Vec<CachedEmbedding> = entries
            .iter()
            .filter_map(|entry| {
                let similarity = text_similarity(text, &entry.text);
                (similarity >= self.config.min_similarity).then(|| CachedEmbedding {
                    embedding: entry.embedding.clone(),
                    similarity,
                })
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates
    }

    /// Record a computed `(text, embedding)` pair for future lookups.
    ///
    /// The per-scope candidate list is bounded; the oldest entry is evicted
    /// once it is full.
    pub async fn store(&self, scope_key: &str, text: &str, embedding: Vec<f32>) {
        self.exact
            .insert(hash_key(&exact_key(scope_key, text)), embedding.clone())
            .await;

        let mut fuzzy = self.fuzzy.write().await;
        let entries = fuzzy.entry(scope_key.to_string()).or_default();
        entries.push_back(FuzzyEntry {
            text: text.to_string(),
            embedding,
        });
        while entries.len() > self.config.max_entries_per_scope {
            entries.pop_front();
        }
    }
}

fn exact_key(scope_key: &str, text: &str) -> String {
    format!("{scope_key}:{text}")
}
