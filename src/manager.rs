//! Kind-scoped memory manager.
//!
//! Adds embedding generation, write-time deduplication, and similarity
//! search semantics on top of a raw [`MemoryStore`]. Each manager is bound
//! to one [`MemoryKind`] tier; the [`KnowledgeService`](crate::knowledge)
//! runs one manager for documents and one for fragments over a shared store,
//! provider, and cache.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::KnowledgeConfig;
use crate::embeddings::{EmbeddingCache, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::similarity::text_similarity;
use crate::store::MemoryStore;
use crate::types::{Embedding, Memory, MemoryKind, Scope, ScoredMemory};

/// What happened on a [`MemoryManager::create_memory`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The memory was inserted
    Created(Uuid),
    /// A near-duplicate already existed in the scope; nothing was inserted
    Deduplicated(Uuid),
}

impl CreateOutcome {
    /// The id of the stored memory, whether new or pre-existing
    pub fn id(&self) -> Uuid {
        match self {
            CreateOutcome::Created(id) | CreateOutcome::Deduplicated(id) => *id,
        }
    }

    /// Whether the call skipped insertion in favor of an existing memory
    pub fn is_deduplicated(&self) -> bool {
        matches!(self, CreateOutcome::Deduplicated(_))
    }
}

/// Parameters for [`MemoryManager::get_memories`]
#[derive(Debug, Clone)]
pub struct GetMemoriesRequest {
    /// Scope to list
    pub scope: Scope,
    /// Result cap, applied after dedup
    pub count: usize,
    /// Collapse near-identical texts before truncation
    pub unique: bool,
    /// Lower time bound (inclusive)
    pub start: Option<DateTime<Utc>>,
    /// Upper time bound (inclusive)
    pub end: Option<DateTime<Utc>>,
}

impl GetMemoriesRequest {
    /// List a scope with the default cap and dedup enabled
    pub fn new(scope: Scope) -> Self {
        GetMemoriesRequest {
            scope,
            count: 10,
            unique: true,
            start: None,
            end: None,
        }
    }
}

/// Parameters for [`MemoryManager::search_by_embedding`]
#[derive(Debug, Clone)]
pub struct SearchRequest {
    /// Scope to search
    pub scope: Scope,
    /// Minimum similarity for a hit to qualify
    pub match_threshold: f32,
    /// Result cap, applied after dedup
    pub count: usize,
    /// Collapse near-identical texts before truncation
    pub unique: bool,
}

impl SearchRequest {
    /// Search a scope with the default threshold, cap, and dedup enabled
    pub fn new(scope: Scope) -> Self {
        SearchRequest {
            scope,
            match_threshold: 0.1,
            count: 10,
            unique: true,
        }
    }
}

/// Table-scoped façade over a [`MemoryStore`] with embedding and dedup
/// semantics
#[derive(Clone)]
pub struct MemoryManager {
    kind: MemoryKind,
    store: Arc<dyn MemoryStore>,
    provider: Arc<dyn EmbeddingProvider>,
    cache: Arc<EmbeddingCache>,
    config: Arc<KnowledgeConfig>,
}

impl MemoryManager {
    /// Create a manager bound to one storage tier
    pub fn new(
        kind: MemoryKind,
        store: Arc<dyn MemoryStore>,
        provider: Arc<dyn EmbeddingProvider>,
        cache: Arc<EmbeddingCache>,
        config: Arc<KnowledgeConfig>,
    ) -> Self {
        MemoryManager {
            kind,
            store,
            provider,
            cache,
            config,
        }
    }

    /// The tier this manager writes to
    pub fn kind(&self) -> MemoryKind {
        self.kind
    }

    /// Store a memory, optionally skipping insertion when a near-duplicate
    /// already exists in the same scope.
    ///
    /// The unique path ensures the memory carries an embedding, then runs a
    /// vector search at the dedup threshold; a hit short-circuits to
    /// [`CreateOutcome::Deduplicated`] with the existing id. The check and
    /// the insert are not atomic, so two concurrent unique inserts of
    /// near-identical content may both commit; byte-identical texts still
    /// collapse because content-addressed ids make the insert an upsert.
    pub async fn create_memory(&self, memory: Memory, unique: bool) -> Result<CreateOutcome> {
        if memory.content.text.trim().is_empty() {
            return Err(Error::Validation("memory text must not be empty".into()));
        }

        let mut memory = memory;
        memory.kind = self.kind;
        memory.unique = unique;

        if unique {
            if memory.embedding.is_none() {
                memory = self.add_embedding(memory).await?;
            }

            if let Some(embedding) = &memory.embedding {
                if !embedding.is_degraded() {
                    let existing = self
                        .store
                        .search_by_vector(
                            self.kind,
                            &memory.scope,
                            embedding.vector(),
                            self.config.dedup_threshold,
                            1,
                        )
                        .await?;

                    if let Some(hit) = existing.first() {
                        debug!(
                            kind = self.kind.as_str(),
                            existing = %hit.memory.id,
                            similarity = hit.similarity,
                            "skipping near-duplicate memory"
                        );
                        return Ok(CreateOutcome::Deduplicated(hit.memory.id));
                    }
                }
            }
        }

        self.store.insert(&memory).await?;
        debug!(kind = self.kind.as_str(), id = %memory.id, "memory stored");
        Ok(CreateOutcome::Created(memory.id))
    }

    /// Return the memory with an embedding populated.
    ///
    /// A memory that already carries an embedding is returned unchanged.
    /// Otherwise the cache is consulted first; on a miss the provider is
    /// called and the result cached. A provider failure degrades to a tagged
    /// zero vector instead of failing the call, so ingest never loses text;
    /// degraded embeddings are excluded from search and never cached.
    pub async fn add_embedding(&self, mut memory: Memory) -> Result<Memory> {
        if memory.embedding.is_some() {
            return Ok(memory);
        }

        let embedding = self
            .embed_text(&memory.scope, &memory.content.text)
            .await
            .unwrap_or_else(|e| {
                warn!(
                    kind = self.kind.as_str(),
                    id = %memory.id,
                    error = %e,
                    "embedding provider failed, storing degraded zero vector"
                );
                Embedding::degraded(self.provider.dimensions(), e.to_string())
            });

        memory.embedding = Some(embedding);
        Ok(memory)
    }

    /// Embed a text through the cache, failing closed on provider errors.
    ///
    /// Queries use this directly: searching with a degraded zero vector is
    /// meaningless, so the fallback applies only in [`Self::add_embedding`].
    pub async fn embed_text(&self, scope: &Scope, text: &str) -> Result<Embedding> {
        let scope_key = scope.cache_key();

        if let Some(hit) = self.cache.lookup(&scope_key, text).await.into_iter().next() {
            debug!(
                kind = self.kind.as_str(),
                similarity = hit.similarity,
                "embedding cache hit"
            );
            return Ok(Embedding::Computed {
                vector: hit.embedding,
            });
        }

        let vector = self.provider.embed(text).await?;
        self.cache.store(&scope_key, text, vector.clone()).await;
        Ok(Embedding::Computed { vector })
    }

    /// List memories in a scope, most recent first.
    ///
    /// With `unique`, near-identical texts are collapsed before the result
    /// is truncated to `count`.
    pub async fn get_memories(&self, request: GetMemoriesRequest) -> Result<Vec<Memory>> {
        let memories = self
            .store
            .list_by_scope(
                self.kind,
                &request.scope,
                (!request.unique).then_some(request.count),
                request.start,
                request.end,
            )
            .await?;

        let mut memories = if request.unique {
            dedup_by_text(memories, self.config.dedup_threshold, |m| m)
        } else {
            memories
        };
        memories.truncate(request.count);
        Ok(memories)
    }

    /// Search the scope for memories similar to `embedding`.
    ///
    /// Hits score at or above `match_threshold`, ordered by descending
    /// similarity with deterministic tie-breaks. Memories without an
    /// embedding and degraded zero vectors are never returned.
    pub async fn search_by_embedding(
        &self,
        embedding: &[f32],
        request: SearchRequest,
    ) -> Result<Vec<ScoredMemory>> {
        // Over-fetch when dedup may drop hits before truncation
        let fetch = if request.unique {
            request.count.saturating_mul(4)
        } else {
            request.count
        };

        let hits = self
            .store
            .search_by_vector(
                self.kind,
                &request.scope,
                embedding,
                request.match_threshold,
                fetch,
            )
            .await?;

        let mut hits = if request.unique {
            dedup_by_text(hits, self.config.dedup_threshold, |h| &h.memory)
        } else {
            hits
        };
        hits.truncate(request.count);

        debug!(
            kind = self.kind.as_str(),
            hits = hits.len(),
            threshold = request.match_threshold,
            "vector search complete"
        );
        Ok(hits)
    }

    /// Point lookup; absence is a `None`, never an error
    pub async fn get_memory_by_id(&self, id: Uuid) -> Result<Option<Memory>> {
        self.store.get_by_id(self.kind, id).await
    }

    /// Delete a memory; deleting an absent id succeeds
    pub async fn remove_memory(&self, id: Uuid) -> Result<()> {
        self.store.delete(self.kind, id).await
    }

    /// Delete every memory in a scope
    pub async fn remove_all_memories(&self, scope: &Scope) -> Result<()> {
        self.store.delete_by_scope(self.kind, scope).await
    }

    /// Delete every memory whose `content.source` is the given id
    pub async fn remove_memories_by_source(&self, source: Uuid) -> Result<()> {
        self.store.delete_by_source(self.kind, source).await
    }

    /// Count memories in a scope, honoring the same dedup semantics as
    /// [`Self::get_memories`]
    pub async fn count_memories(&self, scope: &Scope, unique: bool) -> Result<usize> {
        if !unique {
            return self.store.count(self.kind, scope).await;
        }

        let memories = self
            .store
            .list_by_scope(self.kind, scope, None, None, None)
            .await?;
        Ok(dedup_by_text(memories, self.config.dedup_threshold, |m| m).len())
    }
}

/// Drop items whose text is near-identical to an earlier kept item,
/// preserving order.
fn dedup_by_text<T>(items: Vec<T>, threshold: f32, memory_of: impl Fn(&T) -> &Memory) -> Vec<T> {
    let mut kept: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        let text = &memory_of(&item).content.text;
        let duplicate = kept
            .iter()
            .any(|k| text_similarity(text, &memory_of(k).content.text) >= threshold);
        if !duplicate {
            kept.push(item);
        }
    }
    kept
}
