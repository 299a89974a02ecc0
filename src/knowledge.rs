//! Knowledge ingest and retrieval over two memory tiers.
//!
//! [`KnowledgeService`] orchestrates a documents manager and a fragments
//! manager sharing one store, one embedding provider, and one cache. Ingest
//! stores the full text as a document, chunks it, and stores each fragment
//! with its embedding; retrieval searches fragments and resolves each hit
//! back to its source document.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chunking;
use crate::config::KnowledgeConfig;
use crate::embeddings::{EmbeddingCache, EmbeddingProvider};
use crate::error::{Error, FragmentError, IngestFailure, Result};
use crate::manager::{MemoryManager, SearchRequest};
use crate::store::MemoryStore;
use crate::types::{Embedding, Memory, MemoryKind, Scope, ScoredMemory};

/// A piece of knowledge to ingest
#[derive(Debug, Clone)]
pub struct KnowledgeItem {
    /// Document id; derived from the content when not supplied
    pub id: Option<Uuid>,
    /// Complete source text
    pub text: String,
    /// Tenancy scope for the document and all of its fragments
    pub scope: Scope,
    /// Free-form metadata stored on the document
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

impl KnowledgeItem {
    /// Build an item with a content-derived id and no metadata
    pub fn new(scope: Scope, text: impl Into<String>) -> Self {
        KnowledgeItem {
            id: None,
            text: text.into(),
            scope,
            metadata: None,
        }
    }

    /// Assign an explicit document id
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }
}

/// Tuning for one ingest call; unset fields fall back to the service config
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Fragment length in characters
    pub chunk_size: Option<usize>,
    /// Overlap in characters shared by consecutive fragments
    pub bleed: Option<usize>,
    /// Cancels the ingest at the next suspension point
    pub cancel: CancellationToken,
}

/// What an ingest stored
#[derive(Debug, Clone)]
pub struct IngestReport {
    /// Id of the stored document
    pub document_id: Uuid,
    /// Ids of the stored fragments, in chunking order
    pub fragments: Vec<Uuid>,
    /// Fragments skipped because a near-duplicate already existed
    pub deduplicated: usize,
}

/// Tuning for one retrieval call; unset fields fall back to the service
/// config
#[derive(Debug, Clone, Default)]
pub struct RetrieveOptions {
    /// Result cap
    pub count: Option<usize>,
    /// Minimum similarity for a hit to qualify
    pub match_threshold: Option<f32>,
    /// Cancels the retrieval at the next suspension point
    pub cancel: CancellationToken,
}

/// A retrieval query: raw text to be embedded, or a ready embedding
#[derive(Debug, Clone)]
pub enum KnowledgeQuery {
    /// Text to embed through the cache and provider
    Text(String),
    /// A precomputed query embedding
    Embedding(Vec<f32>),
}

impl From<&str> for KnowledgeQuery {
    fn from(text: &str) -> Self {
        KnowledgeQuery::Text(text.to_string())
    }
}

impl From<String> for KnowledgeQuery {
    fn from(text: String) -> Self {
        KnowledgeQuery::Text(text)
    }
}

impl From<Vec<f32>> for KnowledgeQuery {
    fn from(embedding: Vec<f32>) -> Self {
        KnowledgeQuery::Embedding(embedding)
    }
}

/// A single retrieval result
#[derive(Debug, Clone)]
pub struct KnowledgeHit {
    /// The matched fragment
    pub fragment: Memory,
    /// Similarity of the fragment to the query, in [0, 1]
    pub similarity: f32,
    /// The fragment's source document, full text included
    pub document: Memory,
}

/// Orchestrates document and fragment tiers for knowledge ingest and
/// retrieval
#[derive(Clone)]
pub struct KnowledgeService {
    documents: MemoryManager,
    fragments: MemoryManager,
    config: Arc<KnowledgeConfig>,
}

impl KnowledgeService {
    /// Build a service over a store and provider, validating the config.
    ///
    /// Both tiers share the store, the provider, and one embedding cache.
    pub fn new(
        store: Arc<dyn MemoryStore>,
        provider: Arc<dyn EmbeddingProvider>,
        config: KnowledgeConfig,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let cache = Arc::new(EmbeddingCache::new(config.cache.clone()));

        Ok(KnowledgeService {
            documents: MemoryManager::new(
                MemoryKind::Documents,
                Arc::clone(&store),
                Arc::clone(&provider),
                Arc::clone(&cache),
                Arc::clone(&config),
            ),
            fragments: MemoryManager::new(
                MemoryKind::Fragments,
                store,
                provider,
                cache,
                Arc::clone(&config),
            ),
            config,
        })
    }

    /// The manager bound to the documents tier
    pub fn documents(&self) -> &MemoryManager {
        &self.documents
    }

    /// The manager bound to the fragments tier
    pub fn fragments(&self) -> &MemoryManager {
        &self.fragments
    }

    /// Ingest a knowledge item: store the document, chunk it, and store one
    /// embedded fragment per chunk.
    ///
    /// The document goes in first with a placeholder zero vector (documents
    /// are never vector-searched) and is not rolled back if fragments fail;
    /// it is the source of truth for a retry. Fragment ids derive from the
    /// document id and chunk index, and chunking is deterministic, so
    /// re-ingesting the same item overwrites its previous fragments instead
    /// of duplicating them. Fragment work runs with bounded concurrency and
    /// every fragment either commits, is reported deduplicated, or is
    /// reported failed in the returned error.
    pub async fn set(&self, item: KnowledgeItem, options: IngestOptions) -> Result<IngestReport> {
        let chunk_size = options.chunk_size.unwrap_or(self.config.chunk_size);
        let bleed = options.bleed.unwrap_or(self.config.bleed);
        chunking::validate(chunk_size, bleed)?;

        if item.text.trim().is_empty() {
            return Err(Error::Validation("knowledge text must not be empty".into()));
        }
        if options.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let document_id = item
            .id
            .unwrap_or_else(|| Memory::content_addressed_id(item.scope.room, &item.text));

        let mut document = Memory::new(item.scope, item.text.clone()).with_id(document_id);
        if let Some(metadata) = item.metadata {
            document = document.with_metadata(metadata);
        }
        document.embedding = Some(Embedding::Computed {
            vector: vec![0.0; self.config.dimensions],
        });

        cancellable(&options.cancel, self.documents.create_memory(document, false)).await?;

        let chunks = chunking::split(&item.text, chunk_size, bleed)?;
        debug!(document = %document_id, chunks = chunks.len(), "document chunked");

        let cancel = &options.cancel;
        let fragments = &self.fragments;
        let outcomes: Vec<(usize, Result<crate::manager::CreateOutcome>)> =
            stream::iter(chunks.into_iter().enumerate())
                .map(|(index, text)| async move {
                    let result = cancellable(cancel, async {
                        let fragment = Memory::new(item.scope, text)
                            .with_id(Memory::fragment_id(document_id, index))
                            .with_source(document_id);
                        let fragment = fragments.add_embedding(fragment).await?;
                        fragments.create_memory(fragment, true).await
                    })
                    .await;
                    (index, result)
                })
                .buffered(self.config.ingest_concurrency)
                .collect()
                .await;

        let mut stored = Vec::new();
        let mut deduplicated = 0;
        let mut failed = Vec::new();
        let mut cancelled = false;
        for (index, outcome) in outcomes {
            match outcome {
                Ok(outcome) => {
                    if outcome.is_deduplicated() {
                        deduplicated += 1;
                    }
                    stored.push(outcome.id());
                }
                Err(Error::Cancelled) => cancelled = true,
                Err(e) => failed.push(FragmentError {
                    index,
                    reason: e.to_string(),
                }),
            }
        }

        if cancelled {
            return Err(Error::Cancelled);
        }
        if !failed.is_empty() {
            warn!(
                document = %document_id,
                failed = failed.len(),
                "ingest stored the document but some fragments failed"
            );
            return Err(Error::PartialIngest(IngestFailure {
                document_id,
                succeeded: stored,
                failed,
            }));
        }

        info!(
            document = %document_id,
            fragments = stored.len(),
            deduplicated,
            "knowledge ingested"
        );
        Ok(IngestReport {
            document_id,
            fragments: stored,
            deduplicated,
        })
    }

    /// Retrieve knowledge relevant to a query.
    ///
    /// Searches the fragments tier and resolves each hit's source document;
    /// hits whose document is missing are dropped rather than failing the
    /// call. Results come back ordered by descending similarity.
    pub async fn get(
        &self,
        scope: Scope,
        query: impl Into<KnowledgeQuery>,
        options: RetrieveOptions,
    ) -> Result<Vec<KnowledgeHit>> {
        if options.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let embedding = match query.into() {
            KnowledgeQuery::Embedding(embedding) => embedding,
            KnowledgeQuery::Text(text) => {
                if text.trim().is_empty() {
                    return Err(Error::Validation("query text must not be empty".into()));
                }
                cancellable(&options.cancel, self.fragments.embed_text(&scope, &text))
                    .await?
                    .vector()
                    .to_vec()
            }
        };

        let request = SearchRequest {
            scope,
            match_threshold: options.match_threshold.unwrap_or(self.config.match_threshold),
            count: options.count.unwrap_or(5),
            unique: true,
        };
        let hits = cancellable(
            &options.cancel,
            self.fragments.search_by_embedding(&embedding, request),
        )
        .await?;

        let mut results = Vec::with_capacity(hits.len());
        for ScoredMemory { memory, similarity } in hits {
            let Some(source) = memory.content.source else {
                warn!(fragment = %memory.id, "fragment has no source document, dropping hit");
                continue;
            };
            match cancellable(&options.cancel, self.documents.get_memory_by_id(source)).await? {
                Some(document) => results.push(KnowledgeHit {
                    fragment: memory,
                    similarity,
                    document,
                }),
                None => {
                    warn!(
                        fragment = %memory.id,
                        document = %source,
                        "source document missing, dropping hit"
                    );
                }
            }
        }

        debug!(hits = results.len(), "knowledge retrieved");
        Ok(results)
    }

    /// Delete a document and all of its fragments.
    ///
    /// Fragments go first, so an interruption leaves a fragment-less
    /// document rather than orphaned fragments. Absent ids succeed.
    pub async fn remove(&self, document_id: Uuid) -> Result<()> {
        self.fragments.remove_memories_by_source(document_id).await?;
        self.documents.remove_memory(document_id).await?;
        info!(document = %document_id, "knowledge removed");
        Ok(())
    }

    /// Delete every document and fragment in a scope, fragments first
    pub async fn clear(&self, scope: &Scope) -> Result<()> {
        self.fragments.remove_all_memories(scope).await?;
        self.documents.remove_all_memories(scope).await?;
        info!(room = %scope.room, "knowledge scope cleared");
        Ok(())
    }

    /// Number of documents stored in a scope
    pub async fn count(&self, scope: &Scope) -> Result<usize> {
        self.documents.count_memories(scope, false).await
    }
}

/// Run a future unless the token fires first.
async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = fut => result,
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use super::*;
    use crate::embeddings::testing::{keyword_embedding, CountingEmbedder, KeywordEmbedder};
    use crate::store::InMemoryStore;
    use crate::types::MemoryKind;

    fn service() -> KnowledgeService {
        service_with(Arc::new(InMemoryStore::new()), Arc::new(KeywordEmbedder))
    }

    fn service_with(
        store: Arc<dyn MemoryStore>,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> KnowledgeService {
        let config = KnowledgeConfig {
            dimensions: 8,
            ..Default::default()
        };
        KnowledgeService::new(store, provider, config).unwrap()
    }

    /// A 1500-character document whose tail talks about a distinct topic, so
    /// keyword embeddings can single out the final fragment.
    fn topical_document() -> String {
        let mut text = "The quick brown fox jumps over the lazy dog again and again. "
            .repeat(23);
        text.truncate(1420);
        text.push_str(" Rust ownership and borrowing keep every database search safe. ");
        text.truncate(1500);
        while text.chars().count() < 1500 {
            text.push('x');
        }
        text
    }

    #[tokio::test]
    async fn test_ingest_1500_char_document() {
        let service = service();
        let scope = Scope::room(Uuid::new_v4());
        let text = topical_document();

        let report = service
            .set(KnowledgeItem::new(scope, text.clone()), IngestOptions::default())
            .await
            .unwrap();

        assert_eq!(report.fragments.len(), 4);
        assert_eq!(report.deduplicated, 0);

        let document = service
            .documents()
            .get_memory_by_id(report.document_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(document.content.text, text);
        assert_eq!(document.kind, MemoryKind::Documents);

        // Fragment ids are deterministic and linked to the document
        for (i, id) in report.fragments.iter().enumerate() {
            assert_eq!(*id, Memory::fragment_id(report.document_id, i));
            let fragment = service
                .fragments()
                .get_memory_by_id(*id)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(fragment.content.source, Some(report.document_id));
            assert!(text.contains(&fragment.content.text));
        }
    }

    #[tokio::test]
    async fn test_retrieval_resolves_source_document() {
        let service = service();
        let scope = Scope::room(Uuid::new_v4());
        let text = topical_document();

        let report = service
            .set(KnowledgeItem::new(scope, text.clone()), IngestOptions::default())
            .await
            .unwrap();

        let hits = service
            .get(scope, "rust database search", RetrieveOptions::default())
            .await
            .unwrap();

        assert!(!hits.is_empty());
        let top = &hits[0];
        // The topical sentence lands inside the third fragment
        assert_eq!(top.fragment.id, report.fragments[2]);
        assert_eq!(top.document.id, report.document_id);
        assert_eq!(top.document.content.text, text);
        assert!(text.contains(&top.fragment.content.text));
        for pair in hits.windows(2) {
            assert!(pair[0].similarity >= pair[1].similarity);
        }
    }

    #[tokio::test]
    async fn test_query_by_ready_embedding() {
        let service = service();
        let scope = Scope::room(Uuid::new_v4());

        service
            .set(
                KnowledgeItem::new(scope, topical_document()),
                IngestOptions::default(),
            )
            .await
            .unwrap();

        let hits = service
            .get(
                scope,
                keyword_embedding("rust database"),
                RetrieveOptions::default(),
            )
            .await
            .unwrap();
        assert!(!hits.is_empty());
    }

    #[tokio::test]
    async fn test_reingest_is_idempotent() {
        let service = service();
        let scope = Scope::room(Uuid::new_v4());
        let text = topical_document();

        let first = service
            .set(KnowledgeItem::new(scope, text.clone()), IngestOptions::default())
            .await
            .unwrap();
        let second = service
            .set(KnowledgeItem::new(scope, text), IngestOptions::default())
            .await
            .unwrap();

        assert_eq!(first.document_id, second.document_id);
        assert_eq!(service.count(&scope).await.unwrap(), 1);
        assert_eq!(
            service
                .fragments()
                .count_memories(&scope, false)
                .await
                .unwrap(),
            4
        );
    }

    #[tokio::test]
    async fn test_short_text_single_fragment() {
        let service = service();
        let scope = Scope::room(Uuid::new_v4());

        let report = service
            .set(
                KnowledgeItem::new(scope, "one short note about music"),
                IngestOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(report.fragments.len(), 1);

        let fragment = service
            .fragments()
            .get_memory_by_id(report.fragments[0])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fragment.content.text, "one short note about music");
    }

    #[tokio::test]
    async fn test_rejects_empty_text_and_bad_chunking() {
        let service = service();
        let scope = Scope::room(Uuid::new_v4());

        let err = service
            .set(KnowledgeItem::new(scope, "  "), IngestOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = service
            .set(
                KnowledgeItem::new(scope, "some text"),
                IngestOptions {
                    chunk_size: Some(20),
                    bleed: Some(20),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let service = service();
        let scope = Scope::room(Uuid::new_v4());

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = service
            .set(
                KnowledgeItem::new(scope, "text that never lands"),
                IngestOptions {
                    cancel: cancel.clone(),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));

        let err = service
            .get(
                scope,
                "query",
                RetrieveOptions {
                    cancel,
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn test_missing_document_drops_hit() {
        let service = service();
        let scope = Scope::room(Uuid::new_v4());

        // A fragment pointing at a document that was never stored
        let orphan = Memory::new(scope, "orphaned rust fragment")
            .with_id(Uuid::new_v4())
            .with_source(Uuid::new_v4());
        let orphan = service.fragments().add_embedding(orphan).await.unwrap();
        service
            .fragments()
            .create_memory(orphan, false)
            .await
            .unwrap();

        let hits = service
            .get(scope, "rust", RetrieveOptions::default())
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_remove_deletes_both_tiers() {
        let service = service();
        let scope = Scope::room(Uuid::new_v4());

        let report = service
            .set(
                KnowledgeItem::new(scope, topical_document()),
                IngestOptions::default(),
            )
            .await
            .unwrap();

        service.remove(report.document_id).await.unwrap();
        assert_eq!(service.count(&scope).await.unwrap(), 0);
        assert_eq!(
            service
                .fragments()
                .count_memories(&scope, false)
                .await
                .unwrap(),
            0
        );
        // Absent id: still success
        service.remove(report.document_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_clear_scope() {
        let service = service();
        let scope = Scope::room(Uuid::new_v4());
        let other = Scope::room(Uuid::new_v4());

        service
            .set(
                KnowledgeItem::new(scope, topical_document()),
                IngestOptions::default(),
            )
            .await
            .unwrap();
        service
            .set(
                KnowledgeItem::new(other, "a note about cooking"),
                IngestOptions::default(),
            )
            .await
            .unwrap();

        service.clear(&scope).await.unwrap();
        assert_eq!(service.count(&scope).await.unwrap(), 0);
        assert_eq!(service.count(&other).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_query_embedding_is_cached() {
        let provider = Arc::new(CountingEmbedder::new());
        let service = service_with(Arc::new(InMemoryStore::new()), provider.clone());
        let scope = Scope::room(Uuid::new_v4());

        service
            .set(
                KnowledgeItem::new(scope, "a note about rust"),
                IngestOptions::default(),
            )
            .await
            .unwrap();
        let after_ingest = provider.call_count();

        service
            .get(scope, "tell me about rust", RetrieveOptions::default())
            .await
            .unwrap();
        service
            .get(scope, "tell me about rust", RetrieveOptions::default())
            .await
            .unwrap();

        assert_eq!(provider.call_count(), after_ingest + 1);
    }

    /// Store wrapper that fails inserts whose text contains a marker, for
    /// exercising the partial-ingest path.
    struct SabotagedStore {
        inner: InMemoryStore,
        marker: String,
    }

    #[async_trait]
    impl MemoryStore for SabotagedStore {
        async fn insert(&self, memory: &Memory) -> Result<()> {
            if memory.kind == MemoryKind::Fragments && memory.content.text.contains(&self.marker) {
                return Err(Error::Internal("injected store failure".into()));
            }
            self.inner.insert(memory).await
        }

        async fn get_by_id(&self, kind: MemoryKind, id: Uuid) -> Result<Option<Memory>> {
            self.inner.get_by_id(kind, id).await
        }

        async fn list_by_scope(
            &self,
            kind: MemoryKind,
            scope: &Scope,
            limit: Option<usize>,
            start: Option<DateTime<Utc>>,
            end: Option<DateTime<Utc>>,
        ) -> Result<Vec<Memory>> {
            self.inner.list_by_scope(kind, scope, limit, start, end).await
        }

        async fn search_by_vector(
            &self,
            kind: MemoryKind,
            scope: &Scope,
            vector: &[f32],
            threshold: f32,
            limit: usize,
        ) -> Result<Vec<ScoredMemory>> {
            self.inner
                .search_by_vector(kind, scope, vector, threshold, limit)
                .await
        }

        async fn delete(&self, kind: MemoryKind, id: Uuid) -> Result<()> {
            self.inner.delete(kind, id).await
        }

        async fn delete_by_scope(&self, kind: MemoryKind, scope: &Scope) -> Result<()> {
            self.inner.delete_by_scope(kind, scope).await
        }

        async fn delete_by_source(&self, kind: MemoryKind, source: Uuid) -> Result<()> {
            self.inner.delete_by_source(kind, source).await
        }

        async fn count(&self, kind: MemoryKind, scope: &Scope) -> Result<usize> {
            self.inner.count(kind, scope).await
        }
    }

    #[tokio::test]
    async fn test_partial_ingest_reports_failed_fragments() {
        let store = Arc::new(SabotagedStore {
            inner: InMemoryStore::new(),
            marker: "POISON".to_string(),
        });
        let service = service_with(store, Arc::new(KeywordEmbedder));
        let scope = Scope::room(Uuid::new_v4());

        // Chunked at 40/5, the marker lands in exactly one fragment
        let mut text = "plain filler text that stores fine here. ".repeat(3);
        text.push_str("POISON lives in this stretch of text");
        text.push_str(&" and more plain filler to round it out.".repeat(2));

        let err = service
            .set(
                KnowledgeItem::new(scope, text.clone()),
                IngestOptions {
                    chunk_size: Some(40),
                    bleed: Some(5),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();

        let Error::PartialIngest(failure) = err else {
            panic!("expected PartialIngest, got another error");
        };

        // Document survives as the source of truth
        let document = service
            .documents()
            .get_memory_by_id(failure.document_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(document.content.text, text);

        assert!(!failure.failed.is_empty());
        assert!(!failure.succeeded.is_empty());
        for fragment_error in &failure.failed {
            assert!(fragment_error.reason.contains("injected store failure"));
        }

        // Succeeded fragments really are stored
        for id in &failure.succeeded {
            assert!(service
                .fragments()
                .get_memory_by_id(*id)
                .await
                .unwrap()
                .is_some());
        }
    }
}
