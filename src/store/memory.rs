//! In-memory store: no persistence, deterministic ordering.
//!
//! Backs tests and lightweight deployments. Rows carry an insertion
//! sequence number so search ties break the same way on every run.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::Result;
use crate::similarity::vector_similarity;
use crate::types::{Memory, MemoryKind, Scope, ScoredMemory};

use super::MemoryStore;

#[derive(Debug, Clone)]
struct Row {
    memory: Memory,
    seq: u64,
}

#[derive(Debug, Default)]
struct Inner {
    rows: HashMap<(MemoryKind, Uuid), Row>,
    next_seq: u64,
}

/// Memory store held entirely in process memory
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        InMemoryStore::default()
    }

    fn in_scope(memory: &Memory, scope: &Scope) -> bool {
        scope.contains(memory.scope.room, memory.scope.user, memory.scope.agent)
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn insert(&self, memory: &Memory) -> Result<()> {
        let mut inner = self.inner.write().await;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        // Upsert: a replaced row keeps its position in insertion order
        let key = (memory.kind, memory.id);
        let seq = inner.rows.get(&key).map(|r| r.seq).unwrap_or(seq);
        inner.rows.insert(
            key,
            Row {
                memory: memory.clone(),
                seq,
            },
        );
        Ok(())
    }

    async fn get_by_id(&self, kind: MemoryKind, id: Uuid) -> Result<Option<Memory>> {
        let inner = self.inner.read().await;
        Ok(inner.rows.get(&(kind, id)).map(|r| r.memory.clone()))
    }

    async fn list_by_scope(
        &self,
        kind: MemoryKind,
        scope: &Scope,
        limit: Option<usize>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Memory>> {
        let inner = self.inner.read().await;
        let mut rows: Vec<&Row> = inner
            .rows
            .values()
            .filter(|r| r.memory.kind == kind && Self::in_scope(&r.memory, scope))
            .filter(|r| start.is_none_or(|s| r.memory.created_at >= s))
            .filter(|r| end.is_none_or(|e| r.memory.created_at <= e))
            .collect();

        // Most recent first; sequence number disambiguates equal timestamps
        rows.sort_by(|a, b| {
            b.memory
                .created_at
                .cmp(&a.memory.created_at)
                .then(b.seq.cmp(&a.seq))
        });

        if let Some(limit) = limit {
            rows.truncate(limit);
        }
        Ok(rows.into_iter().map(|r| r.memory.clone()).collect())
    }

    async fn search_by_vector(
        &self,
        kind: MemoryKind,
        scope: &Scope,
        vector: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<ScoredMemory>> {
        let inner = self.inner.read().await;
        let mut scored: Vec<(f32, u64, Memory)> = inner
            .rows
            .values()
            .filter(|r| r.memory.kind == kind && Self::in_scope(&r.memory, scope))
            .filter_map(|r| {
                let embedding = r.memory.embedding.as_ref()?;
                if embedding.is_degraded() {
                    return None;
                }
                let similarity = vector_similarity(vector, embedding.vector());
                (similarity >= threshold).then(|| (similarity, r.seq, r.memory.clone()))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.2.created_at.cmp(&b.2.created_at))
                .then(a.1.cmp(&b.1))
        });
        scored.truncate(limit);

        Ok(scored
            .into_iter()
            .map(|(similarity, _, memory)| ScoredMemory { memory, similarity })
            .collect())
    }

    async fn delete(&self, kind: MemoryKind, id: Uuid) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.rows.remove(&(kind, id));
        Ok(())
    }

    async fn delete_by_scope(&self, kind: MemoryKind, scope: &Scope) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .rows
            .retain(|(k, _), r| *k != kind || !Self::in_scope(&r.memory, scope));
        Ok(())
    }

    async fn delete_by_source(&self, kind: MemoryKind, source: Uuid) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .rows
            .retain(|(k, _), r| *k != kind || r.memory.content.source != Some(source));
        Ok(())
    }

    async fn count(&self, kind: MemoryKind, scope: &Scope) -> Result<usize> {
        let inner = self.inner.read().await;
        Ok(inner
            .rows
            .values()
            .filter(|r| r.memory.kind == kind && Self::in_scope(&r.memory, scope))
            .count())
    }
}
