//! Persistence backends for memories.
//!
//! The [`MemoryStore`] trait abstracts durable keyed storage with
//! nearest-neighbor search so any backing store can satisfy it:
//! - `PgMemoryStore`: PostgreSQL with pgvector for production deployments
//! - `InMemoryStore`: no persistence, for tests and lightweight hosts

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::types::{Memory, MemoryKind, Scope, ScoredMemory};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::{init_pool, migrations, PgMemoryStore};

/// Durable keyed storage for memory records.
///
/// Implementations provide at least read-committed isolation per row.
/// `insert` is an upsert on id, which is what makes deterministic-id
/// re-ingestion idempotent. All deletes are idempotent.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Insert a memory, replacing any existing row with the same kind and id
    async fn insert(&self, memory: &Memory) -> Result<()>;

    /// Point lookup by id within a kind
    async fn get_by_id(&self, kind: MemoryKind, id: Uuid) -> Result<Option<Memory>>;

    /// List memories in a scope, most recent first, optionally time-bounded
    /// and truncated to `limit`
    async fn list_by_scope(
        &self,
        kind: MemoryKind,
        scope: &Scope,
        limit: Option<usize>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Memory>>;

    /// Nearest-neighbor search within a scope.
    ///
    /// Returns memories whose similarity to `vector` is at or above
    /// `threshold`, ordered by descending similarity with ties broken by
    /// `(created_at, insertion order)`, truncated to `limit`. Memories
    /// without an embedding and degraded embeddings are not searched.
    async fn search_by_vector(
        &self,
        kind: MemoryKind,
        scope: &Scope,
        vector: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<ScoredMemory>>;

    /// Delete by id; deleting an absent id succeeds
    async fn delete(&self, kind: MemoryKind, id: Uuid) -> Result<()>;

    /// Delete every memory in a scope
    async fn delete_by_scope(&self, kind: MemoryKind, scope: &Scope) -> Result<()>;

    /// Delete every memory whose `content.source` is the given id
    async fn delete_by_source(&self, kind: MemoryKind, source: Uuid) -> Result<()>;

    /// Count memories in a scope
    async fn count(&self, kind: MemoryKind, scope: &Scope) -> Result<usize>;
}
