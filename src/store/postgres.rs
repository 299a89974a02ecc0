//! PostgreSQL + pgvector memory store.
//!
//! One `memories` table serves both tiers, distinguished by the `kind`
//! column. Similarity is cosine mapped to [0, 1]:
//! `1 - (embedding <=> query) / 2`, the same metric the rest of the crate
//! uses, so write-time dedup and query-time search agree.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pgvector::Vector;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::config::PostgresConfig;
use crate::error::{Error, Result};
use crate::types::{Embedding, Memory, MemoryContent, MemoryKind, Scope, ScoredMemory};

use super::MemoryStore;

/// Initialize a PostgreSQL connection pool and verify pgvector is available
pub async fn init_pool(config: &PostgresConfig) -> Result<PgPool> {
    use secrecy::ExposeSecret;

    info!("Initializing PostgreSQL connection pool");

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect(config.url.expose_secret())
        .await?;

    verify_database(&pool).await?;

    info!("PostgreSQL connection pool initialized successfully");
    Ok(pool)
}

/// Verify database connection and the pgvector extension
async fn verify_database(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1").execute(pool).await?;

    let result: Option<(String,)> =
        sqlx::query_as("SELECT extname FROM pg_extension WHERE extname = 'vector'")
            .fetch_optional(pool)
            .await?;

    if result.is_none() {
        return Err(Error::Store(sqlx::Error::Configuration(
            "pgvector extension is not installed. Run: CREATE EXTENSION vector;".into(),
        )));
    }

    Ok(())
}

/// Database migrations
pub mod migrations {
    use tracing::warn;

    use super::*;

    /// Run all migrations. `dimensions` fixes the vector column width for
    /// the deployment.
    pub async fn run(pool: &PgPool, dimensions: usize) -> Result<()> {
        info!("Running memory store migrations");

        match sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(pool)
            .await
        {
            Ok(_) => info!("pgvector extension enabled"),
            Err(e) => {
                warn!("Could not create pgvector extension: {}. Vector search will not work.", e);
                warn!("If you need vector support, run as superuser: CREATE EXTENSION vector;");
            }
        }

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS memories (
                id UUID NOT NULL,
                kind TEXT NOT NULL,
                room_id UUID NOT NULL,
                user_id UUID,
                agent_id UUID,
                content JSONB NOT NULL,
                embedding vector({dimensions}),
                degraded BOOLEAN NOT NULL DEFAULT FALSE,
                degraded_reason TEXT,
                is_unique BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (kind, id)
            )
            "#
        ))
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_memories_scope
             ON memories (kind, room_id, created_at DESC)",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_memories_source
             ON memories (kind, (content->>'source'))",
        )
        .execute(pool)
        .await?;

        // HNSW needs pgvector >= 0.5; older installs still work, just slower
        match sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_memories_embedding
             ON memories USING hnsw (embedding vector_cosine_ops)",
        )
        .execute(pool)
        .await
        {
            Ok(_) => info!("HNSW index ready"),
            Err(e) => warn!("Could not create HNSW index: {}. Falling back to sequential scan.", e),
        }

        Ok(())
    }
}

/// Memory store backed by PostgreSQL + pgvector
#[derive(Clone)]
pub struct PgMemoryStore {
    pool: PgPool,
}

impl PgMemoryStore {
    /// Create a store over an initialized pool
    pub fn new(pool: PgPool) -> Self {
        PgMemoryStore { pool }
    }
}

#[derive(FromRow)]
struct MemoryRow {
    id: Uuid,
    kind: String,
    room_id: Uuid,
    user_id: Option<Uuid>,
    agent_id: Option<Uuid>,
    content: serde_json::Value,
    embedding: Option<Vector>,
    degraded: bool,
    degraded_reason: Option<String>,
    is_unique: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<MemoryRow> for Memory {
    type Error = Error;

    fn try_from(row: MemoryRow) -> Result<Memory> {
        let kind = MemoryKind::parse(&row.kind)
            .ok_or_else(|| Error::Internal(format!("unknown memory kind: {}", row.kind)))?;
        let content: MemoryContent = serde_json::from_value(row.content)?;
        let embedding = row.embedding.map(|v| {
            if row.degraded {
                Embedding::Degraded {
                    vector: v.to_vec(),
                    reason: row.degraded_reason.unwrap_or_default(),
                }
            } else {
                Embedding::Computed { vector: v.to_vec() }
            }
        });

        Ok(Memory {
            id: row.id,
            kind,
            content,
            embedding,
            scope: Scope {
                room: row.room_id,
                user: row.user_id,
                agent: row.agent_id,
            },
            unique: row.is_unique,
            created_at: row.created_at,
        })
    }
}

const SELECT_COLUMNS: &str = "id, kind, room_id, user_id, agent_id, content, embedding, \
                              degraded, degraded_reason, is_unique, created_at";

#[async_trait]
impl MemoryStore for PgMemoryStore {
    async fn insert(&self, memory: &Memory) -> Result<()> {
        let embedding = memory.vector().map(|v| Vector::from(v.to_vec()));
        let (degraded, degraded_reason) = match &memory.embedding {
            Some(Embedding::Degraded { reason, .. }) => (true, Some(reason.clone())),
            _ => (false, None),
        };

        sqlx::query(
            r#"
            INSERT INTO memories (id, kind, room_id, user_id, agent_id, content, embedding,
                                  degraded, degraded_reason, is_unique, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (kind, id) DO UPDATE SET
                content = EXCLUDED.content,
                embedding = EXCLUDED.embedding,
                degraded = EXCLUDED.degraded,
                degraded_reason = EXCLUDED.degraded_reason,
                is_unique = EXCLUDED.is_unique
            "#,
        )
        .bind(memory.id)
        .bind(memory.kind.as_str())
        .bind(memory.scope.room)
        .bind(memory.scope.user)
        .bind(memory.scope.agent)
        .bind(serde_json::to_value(&memory.content)?)
        .bind(embedding)
        .bind(degraded)
        .bind(degraded_reason)
        .bind(memory.unique)
        .bind(memory.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_by_id(&self, kind: MemoryKind, id: Uuid) -> Result<Option<Memory>> {
        let row: Option<MemoryRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM memories WHERE kind = $1 AND id = $2"
        ))
        .bind(kind.as_str())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Memory::try_from).transpose()
    }

    async fn list_by_scope(
        &self,
        kind: MemoryKind,
        scope: &Scope,
        limit: Option<usize>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Memory>> {
        let rows: Vec<MemoryRow> = sqlx::query_as(&format!(
            r#"
            SELECT {SELECT_COLUMNS} FROM memories
            WHERE kind = $1 AND room_id = $2
              AND ($3::uuid IS NULL OR user_id = $3)
              AND ($4::uuid IS NULL OR agent_id = $4)
              AND ($5::timestamptz IS NULL OR created_at >= $5)
              AND ($6::timestamptz IS NULL OR created_at <= $6)
            ORDER BY created_at DESC, id DESC
            LIMIT $7
            "#
        ))
        .bind(kind.as_str())
        .bind(scope.room)
        .bind(scope.user)
        .bind(scope.agent)
        .bind(start)
        .bind(end)
        .bind(limit.map(|l| l as i64).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Memory::try_from).collect()
    }

    async fn search_by_vector(
        &self,
        kind: MemoryKind,
        scope: &Scope,
        vector: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<ScoredMemory>> {
        #[derive(FromRow)]
        struct ScoredRow {
            #[sqlx(flatten)]
            row: MemoryRow,
            similarity: f64,
        }

        let query_vector = Vector::from(vector.to_vec());

        let rows: Vec<ScoredRow> = sqlx::query_as(&format!(
            r#"
            SELECT {SELECT_COLUMNS},
                   1 - (embedding <=> $1) / 2 AS similarity
            FROM memories
            WHERE kind = $2 AND room_id = $3
              AND ($4::uuid IS NULL OR user_id = $4)
              AND ($5::uuid IS NULL OR agent_id = $5)
              AND embedding IS NOT NULL
              AND degraded = FALSE
              AND 1 - (embedding <=> $1) / 2 >= $6
            ORDER BY similarity DESC, created_at ASC, id ASC
            LIMIT $7
            "#
        ))
        .bind(&query_vector)
        .bind(kind.as_str())
        .bind(scope.room)
        .bind(scope.user)
        .bind(scope.agent)
        .bind(threshold as f64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| {
                Ok(ScoredMemory {
                    similarity: r.similarity as f32,
                    memory: Memory::try_from(r.row)?,
                })
            })
            .collect()
    }

    async fn delete(&self, kind: MemoryKind, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM memories WHERE kind = $1 AND id = $2")
            .bind(kind.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn delete_by_scope(&self, kind: MemoryKind, scope: &Scope) -> Result<()> {
        sqlx::query(
            r#"
            DELETE FROM memories
            WHERE kind = $1 AND room_id = $2
              AND ($3::uuid IS NULL OR user_id = $3)
              AND ($4::uuid IS NULL OR agent_id = $4)
            "#,
        )
        .bind(kind.as_str())
        .bind(scope.room)
        .bind(scope.user)
        .bind(scope.agent)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_by_source(&self, kind: MemoryKind, source: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM memories WHERE kind = $1 AND content->>'source' = $2")
            .bind(kind.as_str())
            .bind(source.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn count(&self, kind: MemoryKind, scope: &Scope) -> Result<usize> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM memories
            WHERE kind = $1 AND room_id = $2
              AND ($3::uuid IS NULL OR user_id = $3)
              AND ($4::uuid IS NULL OR agent_id = $4)
            "#,
        )
        .bind(kind.as_str())
        .bind(scope.room)
        .bind(scope.user)
        .bind(scope.agent)
        .fetch_one(&self.pool)
        .await?;

        Ok(count as usize)
    }
}
