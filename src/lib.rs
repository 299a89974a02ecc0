//! # Mnema
//!
//! A content-addressable memory and knowledge retrieval engine.
//!
//! ## Features
//!
//! - **Two-Tier Knowledge Store:** full documents plus overlapping,
//!   searchable fragments, linked by deterministic ids
//! - **Embedding Cache:** exact and fuzzy (edit-distance) reuse of computed
//!   embeddings, keyed by tenant scope
//! - **Deterministic Chunking:** pure, character-exact splitting with
//!   configurable overlap, so re-ingestion is idempotent
//! - **Pluggable Persistence:** PostgreSQL + pgvector or an in-memory store
//!   behind one trait
//! - **Pluggable Embeddings:** local fastembed model or any
//!   OpenAI-compatible endpoint

pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod knowledge;
pub mod manager;
pub mod similarity;
pub mod store;
pub mod types;

pub use config::{apply_env_overrides, EmbeddingCacheConfig, KnowledgeConfig, PostgresConfig};
pub use embeddings::{EmbeddingCache, EmbeddingProvider};
pub use error::{Error, Result};
pub use knowledge::{
    IngestOptions, IngestReport, KnowledgeHit, KnowledgeItem, KnowledgeQuery, KnowledgeService,
    RetrieveOptions,
};
pub use manager::{CreateOutcome, GetMemoriesRequest, MemoryManager, SearchRequest};
pub use store::{InMemoryStore, MemoryStore, PgMemoryStore};
pub use types::{Embedding, Memory, MemoryContent, MemoryKind, Scope, ScoredMemory};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const NAME: &str = env!("CARGO_PKG_NAME");
