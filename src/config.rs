//! Configuration for the knowledge subsystem.
//!
//! The host process constructs a [`KnowledgeConfig`] (or deserializes one
//! from its own config file) and may overlay environment variables with
//! [`apply_env_overrides`]. Precedence: defaults < caller-provided values <
//! environment.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration for the knowledge subsystem
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    /// Minimum similarity for a search hit to qualify
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f32,
    /// Default result cap for manager-level queries
    #[serde(default = "default_match_count")]
    pub match_count: usize,
    /// Chunk size in characters for document ingestion
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Overlap in characters shared by consecutive fragments
    #[serde(default = "default_bleed")]
    pub bleed: usize,
    /// Similarity at or above which two memories count as duplicates
    #[serde(default = "default_dedup_threshold")]
    pub dedup_threshold: f32,
    /// Bound on in-flight fragment embed/store work during one ingest
    #[serde(default = "default_ingest_concurrency")]
    pub ingest_concurrency: usize,
    /// Embedding dimensionality, fixed per deployment
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
    /// Embedding cache tuning
    #[serde(default)]
    pub cache: EmbeddingCacheConfig,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        KnowledgeConfig {
            match_threshold: default_match_threshold(),
            match_count: default_match_count(),
            chunk_size: default_chunk_size(),
            bleed: default_bleed(),
            dedup_threshold: default_dedup_threshold(),
            ingest_concurrency: default_ingest_concurrency(),
            dimensions: default_dimensions(),
            cache: EmbeddingCacheConfig::default(),
        }
    }
}

impl KnowledgeConfig {
    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        crate::chunking::validate(self.chunk_size, self.bleed)?;
        if self.dimensions == 0 {
            return Err(Error::Config("dimensions must be greater than zero".into()));
        }
        if !(0.0..=1.0).contains(&self.match_threshold) {
            return Err(Error::Config(format!(
                "match_threshold must be in [0, 1], got {}",
                self.match_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.dedup_threshold) {
            return Err(Error::Config(format!(
                "dedup_threshold must be in [0, 1], got {}",
                self.dedup_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.cache.min_similarity) {
            return Err(Error::Config(format!(
                "cache.min_similarity must be in [0, 1], got {}",
                self.cache.min_similarity
            )));
        }
        if self.ingest_concurrency == 0 {
            return Err(Error::Config(
                "ingest_concurrency must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn default_match_threshold() -> f32 {
    0.1
}

fn default_match_count() -> usize {
    10
}

fn default_chunk_size() -> usize {
    512
}

fn default_bleed() -> usize {
    20
}

fn default_dedup_threshold() -> f32 {
    0.95
}

fn default_ingest_concurrency() -> usize {
    4
}

fn default_dimensions() -> usize {
    384
}

/// Embedding cache tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingCacheConfig {
    /// Capacity of the exact-match layer
    #[serde(default = "default_exact_capacity")]
    pub exact_capacity: u64,
    /// Fuzzy candidates retained per scope (FIFO eviction)
    #[serde(default = "default_max_entries_per_scope")]
    pub max_entries_per_scope: usize,
    /// Minimum text similarity for a cached embedding to be reused
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,
    /// Time-to-live of exact-match entries in seconds
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for EmbeddingCacheConfig {
    fn default() -> Self {
        EmbeddingCacheConfig {
            exact_capacity: default_exact_capacity(),
            max_entries_per_scope: default_max_entries_per_scope(),
            min_similarity: default_min_similarity(),
            ttl_secs: default_ttl_secs(),
        }
    }
}

fn default_exact_capacity() -> u64 {
    1000
}

fn default_max_entries_per_scope() -> usize {
    128
}

fn default_min_similarity() -> f32 {
    0.95
}

fn default_ttl_secs() -> u64 {
    30 * 60
}

/// PostgreSQL connection configuration for the pgvector-backed store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// Database URL
    #[serde(skip_serializing)]
    pub url: SecretString,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl PostgresConfig {
    /// Build a config from a database URL with pool defaults
    pub fn new(url: impl Into<String>) -> Self {
        PostgresConfig {
            url: SecretString::from(url.into()),
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

fn default_max_connections() -> u32 {
    5
}

fn default_connect_timeout() -> u64 {
    30
}

/// Apply environment variable overrides to an existing config.
///
/// Loads `.env` if present, then overlays any set `MNEMA_*` variables. Env
/// vars have the highest precedence. Unparseable values are ignored.
pub fn apply_env_overrides(config: &mut KnowledgeConfig) {
    dotenvy::dotenv().ok();

    if let Some(v) = env_parse::<f32>("MNEMA_MATCH_THRESHOLD") {
        config.match_threshold = v;
    }
    if let Some(v) = env_parse::<usize>("MNEMA_MATCH_COUNT") {
        config.match_count = v;
    }
    if let Some(v) = env_parse::<usize>("MNEMA_CHUNK_SIZE") {
        config.chunk_size = v;
    }
    if let Some(v) = env_parse::<usize>("MNEMA_BLEED") {
        config.bleed = v;
    }
    if let Some(v) = env_parse::<f32>("MNEMA_DEDUP_THRESHOLD") {
        config.dedup_threshold = v;
    }
    if let Some(v) = env_parse::<usize>("MNEMA_INGEST_CONCURRENCY") {
        config.ingest_concurrency = v;
    }
    if let Some(v) = env_parse::<usize>("MNEMA_EMBEDDING_DIMENSIONS") {
        config.dimensions = v;
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = KnowledgeConfig::default();
        assert_eq!(config.match_threshold, 0.1);
        assert_eq!(config.match_count, 10);
        assert_eq!(config.chunk_size, 512);
        assert_eq!(config.bleed, 20);
        assert_eq!(config.dimensions, 384);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_chunking() {
        let config = KnowledgeConfig {
            bleed: 512,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = KnowledgeConfig {
            chunk_size: 0,
            bleed: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_out_of_range_thresholds() {
        let config = KnowledgeConfig {
            match_threshold: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = KnowledgeConfig {
            dedup_threshold: -0.1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: KnowledgeConfig =
            serde_json::from_str(r#"{ "chunk_size": 256, "bleed": 32 }"#).unwrap();
        assert_eq!(config.chunk_size, 256);
        assert_eq!(config.bleed, 32);
        assert_eq!(config.match_count, 10);
    }
}
