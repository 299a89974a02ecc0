//! Embedding providers and the scope-keyed embedding cache.
//!
//! A provider converts text to a fixed-length vector and fails closed with
//! [`Error::Provider`](crate::error::Error::Provider); it never silently
//! returns zeros. The zero-vector degraded fallback is a deliberate decision
//! made by the memory manager, not by provider code.

use async_trait::async_trait;

use crate::error::Result;

pub mod cache;
#[cfg(feature = "local-embeddings")]
pub mod local;
pub mod openai;

pub use cache::{CachedEmbedding, EmbeddingCache};
#[cfg(feature = "local-embeddings")]
pub use local::LocalEmbedder;
pub use openai::OpenAiEmbedder;

/// Converts text to a fixed-length embedding vector
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// Embedding dimensionality, fixed per deployment
    fn dimensions(&self) -> usize;

    /// Identifier of the underlying model
    fn model_name(&self) -> &str;
}
