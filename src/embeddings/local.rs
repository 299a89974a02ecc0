//! Local embedding generation via fastembed
//!
//! Uses the multilingual-e5-small model (384 dimensions, ~90MB).
//! Model auto-downloads on first use. Embedding work is CPU-bound, so it
//! runs on the blocking pool.

use std::sync::Arc;

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use crate::error::{Error, Result};

use super::EmbeddingProvider;

/// Local embedding provider wrapping fastembed
#[derive(Clone)]
pub struct LocalEmbedder {
    model: Arc<TextEmbedding>,
}

impl LocalEmbedder {
    /// Create a new local embedder with multilingual-e5-small
    pub fn new() -> Result<Self> {
        let model = TextEmbedding::try_new(
            InitOptions::new(EmbeddingModel::MultilingualE5Small).with_show_download_progress(true),
        )
        .map_err(|e| Error::Provider(format!("Failed to init embedding model: {}", e)))?;

        Ok(LocalEmbedder {
            model: Arc::new(model),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let model = self.model.clone();
        let text = text.to_string();

        tokio::task::spawn_blocking(move || {
            let embeddings = model
                .embed(vec![text], None)
                .map_err(|e| Error::Provider(format!("Embedding error: {}", e)))?;
            embeddings
                .into_iter()
                .next()
                .ok_or_else(|| Error::Provider("No embedding returned".into()))
        })
        .await
        .map_err(|e| Error::Provider(format!("Embedding task join error: {}", e)))?
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = self.model.clone();
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            model
                .embed(texts, None)
                .map_err(|e| Error::Provider(format!("Batch embedding error: {}", e)))
        })
        .await
        .map_err(|e| Error::Provider(format!("Embedding task join error: {}", e)))?
    }

    fn dimensions(&self) -> usize {
        384
    }

    fn model_name(&self) -> &str {
        "multilingual-e5-small"
    }
}
