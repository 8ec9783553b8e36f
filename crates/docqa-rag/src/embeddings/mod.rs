//! Embedding providers
//!
//! Implementations:
//! - `OnnxEmbedder`: local all-MiniLM-L6-v2 through ONNX Runtime (feature `onnx`)
//! - `OllamaEmbedder`: Ollama server `/api/embed`

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{EmbeddingBackend, RagConfig};
use crate::error::{Error, Result};

mod ollama;
#[cfg(feature = "onnx")]
mod onnx;

pub use ollama::OllamaEmbedder;
#[cfg(feature = "onnx")]
pub use onnx::OnnxEmbedder;

/// Trait for generating text embeddings.
///
/// Output is order-preserving with one vector per input, and every vector
/// has `dimensions()` components.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embeddings for multiple texts
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        match (vectors.pop(), vectors.is_empty()) {
            (Some(vector), true) => Ok(vector),
            _ => Err(Error::embedding(format!(
                "{} returned an unexpected number of vectors for one input",
                self.name()
            ))),
        }
    }

    /// Embedding dimensions (384 for all-MiniLM-L6-v2)
    fn dimensions(&self) -> usize;

    /// Identifier of the model producing the vectors; persisted with the index
    fn model_id(&self) -> &str;

    /// Check if the provider is healthy and available
    async fn health_check(&self) -> Result<bool>;

    /// Get provider name for logging
    fn name(&self) -> &str;
}

/// Check a provider's output against its contract
pub(crate) fn check_vectors(
    provider: &str,
    expected_count: usize,
    dimensions: usize,
    vectors: &[Vec<f32>],
) -> Result<()> {
    if vectors.len() != expected_count {
        return Err(Error::embedding(format!(
            "{} returned {} vectors for {} inputs",
            provider,
            vectors.len(),
            expected_count
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimensions) {
        return Err(Error::embedding(format!(
            "{} returned a {}-dimensional vector, expected {}",
            provider,
            bad.len(),
            dimensions
        )));
    }
    Ok(())
}

/// Create the embedding provider selected by `embeddings.backend`
pub async fn create_embedder(config: &RagConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let embeddings = &config.embeddings;
    match embeddings.backend {
        #[cfg(feature = "onnx")]
        EmbeddingBackend::Onnx => Ok(Arc::new(OnnxEmbedder::new(embeddings).await?)),
        #[cfg(not(feature = "onnx"))]
        EmbeddingBackend::Onnx => Err(Error::Config(
            "the onnx embedding backend requires the `onnx` feature".to_string(),
        )),
        EmbeddingBackend::Ollama => Ok(Arc::new(OllamaEmbedder::new(embeddings)?)),
    }
}
