//! Query-time retrieval: embed the query and search the active index

use std::sync::Arc;
use std::time::Instant;

use crate::embeddings::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::index::{ActiveIndex, SearchParams, VectorIndex};
use crate::types::ScoredChunk;

/// Embeds queries and searches an index snapshot
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { embedder }
    }

    /// Search a specific index snapshot
    pub async fn retrieve(
        &self,
        index: &VectorIndex,
        query: &str,
        params: &SearchParams,
    ) -> Result<Vec<ScoredChunk>> {
        let start = Instant::now();
        let vector = self.embedder.embed(query).await?;
        let embed_ms = start.elapsed().as_millis();

        let results = index.search(&vector, params)?;
        tracing::info!(
            "Retrieved {} chunks (top_k {}, threshold {}) in {}ms (embedding {}ms)",
            results.len(),
            params.top_k,
            params.similarity_threshold,
            start.elapsed().as_millis(),
            embed_ms
        );
        Ok(results)
    }

    /// Search whatever index is active. The snapshot is held only for this
    /// call, so a concurrent swap does not affect it.
    pub async fn retrieve_active(
        &self,
        active: &ActiveIndex,
        query: &str,
        params: &SearchParams,
    ) -> Result<Vec<ScoredChunk>> {
        let index = active
            .snapshot()
            .ok_or_else(|| Error::internal("no index is loaded; build or load one first"))?;
        self.retrieve(&index, query, params).await
    }
}
