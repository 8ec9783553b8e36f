//! In-memory vector index with exact cosine search

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::config::RetrievalConfig;
use crate::embeddings::{check_vectors, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::types::{Chunk, ScoredChunk};

/// A chunk and its embedding. Ids follow insertion order from 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: u64,
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// Search parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
    /// Maximum number of results
    pub top_k: usize,
    /// Minimum cosine similarity (inclusive)
    pub similarity_threshold: f32,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            top_k: 4,
            similarity_threshold: 0.5,
        }
    }
}

impl From<RetrievalConfig> for SearchParams {
    fn from(config: RetrievalConfig) -> Self {
        Self {
            top_k: config.top_k,
            similarity_threshold: config.similarity_threshold,
        }
    }
}

/// Summary of an index for status endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    pub snapshot_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub embedding_model: String,
    pub dimensions: usize,
    pub entries: usize,
    pub files: usize,
}

/// Immutable collection of embedded chunks
#[derive(Debug, Clone)]
pub struct VectorIndex {
    pub(crate) snapshot_id: Uuid,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) model_id: String,
    pub(crate) dimensions: usize,
    pub(crate) entries: Vec<IndexEntry>,
}

impl VectorIndex {
    /// Embed chunk texts in batches and build the index
    pub async fn build(
        chunks: Vec<Chunk>,
        embedder: &dyn EmbeddingProvider,
        batch_size: usize,
    ) -> Result<Self> {
        let batch_size = batch_size.max(1);
        let total_batches = chunks.len().div_ceil(batch_size);
        tracing::info!(
            "Embedding {} chunks with {} ({} batches)",
            chunks.len(),
            embedder.model_id(),
            total_batches
        );

        let mut vectors = Vec::with_capacity(chunks.len());
        for (i, batch) in chunks.chunks(batch_size).enumerate() {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let batch_vectors = embedder.embed_batch(&texts).await?;
            check_vectors(
                embedder.name(),
                texts.len(),
                embedder.dimensions(),
                &batch_vectors,
            )?;
            vectors.extend(batch_vectors);
            tracing::debug!("Embedded batch {}/{}", i + 1, total_batches);
        }

        Self::from_parts(embedder.model_id(), embedder.dimensions(), chunks, vectors)
    }

    /// Build from precomputed vectors, one per chunk
    pub fn from_parts(
        model_id: impl Into<String>,
        dimensions: usize,
        chunks: Vec<Chunk>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<Self> {
        if dimensions == 0 {
            return Err(Error::embedding("embedding dimensions must be greater than 0"));
        }
        check_vectors("index", chunks.len(), dimensions, &vectors)?;

        let entries = chunks
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(i, (chunk, vector))| IndexEntry {
                id: i as u64,
                chunk,
                vector,
            })
            .collect();

        Ok(Self {
            snapshot_id: Uuid::new_v4(),
            created_at: Utc::now(),
            model_id: model_id.into(),
            dimensions,
            entries,
        })
    }

    /// Exact cosine search.
    ///
    /// Keeps scores `>= similarity_threshold`, orders by descending score with
    /// ties in insertion order, and returns at most `top_k` results.
    pub fn search(&self, query: &[f32], params: &SearchParams) -> Result<Vec<ScoredChunk>> {
        if query.len() != self.dimensions {
            return Err(Error::embedding(format!(
                "query vector has {} dimensions, index has {}",
                query.len(),
                self.dimensions
            )));
        }

        let scores = self
            .entries
            .iter()
            .map(|entry| cosine_similarity(query, &entry.vector));

        Ok(select_top_k(scores, params)
            .into_iter()
            .map(|(idx, similarity)| {
                let entry = &self.entries[idx];
                ScoredChunk {
                    id: entry.id,
                    chunk: entry.chunk.clone(),
                    similarity,
                }
            })
            .collect())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn snapshot_id(&self) -> Uuid {
        self.snapshot_id
    }

    pub fn stats(&self) -> IndexStats {
        let files: HashSet<&str> = self
            .entries
            .iter()
            .map(|e| e.chunk.metadata.file_path.as_str())
            .collect();
        IndexStats {
            snapshot_id: self.snapshot_id,
            created_at: self.created_at,
            embedding_model: self.model_id.clone(),
            dimensions: self.dimensions,
            entries: self.entries.len(),
            files: files.len(),
        }
    }
}

/// Indices and scores passing the threshold, best first, stable on ties
pub(crate) fn select_top_k(
    scores: impl IntoIterator<Item = f32>,
    params: &SearchParams,
) -> Vec<(usize, f32)> {
    let mut hits: Vec<(usize, f32)> = scores
        .into_iter()
        .enumerate()
        .filter(|(_, score)| *score >= params.similarity_threshold)
        .collect();
    hits.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(params.top_k);
    hits
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
pub(crate) fn sample_index(vectors: Vec<Vec<f32>>) -> VectorIndex {
    use crate::types::document::sample_metadata;

    let dims = vectors.first().map(Vec::len).unwrap_or(1);
    let chunks = (0..vectors.len())
        .map(|i| Chunk {
            text: format!("chunk {}", i),
            metadata: sample_metadata(&format!("doc{}.txt", i)),
            chunk_index: 0,
            char_start: 0,
            char_end: 7,
        })
        .collect();
    VectorIndex::from_parts("test-model", dims, chunks, vectors).unwrap()
}
