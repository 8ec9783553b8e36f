//! Retrieval and answer types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::document::Chunk;

/// A chunk paired with its similarity to the query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    /// Entry id in the index (insertion order)
    pub id: u64,
    pub chunk: Chunk,
    /// Cosine similarity in [-1, 1]
    pub similarity: f32,
}

/// Citation view of a retrieved chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    /// Exact chunk text
    pub text: String,
    /// Source filename
    pub filename: String,
    /// Page number (paginated formats only)
    pub page: Option<u32>,
    /// Absolute path of the source file
    pub file_path: String,
    /// Similarity score
    pub similarity: f32,
}

impl Source {
    /// Create a source from a scored chunk
    pub fn from_scored(scored: &ScoredChunk) -> Self {
        let meta = &scored.chunk.metadata;
        Self {
            text: scored.chunk.text.clone(),
            filename: meta.filename.clone(),
            page: meta.page,
            file_path: meta.file_path.clone(),
            similarity: scored.similarity,
        }
    }

    /// Format citation for display in text
    pub fn format_inline(&self) -> String {
        match self.page {
            Some(page) => format!("[Source: {}, Page {}]", self.filename, page),
            None => format!("[Source: {}]", self.filename),
        }
    }

    /// Label used when listing sources under an answer
    pub fn label(&self, position: usize) -> String {
        match self.page {
            Some(page) => format!("Source {}: {} (Page {})", position, self.filename, page),
            None => format!("Source {}: {}", position, self.filename),
        }
    }
}

/// Response to a single question
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskResponse {
    /// Generated answer
    pub answer: String,
    /// Standalone question used for retrieval
    pub generated_question: String,
    /// Sources in retrieval order
    pub sources: Vec<Source>,
    /// Processing time in milliseconds
    pub processing_time_ms: u64,
    /// Interaction ID
    pub interaction_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::document::sample_metadata;

    fn scored(filename: &str, page: Option<u32>) -> ScoredChunk {
        let mut metadata = sample_metadata(filename);
        metadata.page = page;
        ScoredChunk {
            id: 0,
            chunk: Chunk {
                text: "The device requires 5 volts.".into(),
                metadata,
                chunk_index: 0,
                char_start: 0,
                char_end: 28,
            },
            similarity: 0.82,
        }
    }

    #[test]
    fn test_source_labels() {
        let with_page = Source::from_scored(&scored("manual.pdf", Some(2)));
        assert_eq!(with_page.label(1), "Source 1: manual.pdf (Page 2)");
        assert_eq!(with_page.format_inline(), "[Source: manual.pdf, Page 2]");

        let without = Source::from_scored(&scored("notes.txt", None));
        assert_eq!(without.label(3), "Source 3: notes.txt");
        assert_eq!(without.format_inline(), "[Source: notes.txt]");
    }
}
