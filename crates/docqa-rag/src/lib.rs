//! docqa-rag: conversational question answering over a local document corpus
//!
//! Documents (PDF, text, markdown, HTML, DOCX) are parsed, chunked, embedded
//! and persisted as an index snapshot. Questions are reformulated against the
//! conversation history, matched against the index, and answered by an LLM
//! that is instructed to cite its sources.

pub mod config;
pub mod embeddings;
pub mod error;
pub mod generation;
pub mod index;
pub mod ingestion;
pub mod pipeline;
pub mod retrieval;
pub mod server;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::RagConfig;
pub use error::{Error, Result};
pub use generation::{AnswerStream, ComposedAnswer, GenerationRequest, LlmProvider};
pub use embeddings::EmbeddingProvider;
pub use index::{ActiveIndex, SearchParams, VectorIndex};
pub use pipeline::RagPipeline;
pub use types::{
    AskResponse, Chunk, Conversation, ConversationTurn, Document, DocumentMetadata, FileType,
    Source,
};
