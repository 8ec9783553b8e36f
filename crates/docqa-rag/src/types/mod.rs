//! Core types for the document Q&A pipeline

pub mod conversation;
pub mod document;
pub mod response;

pub use conversation::{ChatMessage, Conversation, ConversationTurn, Role};
pub use document::{Chunk, Document, DocumentMetadata, FileType};
pub use response::{AskResponse, ScoredChunk, Source};
