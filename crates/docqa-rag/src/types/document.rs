//! Document and chunk types with source tracking for citations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Supported file types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    /// PDF document
    Pdf,
    /// Plain text file
    Txt,
    /// Markdown file
    Markdown,
    /// HTML document
    Html,
    /// Microsoft Word document (.docx)
    Docx,
}

impl FileType {
    /// Detect file type from extension (case-insensitive)
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "txt" | "text" => Some(Self::Txt),
            "md" | "markdown" => Some(Self::Markdown),
            "html" | "htm" => Some(Self::Html),
            "docx" => Some(Self::Docx),
            _ => None,
        }
    }

    /// Extensions recognised for this type
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Self::Pdf => &["pdf"],
            Self::Txt => &["txt", "text"],
            Self::Markdown => &["md", "markdown"],
            Self::Html => &["html", "htm"],
            Self::Docx => &["docx"],
        }
    }

    /// Whether documents of this type carry page numbers
    pub fn is_paginated(&self) -> bool {
        matches!(self, Self::Pdf)
    }

    /// Get display name
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Pdf => "PDF",
            Self::Txt => "Text File",
            Self::Markdown => "Markdown",
            Self::Html => "HTML",
            Self::Docx => "Word Document (.docx)",
        }
    }
}

/// Metadata attached to every document and copied onto its chunks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// File name (used in citations)
    pub filename: String,
    /// Absolute path of the source file
    pub file_path: String,
    /// File type
    pub file_type: FileType,
    /// Creation time, when the filesystem reports it
    pub created_at: Option<DateTime<Utc>>,
    /// Last modification time
    pub modified_at: Option<DateTime<Utc>>,
    /// Page number (1-indexed, paginated formats only)
    pub page: Option<u32>,
    /// Total pages in the source file (paginated formats only)
    pub total_pages: Option<u32>,
}

impl DocumentMetadata {
    /// Copy of this metadata pinned to a page
    pub fn with_page(&self, page: u32, total_pages: u32) -> Self {
        Self {
            page: Some(page),
            total_pages: Some(total_pages),
            ..self.clone()
        }
    }

    /// Format source for display
    pub fn format_citation(&self) -> String {
        match self.page {
            Some(page) => format!("{}, Page {}", self.filename, page),
            None => self.filename.clone(),
        }
    }
}

/// Extracted text of one source unit (a file, or one page of a paginated file)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Extracted text content
    pub text: String,
    /// Source metadata
    pub metadata: DocumentMetadata,
    /// Content hash for deduplication
    pub content_hash: String,
}

impl Document {
    /// Create a new document
    pub fn new(text: String, metadata: DocumentMetadata) -> Self {
        let content_hash = hash_content(&text);
        Self {
            text,
            metadata,
            content_hash,
        }
    }
}

/// A chunk of text from a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Text content (exact substring of the document text)
    pub text: String,
    /// Metadata copied from the source document
    pub metadata: DocumentMetadata,
    /// Chunk index within the document
    pub chunk_index: u32,
    /// Character span in the document text
    pub char_start: usize,
    pub char_end: usize,
}

impl Chunk {
    /// Length in characters
    pub fn char_len(&self) -> usize {
        self.char_end - self.char_start
    }
}

/// Hash content for deduplication
pub fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
pub(crate) fn sample_metadata(filename: &str) -> DocumentMetadata {
    let file_type = filename
        .rsplit('.')
        .next()
        .and_then(FileType::from_extension)
        .unwrap_or(FileType::Txt);
    DocumentMetadata {
        filename: filename.to_string(),
        file_path: format!("/corpus/{}", filename),
        file_type,
        created_at: None,
        modified_at: None,
        page: None,
        total_pages: None,
    }
}
