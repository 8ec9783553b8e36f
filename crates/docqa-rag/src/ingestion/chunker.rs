//! Text chunking with overlap and boundary preference

use unicode_segmentation::UnicodeSegmentation;

use crate::error::{Error, Result};
use crate::types::{Chunk, Document};

/// Character span `[start, end)` of a chunk within its document text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Text chunker with configurable size and overlap.
///
/// Sizes are measured in chars. A chunk that is not the last one is filled
/// past `max(overlap, max_size / 2)` chars, then ends at the latest paragraph
/// break that fits, else the latest line break, sentence end or word
/// boundary, else a hard cut. The next chunk starts on a word boundary at
/// least `overlap` chars before the previous end.
#[derive(Debug, Clone, Copy)]
pub struct TextChunker {
    /// Maximum chunk size in characters
    max_size: usize,
    /// Minimum overlap between consecutive chunks
    overlap: usize,
}

impl TextChunker {
    /// Create a new chunker
    pub fn new(max_size: usize, overlap: usize) -> Result<Self> {
        if max_size == 0 {
            return Err(Error::Config("chunk size must be greater than 0".to_string()));
        }
        if overlap >= max_size {
            return Err(Error::Config(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                overlap, max_size
            )));
        }
        Ok(Self { max_size, overlap })
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Chunk every document, preserving document order
    pub fn chunk_documents(&self, documents: &[Document]) -> Vec<Chunk> {
        let chunks: Vec<Chunk> = documents
            .iter()
            .flat_map(|doc| self.chunk_document(doc))
            .collect();
        tracing::info!(
            "Split {} documents into {} chunks (size {}, overlap {})",
            documents.len(),
            chunks.len(),
            self.max_size,
            self.overlap
        );
        chunks
    }

    /// Chunk a single document. Whitespace-only chunks are omitted.
    pub fn chunk_document(&self, doc: &Document) -> Vec<Chunk> {
        let chars: Vec<char> = doc.text.chars().collect();
        self.split_spans(&doc.text)
            .into_iter()
            .map(|span| (chars[span.start..span.end].iter().collect::<String>(), span))
            .filter(|(text, _)| !text.trim().is_empty())
            .enumerate()
            .map(|(i, (text, span))| Chunk {
                text,
                metadata: doc.metadata.clone(),
                chunk_index: i as u32,
                char_start: span.start,
                char_end: span.end,
            })
            .collect()
    }

    /// Length a non-final chunk must exceed before a break is taken
    fn min_fill(&self) -> usize {
        self.overlap.max(self.max_size / 2)
    }

    /// Compute the chunk spans of `text`, in order
    pub fn split_spans(&self, text: &str) -> Vec<Span> {
        let boundaries = Boundaries::new(text);
        let len = boundaries.len;
        let mut spans = Vec::new();
        if len == 0 {
            return spans;
        }

        let mut start = 0;
        loop {
            if start + self.max_size >= len {
                spans.push(Span { start, end: len });
                break;
            }

            let lo = start + self.min_fill();
            let hi = start + self.max_size;
            let end = boundaries.best_end(lo, hi).unwrap_or(hi);
            spans.push(Span { start, end });

            let floor = end - self.overlap;
            start = latest_in(&boundaries.word, start, floor).unwrap_or(floor);
        }

        spans
    }
}

/// Candidate break positions (char indices), one sorted list per level
struct Boundaries {
    len: usize,
    paragraph: Vec<usize>,
    line: Vec<usize>,
    sentence: Vec<usize>,
    word: Vec<usize>,
}

impl Boundaries {
    fn new(text: &str) -> Self {
        let byte_offsets: Vec<usize> = text.char_indices().map(|(b, _)| b).collect();
        let len = byte_offsets.len();
        let to_char = |byte: usize| byte_offsets.partition_point(|&b| b < byte);

        let paragraph = text
            .match_indices("\n\n")
            .map(|(b, m)| to_char(b + m.len()))
            .collect();
        let line = text
            .match_indices('\n')
            .map(|(b, _)| to_char(b + 1))
            .collect();
        let sentence = text
            .split_sentence_bound_indices()
            .map(|(b, _)| to_char(b))
            .filter(|&c| c > 0)
            .collect();
        let word = text
            .split_word_bound_indices()
            .map(|(b, _)| to_char(b))
            .filter(|&c| c > 0)
            .collect();

        Self {
            len,
            paragraph,
            line,
            sentence,
            word,
        }
    }

    /// Largest boundary in `(lo, hi]` from the highest-priority level that has one
    fn best_end(&self, lo: usize, hi: usize) -> Option<usize> {
        [&self.paragraph, &self.line, &self.sentence, &self.word]
            .into_iter()
            .find_map(|level| latest_in(level, lo, hi))
    }
}

/// Largest value of a sorted list in `(lo, hi]`
fn latest_in(sorted: &[usize], lo: usize, hi: usize) -> Option<usize> {
    let idx = sorted.partition_point(|&p| p <= hi);
    (idx > 0 && sorted[idx - 1] > lo).then(|| sorted[idx - 1])
}
