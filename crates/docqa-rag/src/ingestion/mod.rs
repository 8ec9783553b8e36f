//! Document ingestion: corpus loading, per-format parsing and chunking

mod chunker;
mod loader;
mod parser;

pub use chunker::{Span, TextChunker};
pub use loader::DocumentLoader;
pub use parser::{
    DocumentParser, DocxParser, FileInfo, HtmlParser, MarkdownParser, ParserRegistry, PdfParser,
    TextParser,
};
