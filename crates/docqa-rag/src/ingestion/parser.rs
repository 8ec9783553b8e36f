//! Per-format document parsers and the extension registry

use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, OnceLock};
use std::thread;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::{Document, DocumentMetadata, FileType};

/// Filesystem facts about a file about to be parsed
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// File name (used in citations)
    pub filename: String,
    /// Absolute path
    pub path: PathBuf,
    /// Type resolved from the extension
    pub file_type: FileType,
    /// Creation time (not reported by every filesystem)
    pub created_at: Option<DateTime<Utc>>,
    /// Last modification time
    pub modified_at: Option<DateTime<Utc>>,
}

impl FileInfo {
    /// Read file metadata from the filesystem
    pub fn from_path(path: &Path, file_type: FileType) -> Result<Self> {
        let path = std::fs::canonicalize(path)?;
        let meta = std::fs::metadata(&path)?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            filename,
            file_type,
            created_at: meta.created().ok().map(DateTime::<Utc>::from),
            modified_at: meta.modified().ok().map(DateTime::<Utc>::from),
            path,
        })
    }

    /// Base metadata for documents produced from this file
    pub fn metadata(&self) -> DocumentMetadata {
        DocumentMetadata {
            filename: self.filename.clone(),
            file_path: self.path.to_string_lossy().into_owned(),
            file_type: self.file_type,
            created_at: self.created_at,
            modified_at: self.modified_at,
            page: None,
            total_pages: None,
        }
    }

    /// A single unpaginated document holding `text`
    fn single_document(&self, text: String) -> Vec<Document> {
        vec![Document::new(text, self.metadata())]
    }
}

/// Capability to turn one file into documents
pub trait DocumentParser: Send + Sync {
    /// File type this parser produces
    fn file_type(&self) -> FileType;

    /// Parse the file at `path`
    fn load(&self, path: &Path, file: &FileInfo) -> Result<Vec<Document>>;
}

/// Maps lowercase extensions to parsers
#[derive(Clone, Default)]
pub struct ParserRegistry {
    parsers: HashMap<String, Arc<dyn DocumentParser>>,
}

impl ParserRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with PDF, text, markdown, HTML and DOCX parsers
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PdfParser::default()));
        registry.register(Arc::new(TextParser));
        registry.register(Arc::new(MarkdownParser));
        registry.register(Arc::new(HtmlParser));
        registry.register(Arc::new(DocxParser));
        registry
    }

    /// Register a parser under every extension of its file type
    pub fn register(&mut self, parser: Arc<dyn DocumentParser>) {
        for ext in parser.file_type().extensions() {
            self.parsers.insert((*ext).to_string(), parser.clone());
        }
    }

    /// Register a parser under a specific extension, replacing any existing one
    pub fn register_extension(&mut self, extension: &str, parser: Arc<dyn DocumentParser>) {
        self.parsers.insert(extension.to_lowercase(), parser);
    }

    /// Parser for a path, by extension (case-insensitive)
    pub fn parser_for(&self, path: &Path) -> Option<Arc<dyn DocumentParser>> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        self.parsers.get(&ext).cloned()
    }

    /// Registered extensions, sorted
    pub fn extensions(&self) -> Vec<&str> {
        let mut exts: Vec<&str> = self.parsers.keys().map(String::as_str).collect();
        exts.sort_unstable();
        exts
    }
}

impl std::fmt::Debug for ParserRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParserRegistry")
            .field("extensions", &self.extensions())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// PDF
// ---------------------------------------------------------------------------

/// PDF parser: one document per non-empty page
#[derive(Debug, Clone)]
pub struct PdfParser {
    timeout: Duration,
}

impl Default for PdfParser {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
        }
    }
}

impl PdfParser {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Extract page texts on a helper thread so problematic fonts cannot hang ingestion
    fn extract_with_timeout(&self, data: Vec<u8>, filename: &str) -> Result<PdfText> {
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            let _ = tx.send(extract_pdf_pages(&data));
        });

        match rx.recv_timeout(self.timeout) {
            Ok(result) => {
                let _ = handle.join();
                result.map_err(|message| Error::file_parse(filename, message))
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                tracing::error!(
                    "PDF extraction timeout after {}s for {}",
                    self.timeout.as_secs(),
                    filename
                );
                Err(Error::file_parse(filename, "PDF extraction timed out"))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                tracing::error!("PDF extraction thread crashed for {}", filename);
                Err(Error::file_parse(filename, "PDF extraction thread crashed"))
            }
        }
    }
}

impl DocumentParser for PdfParser {
    fn file_type(&self) -> FileType {
        FileType::Pdf
    }

    fn load(&self, path: &Path, file: &FileInfo) -> Result<Vec<Document>> {
        let data = std::fs::read(path)?;
        let extracted = self.extract_with_timeout(data, &file.filename)?;
        let base = file.metadata();

        let documents = extracted
            .pages
            .into_iter()
            .map(|(page, text)| {
                Document::new(text, base.with_page(page, extracted.total_pages))
            })
            .collect();
        Ok(documents)
    }
}

struct PdfText {
    total_pages: u32,
    pages: Vec<(u32, String)>,
}

fn extract_pdf_pages(data: &[u8]) -> std::result::Result<PdfText, String> {
    let per_page = match lopdf::Document::load_mem(data) {
        Ok(doc) => {
            let numbers: Vec<u32> = doc.get_pages().keys().copied().collect();
            let total_pages = numbers.len() as u32;
            let pages: Vec<(u32, String)> = numbers
                .into_iter()
                .filter_map(|n| match doc.extract_text(&[n]) {
                    Ok(text) => Some((n, clean_pdf_text(&text))),
                    Err(e) => {
                        tracing::debug!("Could not extract text from page {}: {}", n, e);
                        None
                    }
                })
                .filter(|(_, text)| !text.is_empty())
                .collect();
            Some((total_pages, pages))
        }
        Err(e) => {
            tracing::debug!("lopdf could not load document: {}", e);
            None
        }
    };

    if let Some((total_pages, pages)) = &per_page {
        if !pages.is_empty() {
            return Ok(PdfText {
                total_pages: *total_pages,
                pages: pages.clone(),
            });
        }
    }

    tracing::debug!("Per-page extraction produced no text, trying pdf-extract");
    let text = pdf_extract::extract_text_from_mem(data).map_err(|e| e.to_string())?;
    let text = clean_pdf_text(&text);
    if text.is_empty() {
        return Err("PDF appears to be image-based or has no extractable text".to_string());
    }

    let total_pages = per_page.map(|(n, _)| n).unwrap_or(1).max(1);
    Ok(PdfText {
        total_pages,
        pages: vec![(1, text)],
    })
}

fn glyph_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"[(<]?\buni([0-9A-F]{4})\b[)>]?").expect("glyph name pattern is valid")
    })
}

/// Typographic characters folded to ASCII after glyph decoding
const ASCII_FOLDS: &[(char, &str)] = &[
    ('\u{2010}', "-"),
    ('\u{2011}', "-"),
    ('\u{2013}', "-"),
    ('\u{2014}', "--"),
    ('\u{2018}', "'"),
    ('\u{2019}', "'"),
    ('\u{201C}', "\""),
    ('\u{201D}', "\""),
    ('\u{2022}', "* "),
    ('\u{2026}', "..."),
    ('\u{00A0}', " "),
    ('\u{FB00}', "ff"),
    ('\u{FB01}', "fi"),
    ('\u{FB02}', "fl"),
    ('\u{FB03}', "ffi"),
    ('\u{FB04}', "ffl"),
];

/// Replace leaked glyph names (`uni2019`), fold ligatures, drop NULs, trim
/// lines and collapse each run of blank lines into one paragraph break
pub(crate) fn clean_pdf_text(text: &str) -> String {
    let decoded = glyph_name_pattern().replace_all(text, |caps: &regex::Captures| {
        u32::from_str_radix(&caps[1], 16)
            .ok()
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_else(|| caps[0].to_string())
    });

    let mut folded = String::with_capacity(decoded.len());
    for c in decoded.chars() {
        match ASCII_FOLDS.iter().find(|(from, _)| *from == c) {
            Some((_, to)) => folded.push_str(to),
            None if c == '\0' => {}
            None => folded.push(c),
        }
    }

    let mut cleaned = String::with_capacity(folded.len());
    let mut after_blank = false;
    for line in folded.lines().map(str::trim) {
        if line.is_empty() {
            after_blank = true;
            continue;
        }
        if !cleaned.is_empty() {
            cleaned.push_str(if after_blank { "\n\n" } else { "\n" });
        }
        cleaned.push_str(line);
        after_blank = false;
    }
    cleaned
}

// ---------------------------------------------------------------------------
// Text and markdown
// ---------------------------------------------------------------------------

/// Plain text parser (lossy UTF-8)
#[derive(Debug, Clone, Copy, Default)]
pub struct TextParser;

impl DocumentParser for TextParser {
    fn file_type(&self) -> FileType {
        FileType::Txt
    }

    fn load(&self, path: &Path, file: &FileInfo) -> Result<Vec<Document>> {
        let data = std::fs::read(path)?;
        Ok(file.single_document(String::from_utf8_lossy(&data).into_owned()))
    }
}

/// Markdown parser rendering to plain text
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownParser;

impl DocumentParser for MarkdownParser {
    fn file_type(&self) -> FileType {
        FileType::Markdown
    }

    fn load(&self, path: &Path, file: &FileInfo) -> Result<Vec<Document>> {
        let data = std::fs::read(path)?;
        let source = String::from_utf8_lossy(&data);
        Ok(file.single_document(markdown_to_text(&source)))
    }
}

fn ensure_newline(out: &mut String) {
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
}

fn ensure_blank_line(out: &mut String) {
    ensure_newline(out);
    if !out.is_empty() && !out.ends_with("\n\n") {
        out.push('\n');
    }
}

/// Render markdown to plain text.
///
/// Blocks are separated by blank lines, list items sit on their own line and
/// code blocks keep their content verbatim.
pub(crate) fn markdown_to_text(source: &str) -> String {
    use pulldown_cmark::{Event, Parser, Tag, TagEnd};

    let mut out = String::new();
    for event in Parser::new(source) {
        match event {
            Event::Text(text) | Event::Code(text) => out.push_str(&text),
            Event::SoftBreak | Event::HardBreak => out.push('\n'),
            Event::Start(Tag::Item) => {
                ensure_newline(&mut out);
                out.push_str("- ");
            }
            Event::Start(Tag::CodeBlock(_)) => ensure_blank_line(&mut out),
            Event::End(TagEnd::Item) => ensure_newline(&mut out),
            Event::End(
                TagEnd::Paragraph | TagEnd::Heading(_) | TagEnd::CodeBlock | TagEnd::List(_),
            )
            | Event::Rule => ensure_blank_line(&mut out),
            _ => {}
        }
    }

    out.trim().to_string()
}

// ---------------------------------------------------------------------------
// HTML
// ---------------------------------------------------------------------------

/// HTML parser: title and body text, scripts and styles excluded
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlParser;

impl DocumentParser for HtmlParser {
    fn file_type(&self) -> FileType {
        FileType::Html
    }

    fn load(&self, path: &Path, file: &FileInfo) -> Result<Vec<Document>> {
        let data = std::fs::read(path)?;
        let text = html_to_text(&String::from_utf8_lossy(&data))
            .map_err(|message| Error::file_parse(&file.filename, message))?;
        Ok(file.single_document(text))
    }
}

const EXCLUDED_TAGS: &[&str] = &["script", "style", "noscript", "template"];

const BLOCK_TAGS: &[&str] = &[
    "p", "div", "li", "h1", "h2", "h3", "h4", "h5", "h6", "pre", "blockquote", "td", "th",
    "tr", "dt", "dd", "section", "article", "header", "footer", "main", "nav", "aside",
    "table", "ul", "ol", "body",
];

pub(crate) fn html_to_text(html: &str) -> std::result::Result<String, String> {
    use scraper::{Html, Selector};

    let document = Html::parse_document(html);
    let title_selector = Selector::parse("title").map_err(|e| e.to_string())?;
    let body_selector = Selector::parse("body").map_err(|e| e.to_string())?;

    let mut lines: Vec<String> = Vec::new();

    if let Some(title) = document.select(&title_selector).next() {
        let title = title.text().collect::<String>();
        let title = title.trim();
        if !title.is_empty() {
            lines.push(title.to_string());
        }
    }

    let Some(body) = document.select(&body_selector).next() else {
        return Ok(lines.join("\n"));
    };

    let mut current_block = None;
    for node in body.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let excluded = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| EXCLUDED_TAGS.contains(&e.name()))
        });
        if excluded {
            continue;
        }
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }

        let block = node
            .ancestors()
            .find(|a| {
                a.value()
                    .as_element()
                    .is_some_and(|e| BLOCK_TAGS.contains(&e.name()))
            })
            .map(|a| a.id());

        match lines.last_mut() {
            Some(line) if block.is_some() && block == current_block => {
                line.push(' ');
                line.push_str(trimmed);
            }
            _ => lines.push(trimmed.to_string()),
        }
        current_block = block;
    }

    Ok(lines.join("\n"))
}

// ---------------------------------------------------------------------------
// DOCX
// ---------------------------------------------------------------------------

/// Word document parser: paragraphs and table cell text
#[derive(Debug, Clone, Copy, Default)]
pub struct DocxParser;

impl DocumentParser for DocxParser {
    fn file_type(&self) -> FileType {
        FileType::Docx
    }

    fn load(&self, path: &Path, file: &FileInfo) -> Result<Vec<Document>> {
        let data = std::fs::read(path)?;
        let doc = docx_rs::read_docx(&data)
            .map_err(|e| Error::file_parse(&file.filename, e.to_string()))?;

        let mut lines = Vec::new();
        for child in doc.document.children {
            match child {
                docx_rs::DocumentChild::Paragraph(p) => lines.push(paragraph_text(&p)),
                docx_rs::DocumentChild::Table(table) => lines.extend(table_lines(&table)),
                _ => {}
            }
        }

        Ok(file.single_document(lines.join("\n").trim().to_string()))
    }
}

fn paragraph_text(paragraph: &docx_rs::Paragraph) -> String {
    let mut text = String::new();
    for child in &paragraph.children {
        if let docx_rs::ParagraphChild::Run(run) = child {
            for run_child in &run.children {
                match run_child {
                    docx_rs::RunChild::Text(t) => text.push_str(&t.text),
                    docx_rs::RunChild::Tab(_) => text.push('\t'),
                    docx_rs::RunChild::Break(_) => text.push('\n'),
                    _ => {}
                }
            }
        }
    }
    text
}

/// One line per table row, cells separated by ` | `
#[allow(irrefutable_let_patterns)]
fn table_lines(table: &docx_rs::Table) -> Vec<String> {
    let mut lines = Vec::new();
    for row in &table.rows {
        let docx_rs::TableChild::TableRow(row) = row else {
            continue;
        };
        let cells: Vec<String> = row
            .cells
            .iter()
            .map(|cell| {
                let docx_rs::TableRowChild::TableCell(cell) = cell else {
                    return String::new();
                };
                cell.children
                    .iter()
                    .filter_map(|content| match content {
                        docx_rs::TableCellContent::Paragraph(p) => Some(paragraph_text(p)),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join(" ")
                    .trim()
                    .to_string()
            })
            .collect();
        if cells.iter().any(|c| !c.is_empty()) {
            lines.push(cells.join(" | "));
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_resolves_extensions_case_insensitively() {
        let registry = ParserRegistry::with_defaults();
        let pdf = registry.parser_for(Path::new("/docs/Manual.PDF")).unwrap();
        assert_eq!(pdf.file_type(), FileType::Pdf);
        assert_eq!(
            registry
                .parser_for(Path::new("page.htm"))
                .unwrap()
                .file_type(),
            FileType::Html
        );
        assert!(registry.parser_for(Path::new("sheet.xlsx")).is_none());
        assert!(registry.parser_for(Path::new("README")).is_none());
    }

    #[test]
    fn test_register_extension_adds_format() {
        let mut registry = ParserRegistry::new();
        assert!(registry.parser_for(Path::new("notes.rst")).is_none());
        registry.register_extension("RST", Arc::new(TextParser));
        assert_eq!(
            registry
                .parser_for(Path::new("notes.rst"))
                .unwrap()
                .file_type(),
            FileType::Txt
        );
    }

    #[test]
    fn test_clean_pdf_text() {
        let raw = "The \u{FB01}rst step\u{0}\n\n   \nit(uni2019)s \u{201C}done\u{201D}  \n";
        assert_eq!(clean_pdf_text(raw), "The first step\n\nit's \"done\"");
    }

    #[test]
    fn test_clean_pdf_text_keeps_paragraph_breaks() {
        let raw = "\n\nPower\nUse 5 volts.\n\n\n \n\nStorage\nKeep it dry.\n\n";
        let cleaned = clean_pdf_text(raw);
        assert_eq!(cleaned, "Power\nUse 5 volts.\n\nStorage\nKeep it dry.");

        let chunker = crate::ingestion::TextChunker::new(30, 5).unwrap();
        let spans = chunker.split_spans(&cleaned);
        let first: String = cleaned.chars().take(spans[0].end).collect();
        assert_eq!(first, "Power\nUse 5 volts.\n\n");
    }

    #[test]
    fn test_markdown_to_text() {
        let md = "# Setup\n\nInstall the *device* first.\n\n- plug in\n- power on\n\n```\nvoltage = 5\n```\n";
        let text = markdown_to_text(md);
        assert_eq!(
            text,
            "Setup\n\nInstall the device first.\n\n- plug in\n- power on\n\nvoltage = 5"
        );
    }

    #[test]
    fn test_html_to_text_skips_scripts_and_styles() {
        let html = r#"<html><head><title>Guide</title><style>p { color: red }</style></head>
            <body><h1>Power</h1><p>Use <b>5 volts</b> only.</p>
            <script>var x = "hidden";</script><ul><li>One</li><li>Two</li></ul></body></html>"#;
        let text = html_to_text(html).unwrap();
        assert_eq!(text, "Guide\nPower\nUse 5 volts only.\nOne\nTwo");
        assert!(!text.contains("hidden"));
        assert!(!text.contains("color"));
    }
}
