//! Citation extraction and source presentation

use regex::Regex;
use std::sync::OnceLock;

use crate::types::Source;

/// A `[Source: filename, Page X]` marker found in an answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CitationRef {
    pub filename: String,
    pub page: Option<u32>,
}

impl CitationRef {
    fn matches(&self, source: &Source) -> bool {
        let filename_matches = source.filename.eq_ignore_ascii_case(&self.filename);
        filename_matches && (self.page.is_none() || self.page == source.page)
    }
}

fn citation_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\[Source:\s*([^,\]]+?)\s*(?:,\s*Page\s*(\d+)\s*)?\]").expect("Invalid regex")
    })
}

/// Citation markers in order of first appearance, without repeats
pub fn extract_citations(answer: &str) -> Vec<CitationRef> {
    let mut citations: Vec<CitationRef> = Vec::new();
    for cap in citation_pattern().captures_iter(answer) {
        let citation = CitationRef {
            filename: cap[1].trim().to_string(),
            page: cap.get(2).and_then(|m| m.as_str().parse().ok()),
        };
        if !citations.contains(&citation) {
            citations.push(citation);
        }
    }
    citations
}

/// The retrieved sources an answer actually cites, in retrieval order
pub fn cited_sources(answer: &str, sources: &[Source]) -> Vec<Source> {
    let citations = extract_citations(answer);
    let cited: Vec<Source> = sources
        .iter()
        .filter(|source| citations.iter().any(|c| c.matches(source)))
        .cloned()
        .collect();
    dedupe_sources(&cited)
}

/// Collapse sources sharing filename and page, keeping the first occurrence
pub fn dedupe_sources(sources: &[Source]) -> Vec<Source> {
    let mut unique: Vec<Source> = Vec::with_capacity(sources.len());
    for source in sources {
        let seen = unique
            .iter()
            .any(|s| s.filename == source.filename && s.page == source.page);
        if !seen {
            unique.push(source.clone());
        }
    }
    unique
}
