//! Deterministic doubles and fixtures shared by unit tests

use async_trait::async_trait;
use axum::Router;
use futures::StreamExt;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::embeddings::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::generation::{FragmentStream, GenerationRequest, LlmProvider};
use crate::types::document::sample_metadata;
use crate::types::{Chunk, ScoredChunk};

const KEYWORD_DIMENSIONS: usize = 384;

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "it", "its", "of", "to", "in", "and", "or", "what", "does",
    "do", "how", "which", "for", "on", "with", "be", "this", "that", "need",
];

/// Bag-of-words embedder: each non-stopword is cut to its first four chars
/// and hashed into a bucket, so "voltage" and "volts" share a dimension.
/// Bare numbers carry no topic and are skipped.
pub(crate) struct KeywordEmbedder;

impl KeywordEmbedder {
    pub(crate) fn new() -> Self {
        Self
    }

    fn vector(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; KEYWORD_DIMENSIONS];
        let lowered = text.to_lowercase();
        for word in lowered.split(|c: char| !c.is_alphanumeric()) {
            if word.is_empty()
                || STOPWORDS.contains(&word)
                || word.chars().all(|c| c.is_ascii_digit())
            {
                continue;
            }
            let stem: String = word.chars().take(4).collect();
            let digest = Sha256::digest(stem.as_bytes());
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bytes) % KEYWORD_DIMENSIONS as u64) as usize;
            vector[bucket] += 1.0;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }

    fn dimensions(&self) -> usize {
        KEYWORD_DIMENSIONS
    }

    fn model_id(&self) -> &str {
        "keyword-test"
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn name(&self) -> &str {
        "keyword"
    }
}

/// One scripted model reply
pub(crate) enum Reply {
    Text(String),
    /// The request itself fails
    Failure(String),
    /// The stream opens, yields `fragments`, then fails
    StreamFailure { fragments: Vec<String>, error: String },
}

/// LLM double that replays scripted replies in order and records requests
pub(crate) struct ScriptedLlm {
    replies: Mutex<VecDeque<Reply>>,
    always_fail: Option<String>,
    requests: Mutex<Vec<GenerationRequest>>,
    open_streams: Arc<AtomicUsize>,
}

struct OpenStream(Arc<AtomicUsize>);

impl OpenStream {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for OpenStream {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedLlm {
    pub(crate) fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_replies(replies.into_iter().map(|r| Reply::Text(r.into())).collect())
    }

    pub(crate) fn with_replies(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            always_fail: None,
            requests: Mutex::new(Vec::new()),
            open_streams: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Every call fails with a retryable error
    pub(crate) fn failing(message: &str) -> Self {
        Self {
            always_fail: Some(message.to_string()),
            ..Self::with_replies(Vec::new())
        }
    }

    pub(crate) fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().clone()
    }

    /// Streams handed out and not yet dropped
    pub(crate) fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }

    fn next_reply(&self, request: &GenerationRequest) -> Reply {
        self.requests.lock().push(request.clone());
        if let Some(message) = &self.always_fail {
            return Reply::Failure(message.clone());
        }
        self.replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Reply::Failure("script exhausted".to_string()))
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        match self.next_reply(request) {
            Reply::Text(text) => Ok(text),
            Reply::Failure(error) | Reply::StreamFailure { error, .. } => Err(Error::llm(error)),
        }
    }

    async fn generate_stream(&self, request: &GenerationRequest) -> Result<FragmentStream> {
        let items: Vec<Result<String>> = match self.next_reply(request) {
            Reply::Text(text) => text.split_inclusive(' ').map(|f| Ok(f.to_string())).collect(),
            Reply::Failure(error) => return Err(Error::llm(error)),
            Reply::StreamFailure { fragments, error } => fragments
                .into_iter()
                .map(Ok)
                .chain(std::iter::once(Err(Error::llm(error))))
                .collect(),
        };

        let guard = OpenStream::new(self.open_streams.clone());
        Ok(futures::stream::iter(items)
            .map(move |item| {
                let _ = &guard;
                item
            })
            .boxed())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }
}

/// One chunk per text, all from `manual.pdf` with page `i + 1`
pub(crate) fn keyword_chunks(texts: &[&str]) -> Vec<Chunk> {
    let total = texts.len() as u32;
    texts
        .iter()
        .enumerate()
        .map(|(i, text)| Chunk {
            text: text.to_string(),
            metadata: sample_metadata("manual.pdf").with_page(i as u32 + 1, total),
            chunk_index: 0,
            char_start: 0,
            char_end: text.chars().count(),
        })
        .collect()
}

pub(crate) fn scored_chunk(
    filename: &str,
    page: Option<u32>,
    text: &str,
    similarity: f32,
) -> ScoredChunk {
    let mut metadata = sample_metadata(filename);
    metadata.page = page;
    ScoredChunk {
        id: page.map(u64::from).unwrap_or(0),
        chunk: Chunk {
            text: text.to_string(),
            metadata,
            chunk_index: 0,
            char_start: 0,
            char_end: text.chars().count(),
        },
        similarity,
    }
}

/// Serve `router` on an ephemeral local port, returning its base URL
pub(crate) async fn spawn_mock_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Write a PDF with one page per entry of `pages`
pub(crate) fn write_pdf(path: &Path, pages: &[&str]) {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
        });
        kids.push(page_id.into());
    }

    let pages_dict = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => pages.len() as i64,
        "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages_dict));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).unwrap();
}

/// Write a DOCX with one paragraph per entry of `paragraphs`
pub(crate) fn write_docx(path: &Path, paragraphs: &[&str]) {
    use docx_rs::{Docx, Paragraph, Run};

    let docx = paragraphs.iter().fold(Docx::new(), |docx, text| {
        docx.add_paragraph(Paragraph::new().add_run(Run::new().add_text(*text)))
    });
    let file = std::fs::File::create(path).unwrap();
    docx.build().pack(file).unwrap();
}
