//! Configuration for the document Q&A pipeline

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Environment variable holding the Gemini API key
pub const GOOGLE_API_KEY_ENV: &str = "GOOGLE_API_KEY";

/// Main pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// Corpus source
    pub corpus: CorpusConfig,
    /// Chunking configuration
    pub chunking: ChunkingConfig,
    /// Embedding configuration
    pub embeddings: EmbeddingConfig,
    /// Generative model configuration
    pub llm: LlmConfig,
    /// Persisted index configuration
    pub index: IndexConfig,
    /// Retrieval parameters
    pub retrieval: RetrievalConfig,
    /// Server configuration
    pub server: ServerConfig,
}

impl RagConfig {
    /// Load configuration from an optional TOML file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("Failed to read config {}: {}", path.display(), e))
                })?;
                Self::from_toml_str(&raw)?
            }
            None => Self::default(),
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::Config(format!("Invalid config: {}", e)))
    }

    /// Apply overrides from the environment (lookup is injectable for tests)
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(GOOGLE_API_KEY_ENV).filter(|k| !k.trim().is_empty()) {
            self.llm.api_key = Some(key);
        }
        if let Some(dir) = lookup("DOCQA_CORPUS_DIR") {
            self.corpus.dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup("DOCQA_INDEX_PATH") {
            self.index.path = PathBuf::from(path);
        }
        if let Some(model) = lookup("DOCQA_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(url) = lookup("OLLAMA_BASE_URL") {
            self.llm.ollama_base_url = url.clone();
            self.embeddings.ollama_base_url = url;
        }
    }

    /// Validate the configuration before any pipeline work begins
    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            return Err(Error::Config("chunk_size must be greater than zero".into()));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(Error::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunking.chunk_overlap, self.chunking.chunk_size
            )));
        }
        if self.embeddings.batch_size == 0 {
            return Err(Error::Config("embedding batch_size must be greater than zero".into()));
        }
        self.retrieval.validate()?;

        if self.llm.backend == LlmBackend::Gemini
            && self.llm.api_key.as_deref().map_or(true, |k| k.trim().is_empty())
        {
            return Err(Error::Config(format!(
                "{} environment variable not set",
                GOOGLE_API_KEY_ENV
            )));
        }

        Ok(())
    }
}

/// Corpus directory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorpusConfig {
    /// Directory holding the documents to index
    pub dir: PathBuf,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("pdfs"),
        }
    }
}

/// Text chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum chunk size in characters
    pub chunk_size: usize,
    /// Overlap between consecutive chunks in characters
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 100,
        }
    }
}

/// Embedding backend selection
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Local sentence-transformer through ONNX Runtime
    #[default]
    Onnx,
    /// Ollama server
    Ollama,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Backend provider
    pub backend: EmbeddingBackend,
    /// Model identifier (default: all-MiniLM-L6-v2)
    pub model: String,
    /// Embedding dimensions (384 for MiniLM, 768 for nomic-embed-text)
    pub dimensions: usize,
    /// Batch size for embedding generation
    pub batch_size: usize,
    /// Maximum sequence length in tokens
    pub max_length: usize,
    /// Cache directory for downloaded models
    pub cache_dir: PathBuf,
    /// Ollama base URL (ollama backend only)
    pub ollama_base_url: String,
    /// Request timeout in seconds (ollama backend only)
    pub timeout_secs: u64,
    /// Number of retries for failed requests
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Onnx,
            model: "all-MiniLM-L6-v2".to_string(),
            dimensions: 384,
            batch_size: 32,
            max_length: 256,
            cache_dir: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("docqa-rag")
                .join("models"),
            ollama_base_url: "http://localhost:11434".to_string(),
            timeout_secs: 60,
            max_retries: 2,
        }
    }
}

/// Generative model backend selection
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmBackend {
    /// Google Generative Language API
    #[default]
    Gemini,
    /// Ollama server
    Ollama,
}

/// Generative model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Backend provider
    pub backend: LlmBackend,
    /// Generation model name
    pub model: String,
    /// API key (gemini backend; usually taken from GOOGLE_API_KEY)
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Gemini API base URL
    pub gemini_base_url: String,
    /// Ollama base URL
    pub ollama_base_url: String,
    /// Temperature for generation
    pub temperature: f32,
    /// Maximum output tokens
    pub max_output_tokens: u32,
    /// Whole-request timeout for complete answers, and the longest silence
    /// tolerated between chunks of a streamed answer, in seconds
    pub timeout_secs: u64,
    /// Number of retries for failed requests
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: LlmBackend::Gemini,
            model: "gemini-2.0-flash".to_string(),
            api_key: None,
            gemini_base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            ollama_base_url: "http://localhost:11434".to_string(),
            temperature: 0.2,
            max_output_tokens: 2048,
            timeout_secs: 120,
            max_retries: 2,
        }
    }
}

/// Persisted index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Snapshot directory
    pub path: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("docqa_index"),
        }
    }
}

/// Retrieval parameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Number of chunks to retrieve
    pub top_k: usize,
    /// Minimum cosine similarity for a chunk to be retrieved
    pub similarity_threshold: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 4,
            similarity_threshold: 0.5,
        }
    }
}

impl RetrievalConfig {
    /// Check ranges
    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(Error::Config("top_k must be greater than zero".into()));
        }
        if !(-1.0..=1.0).contains(&self.similarity_threshold) {
            return Err(Error::Config(format!(
                "similarity_threshold must be within [-1, 1], got {}",
                self.similarity_threshold
            )));
        }
        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            enable_cors: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_key() -> RagConfig {
        let mut config = RagConfig::default();
        config.llm.api_key = Some("test-key".to_string());
        config
    }

    #[test]
    fn test_defaults_match_reference_setup() {
        let config = RagConfig::default();
        assert_eq!(config.chunking.chunk_size, 500);
        assert_eq!(config.chunking.chunk_overlap, 100);
        assert_eq!(config.retrieval.top_k, 4);
        assert_eq!(config.retrieval.similarity_threshold, 0.5);
        assert_eq!(config.embeddings.model, "all-MiniLM-L6-v2");
        assert_eq!(config.llm.model, "gemini-2.0-flash");
    }

    #[test]
    fn test_missing_api_key_is_config_error() {
        let config = RagConfig::default();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::Config(ref msg) if msg.contains(GOOGLE_API_KEY_ENV)));
    }

    #[test]
    fn test_ollama_backend_needs_no_key() {
        let mut config = RagConfig::default();
        config.llm.backend = LlmBackend::Ollama;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk_size() {
        let mut config = with_key();
        config.chunking.chunk_overlap = config.chunking.chunk_size;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_threshold_range_checked() {
        let mut config = with_key();
        config.retrieval.similarity_threshold = 1.5;
        assert!(config.validate().is_err());
        config.retrieval.similarity_threshold = 0.5;
        config.retrieval.top_k = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_partial_sections_keep_defaults() {
        let config = RagConfig::from_toml_str(
            r#"
            [chunking]
            chunk_size = 800

            [retrieval]
            top_k = 6

            [llm]
            backend = "ollama"
            model = "llama3.2:3b"
            "#,
        )
        .unwrap();

        assert_eq!(config.chunking.chunk_size, 800);
        assert_eq!(config.chunking.chunk_overlap, 100);
        assert_eq!(config.retrieval.top_k, 6);
        assert_eq!(config.retrieval.similarity_threshold, 0.5);
        assert_eq!(config.llm.backend, LlmBackend::Ollama);
        assert_eq!(config.llm.model, "llama3.2:3b");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = RagConfig::default();
        config.apply_env_overrides(|key| match key {
            "GOOGLE_API_KEY" => Some("abc".to_string()),
            "DOCQA_CORPUS_DIR" => Some("/data/manuals".to_string()),
            "DOCQA_INDEX_PATH" => Some("/data/index".to_string()),
            _ => None,
        });

        assert_eq!(config.llm.api_key.as_deref(), Some("abc"));
        assert_eq!(config.corpus.dir, PathBuf::from("/data/manuals"));
        assert_eq!(config.index.path, PathBuf::from("/data/index"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_blank_api_key_env_is_ignored() {
        let mut config = RagConfig::default();
        config.apply_env_overrides(|key| (key == GOOGLE_API_KEY_ENV).then(|| "  ".to_string()));
        assert!(config.llm.api_key.is_none());
    }
}
