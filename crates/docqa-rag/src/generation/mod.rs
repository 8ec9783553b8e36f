//! Answer generation: LLM providers, prompts, question reformulation,
//! streamed answer composition and citation handling

use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{LlmBackend, LlmConfig};
use crate::error::Result;
use crate::types::ChatMessage;

pub mod citation;
pub mod composer;
pub mod gemini;
pub mod ollama;
pub mod prompt;
pub mod reformulator;
pub mod retry;
pub mod stream;

pub use citation::{cited_sources, dedupe_sources, extract_citations, CitationRef};
pub use composer::{AnswerComposer, AnswerStream, ComposedAnswer};
pub use gemini::GeminiClient;
pub use ollama::OllamaClient;
pub use prompt::PromptBuilder;
pub use reformulator::QueryReformulator;
pub use retry::RetryPolicy;
pub use stream::FragmentStream;

/// One call to a generative model
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// Behavioural instruction (system prompt)
    pub system_instruction: String,
    /// Retrieved document context, placed before the prompt in the final user turn
    pub context: Option<String>,
    /// Prior conversation as alternating user/assistant messages
    pub history: Vec<ChatMessage>,
    /// Final user prompt
    pub prompt: String,
}

impl GenerationRequest {
    /// Content of the final user turn
    pub fn user_content(&self) -> String {
        match &self.context {
            Some(context) => format!("CONTEXT FROM DOCUMENTS:\n{}\n\n{}", context, self.prompt),
            None => self.prompt.clone(),
        }
    }
}

/// Trait for generative models
///
/// Implementations:
/// - `GeminiClient`: Google Generative Language API (gemini-2.0-flash)
/// - `OllamaClient`: Local Ollama server `/api/chat`
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a complete response
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;

    /// Generate a response as a stream of text fragments.
    ///
    /// Errors before the stream opens are returned directly; failures after
    /// that are yielded by the stream.
    async fn generate_stream(&self, request: &GenerationRequest) -> Result<FragmentStream>;

    /// Check if the provider is healthy and available
    async fn health_check(&self) -> Result<bool>;

    /// Get provider name for logging
    fn name(&self) -> &str;

    /// Get the model being used
    fn model(&self) -> &str;
}

/// Longest wait for a TCP/TLS connection to an LLM backend
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client for LLM backends.
///
/// No whole-request timeout is set, since it would also cut off streamed
/// bodies. `read_timeout` bounds the silence between chunks; complete
/// (non-streamed) calls add a per-request timeout on top.
pub(crate) fn llm_http_client(idle_timeout: Duration) -> Result<Client> {
    Ok(Client::builder()
        .connect_timeout(CONNECT_TIMEOUT.min(idle_timeout))
        .read_timeout(idle_timeout)
        .pool_max_idle_per_host(5)
        .build()?)
}

/// Create the LLM client selected by `llm.backend`
pub fn create_llm(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>> {
    let llm: Arc<dyn LlmProvider> = match config.backend {
        LlmBackend::Gemini => Arc::new(GeminiClient::new(config)?),
        LlmBackend::Ollama => Arc::new(OllamaClient::new(config)?),
    };
    tracing::info!("Using LLM {} ({})", llm.name(), llm.model());
    Ok(llm)
}
