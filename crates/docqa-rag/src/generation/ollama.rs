//! Ollama LLM client using the `/api/chat` endpoint with retry logic

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::{Error, Result};

use super::retry::{status_error, RetryPolicy};
use super::stream::{decode_ndjson, FragmentStream};
use super::{llm_http_client, GenerationRequest, LlmProvider};

/// Ollama API client with automatic retry
pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
    temperature: f32,
    max_output_tokens: u32,
    retry: RetryPolicy,
    /// Whole-request limit for complete answers
    timeout: Duration,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: u32,
}

/// Response body, and also each NDJSON record when streaming
#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: Option<ResponseMessage>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

impl ChatResponse {
    fn into_fragment(self) -> Option<Result<String>> {
        if let Some(error) = self.error {
            return Some(Err(Error::llm(format!("Ollama stream error: {}", error))));
        }
        self.message
            .map(|m| m.content)
            .filter(|content| !content.is_empty())
            .map(Ok)
    }
}

impl OllamaClient {
    /// Create a new Ollama client with retry support
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = llm_http_client(timeout)?;

        Ok(Self {
            client,
            base_url: config.ollama_base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            retry: RetryPolicy::new(config.max_retries),
            timeout,
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// System message, then history, then the user turn
    fn build_request<'a>(
        &'a self,
        request: &'a GenerationRequest,
        user_content: &'a str,
        stream: bool,
    ) -> ChatRequest<'a> {
        let mut messages = Vec::with_capacity(request.history.len() + 2);
        messages.push(Message {
            role: "system",
            content: &request.system_instruction,
        });
        messages.extend(request.history.iter().map(|m| Message {
            role: m.role.as_str(),
            content: &m.content,
        }));
        messages.push(Message {
            role: "user",
            content: user_content,
        });

        ChatRequest {
            model: &self.model,
            messages,
            stream,
            options: ChatOptions {
                temperature: self.temperature,
                num_predict: self.max_output_tokens,
            },
        }
    }

    /// POST the chat request with retries. `total` bounds the whole exchange,
    /// body included; streamed requests pass `None`.
    async fn send(&self, body: &ChatRequest<'_>, total: Option<Duration>) -> Result<Response> {
        let url = format!("{}/api/chat", self.base_url);
        let url = url.as_str();
        let client = &self.client;

        self.retry
            .run("Ollama chat request", move || async move {
                let mut builder = client.post(url).json(body);
                if let Some(total) = total {
                    builder = builder.timeout(total);
                }
                let response = builder
                    .send()
                    .await
                    .map_err(|e| Error::llm(format!("Generation request failed: {}", e)))?;

                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(status_error("Ollama", status, &body, Error::Llm));
                }
                Ok(response)
            })
            .await
    }
}

#[async_trait]
impl LlmProvider for OllamaClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let user_content = request.user_content();
        let body = self.build_request(request, &user_content, false);

        tracing::debug!("Generating answer with model: {}", self.model);
        let response = self.send(&body, Some(self.timeout)).await?;
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::llm(format!("Failed to parse generation response: {}", e)))?;

        match parsed.into_fragment() {
            Some(result) => result,
            None => Ok(String::new()),
        }
    }

    async fn generate_stream(&self, request: &GenerationRequest) -> Result<FragmentStream> {
        let user_content = request.user_content();
        let body = self.build_request(request, &user_content, true);

        tracing::debug!("Streaming answer with model: {}", self.model);
        let response = self.send(&body, None).await?;
        Ok(decode_ndjson(response.bytes_stream(), ChatResponse::into_fragment))
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/api/tags", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }
}
