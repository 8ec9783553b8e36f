//! Gemini client for the Google Generative Language API
//!
//! Non-streaming calls use `models/{model}:generateContent`; streaming calls
//! use `:streamGenerateContent?alt=sse` and decode the event stream
//! incrementally.

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::{Error, Result};
use crate::types::Role;

use super::retry::{status_error, RetryPolicy};
use super::stream::{decode_sse, FragmentStream};
use super::{llm_http_client, GenerationRequest, LlmProvider};

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Gemini API client
pub struct GeminiClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_output_tokens: u32,
    retry: RetryPolicy,
    /// Whole-request limit for complete answers
    timeout: Duration,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: SystemInstruction<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct SystemInstruction<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct GenerateResponse {
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ResponseContent {
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GenerateResponse {
    /// Text of the first candidate, or an error when the prompt was blocked
    fn into_text(self) -> Result<String> {
        if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(Error::Internal(format!("Gemini blocked the prompt: {}", reason)));
        }
        Ok(self
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<String>()
            })
            .unwrap_or_default())
    }
}

impl GeminiClient {
    /// Create a new Gemini client. Fails when no API key is configured.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                Error::Config(format!(
                    "{} environment variable not set",
                    crate::config::GOOGLE_API_KEY_ENV
                ))
            })?;

        let timeout = Duration::from_secs(config.timeout_secs);
        let client = llm_http_client(timeout)?;

        Ok(Self {
            client,
            base_url: config.gemini_base_url.trim_end_matches('/').to_string(),
            api_key,
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

    fn endpoint(&self, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, self.model, method)
    }

    /// Map our request onto the Gemini wire format. Assistant turns use the
    /// `model` role.
    fn build_body<'a>(&self, request: &'a GenerationRequest, user_content: &'a str) -> GenerateRequest<'a> {
        let mut contents: Vec<Content<'a>> = request
            .history
            .iter()
            .map(|message| Content {
                role: match message.role {
                    Role::User => "user",
                    Role::Assistant => "model",
                },
                parts: [Part {
                    text: &message.content,
                }],
            })
            .collect();
        contents.push(Content {
            role: "user",
            parts: [Part { text: user_content }],
        });

        GenerateRequest {
            system_instruction: SystemInstruction {
                parts: [Part {
                    text: &request.system_instruction,
                }],
            },
            contents,
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_output_tokens,
            },
        }
    }

    /// POST the request with retries; returns the successful response.
    /// `total` bounds the whole exchange and is only set for complete answers.
    async fn send(
        &self,
        url: &str,
        body: &GenerateRequest<'_>,
        total: Option<Duration>,
    ) -> Result<Response> {
        let client = &self.client;
        let api_key = self.api_key.as_str();

        self.retry
            .run("Gemini request", move || async move {
                let mut builder = client.post(url).header(API_KEY_HEADER, api_key).json(body);
                if let Some(total) = total {
                    builder = builder.timeout(total);
                }
                let response = builder
                    .send()
                    .await
                    .map_err(|e| Error::llm(format!("Gemini request failed: {}", e)))?;

                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(status_error("Gemini", status, &body, Error::Llm));
                }
                Ok(response)
            })
            .await
    }
}

#[async_trait]
impl LlmProvider for GeminiClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let user_content = request.user_content();
        let body = self.build_body(request, &user_content);
        let url = self.endpoint("generateContent");

        tracing::debug!("Gemini generateContent with model {}", self.model);
        let response = self.send(&url, &body, Some(self.timeout)).await?;
        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| Error::llm(format!("Failed to parse Gemini response: {}", e)))?;
        parsed.into_text()
    }

    async fn generate_stream(&self, request: &GenerationRequest) -> Result<FragmentStream> {
        let user_content = request.user_content();
        let body = self.build_body(request, &user_content);
        let url = format!("{}?alt=sse", self.endpoint("streamGenerateContent"));

        tracing::debug!("Gemini streamGenerateContent with model {}", self.model);
        let response = self.send(&url, &body, None).await?;

        Ok(decode_sse(
            response.bytes_stream(),
            |chunk: GenerateResponse| match chunk.into_text() {
                Ok(text) if text.is_empty() => None,
                other => Some(other),
            },
        ))
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/models/{}", self.base_url, self.model);
        match self
            .client
            .get(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
        {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }
}
