//! Ollama embedding client

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};
use crate::generation::retry::{status_error, RetryPolicy};

use super::{check_vectors, EmbeddingProvider};

/// Embeddings from an Ollama server using the batch `/api/embed` endpoint
pub struct OllamaEmbedder {
    client: Client,
    base_url: String,
    model: String,
    dimensions: usize,
    batch_size: usize,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbedder {
    /// Create a new Ollama embedder
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(5)
            .build()?;

        Ok(Self {
            client,
            base_url: config.ollama_base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dimensions: config.dimensions,
            batch_size: config.batch_size.max(1),
            retry: RetryPolicy::new(config.max_retries),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn embed_request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/api/embed", self.base_url);
        let url = url.as_str();
        let client = &self.client;
        let model = self.model.as_str();

        self.retry
            .run("Ollama embedding request", move || async move {
                let response = client
                    .post(url)
                    .json(&EmbedRequest {
                        model,
                        input: texts,
                    })
                    .send()
                    .await
                    .map_err(|e| Error::embedding(format!("Embedding request failed: {}", e)))?;

                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(status_error("Ollama", status, &body, Error::Embedding));
                }

                let parsed: EmbedResponse = response.json().await.map_err(|e| {
                    Error::embedding(format!("Failed to parse embedding response: {}", e))
                })?;
                Ok(parsed.embeddings)
            })
            .await
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut all = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let vectors = self.embed_request(batch).await?;
            check_vectors("Ollama", batch.len(), self.dimensions, &vectors)?;
            all.extend(vectors);
        }
        Ok(all)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::spawn_mock_server;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn config(base_url: String) -> EmbeddingConfig {
        EmbeddingConfig {
            ollama_base_url: base_url,
            model: "nomic-embed-text".to_string(),
            dimensions: 2,
            batch_size: 2,
            ..EmbeddingConfig::default()
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(2).with_base_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_batches_and_preserves_order() {
        let router = Router::new().route(
            "/api/embed",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["model"], "nomic-embed-text");
                let inputs = body["input"].as_array().cloned().unwrap_or_default();
                assert!(inputs.len() <= 2);
                let embeddings: Vec<Value> = inputs
                    .iter()
                    .map(|t| {
                        let n = t.as_str().unwrap().len() as f32;
                        json!([n, 1.0])
                    })
                    .collect();
                Json(json!({ "embeddings": embeddings }))
            }),
        );
        let base_url = spawn_mock_server(router).await;
        let embedder = OllamaEmbedder::new(&config(base_url)).unwrap();

        let texts: Vec<String> = ["a", "bb", "ccc"].iter().map(|s| s.to_string()).collect();
        let vectors = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(vectors, vec![vec![1.0, 1.0], vec![2.0, 1.0], vec![3.0, 1.0]]);
    }

    #[tokio::test]
    async fn test_retries_server_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let router = Router::new().route(
            "/api/embed",
            post(move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(StatusCode::SERVICE_UNAVAILABLE)
                    } else {
                        Ok(Json(json!({ "embeddings": [[0.5, 0.5]] })))
                    }
                }
            }),
        );
        let base_url = spawn_mock_server(router).await;
        let embedder = OllamaEmbedder::new(&config(base_url))
            .unwrap()
            .with_retry_policy(fast_retry());

        let vector = embedder.embed("hello").await.unwrap();
        assert_eq!(vector, vec![0.5, 0.5]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_wrong_dimensions_is_embedding_error() {
        let router = Router::new().route(
            "/api/embed",
            post(|| async { Json(json!({ "embeddings": [[0.1, 0.2, 0.3]] })) }),
        );
        let base_url = spawn_mock_server(router).await;
        let embedder = OllamaEmbedder::new(&config(base_url)).unwrap();

        let err = embedder.embed("hello").await.unwrap_err();
        assert!(matches!(err, Error::Embedding(_)));
    }
}
