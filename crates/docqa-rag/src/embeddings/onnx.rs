//! ONNX-based embedding generation
//!
//! Runs a sentence-transformers model (all-MiniLM-L6-v2 by default) locally
//! through ONNX Runtime. Model and tokenizer files are fetched from Hugging
//! Face into the cache directory on first use.

use async_trait::async_trait;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tokenizers::Tokenizer;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

use super::{check_vectors, EmbeddingProvider};

struct OnnxModel {
    /// ONNX Runtime session
    session: Session,
    /// HuggingFace tokenizer
    tokenizer: Tokenizer,
}

/// ONNX-based text embedder
pub struct OnnxEmbedder {
    model: Arc<Mutex<OnnxModel>>,
    model_id: String,
    dimensions: usize,
    max_length: usize,
    batch_size: usize,
}

impl OnnxEmbedder {
    /// Create a new ONNX embedder, downloading model files if they are not cached
    pub async fn new(config: &EmbeddingConfig) -> Result<Self> {
        tracing::info!("Initializing ONNX embedder with model: {}", config.model);

        let model_dir = config.cache_dir.join(&config.model);
        tokio::fs::create_dir_all(&model_dir)
            .await
            .map_err(|e| Error::Config(format!("Failed to create cache directory: {}", e)))?;

        let model_path = model_dir.join("model.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");

        if !model_path.exists() {
            download(&config.model, "onnx/model.onnx", &model_path).await?;
        }
        if !tokenizer_path.exists() {
            download(&config.model, "tokenizer.json", &tokenizer_path).await?;
        }

        let model = tokio::task::spawn_blocking(move || load_model(&model_path, &tokenizer_path))
            .await
            .map_err(|e| Error::internal(format!("Model loading task failed: {}", e)))??;

        tracing::info!("ONNX embedder initialized successfully");

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            model_id: config.model.clone(),
            dimensions: config.dimensions,
            max_length: config.max_length,
            batch_size: config.batch_size.max(1),
        })
    }
}

fn load_model(model_path: &Path, tokenizer_path: &Path) -> Result<OnnxModel> {
    let session = Session::builder()
        .map_err(|e| Error::embedding(format!("Failed to create session builder: {}", e)))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| Error::embedding(format!("Failed to set optimization level: {}", e)))?
        .with_intra_threads(4)
        .map_err(|e| Error::embedding(format!("Failed to set threads: {}", e)))?
        .commit_from_file(model_path)
        .map_err(|e| Error::embedding(format!("Failed to load model: {}", e)))?;

    let tokenizer = Tokenizer::from_file(tokenizer_path)
        .map_err(|e| Error::embedding(format!("Failed to load tokenizer: {}", e)))?;

    Ok(OnnxModel { session, tokenizer })
}

impl OnnxModel {
    fn embed(&mut self, texts: &[String], max_length: usize, dimensions: usize) -> Result<Vec<Vec<f32>>> {
        let batch_size = texts.len();

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| Error::embedding(format!("Tokenization failed: {}", e)))?;

        let seq_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0)
            .min(max_length);

        let mut input_ids = vec![0i64; batch_size * seq_len];
        let mut attention_mask = vec![0i64; batch_size * seq_len];
        let mut token_type_ids = vec![0i64; batch_size * seq_len];

        for (i, encoding) in encodings.iter().enumerate() {
            let ids = encoding.get_ids();
            let mask = encoding.get_attention_mask();
            let types = encoding.get_type_ids();

            for j in 0..ids.len().min(seq_len) {
                input_ids[i * seq_len + j] = ids[j] as i64;
                attention_mask[i * seq_len + j] = mask[j] as i64;
                token_type_ids[i * seq_len + j] = types[j] as i64;
            }
        }

        let shape = vec![batch_size, seq_len];
        let input_ids_tensor = Tensor::from_array((shape.clone(), input_ids.into_boxed_slice()))
            .map_err(|e| Error::embedding(format!("Input tensor creation failed: {}", e)))?;
        let attention_mask_tensor =
            Tensor::from_array((shape.clone(), attention_mask.clone().into_boxed_slice()))
                .map_err(|e| {
                    Error::embedding(format!("Attention mask tensor creation failed: {}", e))
                })?;
        let token_type_ids_tensor =
            Tensor::from_array((shape, token_type_ids.into_boxed_slice())).map_err(|e| {
                Error::embedding(format!("Token type tensor creation failed: {}", e))
            })?;

        let inputs = vec![
            ("input_ids", input_ids_tensor.into_dyn()),
            ("attention_mask", attention_mask_tensor.into_dyn()),
            ("token_type_ids", token_type_ids_tensor.into_dyn()),
        ];

        let outputs = self
            .session
            .run(inputs)
            .map_err(|e| Error::embedding(format!("Inference failed: {}", e)))?;

        // last_hidden_state, or the first output for exports that name it differently
        let output_iter: Vec<_> = outputs.iter().collect();
        let output = output_iter
            .iter()
            .find(|(name, _)| *name == "last_hidden_state")
            .or_else(|| output_iter.first())
            .map(|(_, v)| v)
            .ok_or_else(|| Error::embedding("No output tensor"))?;

        let (tensor_shape, tensor_data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| Error::embedding(format!("Failed to extract tensor: {}", e)))?;

        let dims: Vec<usize> = tensor_shape.iter().map(|&d| d as usize).collect();
        let hidden_size = dims.get(2).copied().unwrap_or(dimensions);

        Ok(mean_pool(tensor_data, &attention_mask, batch_size, seq_len, hidden_size))
    }
}

/// Attention-masked mean over the sequence axis, then L2 normalisation
fn mean_pool(
    hidden: &[f32],
    attention_mask: &[i64],
    batch_size: usize,
    seq_len: usize,
    hidden_size: usize,
) -> Vec<Vec<f32>> {
    let mut embeddings = Vec::with_capacity(batch_size);

    for i in 0..batch_size {
        let mut sum = vec![0.0f32; hidden_size];
        let mut count = 0.0f32;

        for j in 0..seq_len {
            let mask_val = attention_mask[i * seq_len + j] as f32;
            if mask_val > 0.0 {
                for (k, acc) in sum.iter_mut().enumerate() {
                    let idx = i * seq_len * hidden_size + j * hidden_size + k;
                    if let Some(value) = hidden.get(idx) {
                        *acc += value * mask_val;
                    }
                }
                count += mask_val;
            }
        }

        if count > 0.0 {
            for val in &mut sum {
                *val /= count;
            }
        }

        let norm: f32 = sum.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for val in &mut sum {
                *val /= norm;
            }
        }

        embeddings.push(sum);
    }

    embeddings
}

#[async_trait]
impl EmbeddingProvider for OnnxEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut all_embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let model = Arc::clone(&self.model);
            let batch = batch.to_vec();
            let (max_length, dimensions) = (self.max_length, self.dimensions);

            let vectors = tokio::task::spawn_blocking(move || {
                model.lock().embed(&batch, max_length, dimensions)
            })
            .await
            .map_err(|e| Error::internal(format!("Embedding task failed: {}", e)))??;

            all_embeddings.extend(vectors);
        }

        check_vectors("onnx", texts.len(), self.dimensions, &all_embeddings)?;
        Ok(all_embeddings)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn name(&self) -> &str {
        "onnx"
    }
}

/// Download a file from the model's Hugging Face repository
async fn download(model_name: &str, file: &str, path: &Path) -> Result<()> {
    let url = format!(
        "https://huggingface.co/sentence-transformers/{}/resolve/main/{}",
        model_name, file
    );

    tracing::info!("Downloading {} from: {}", file, url);

    let response = reqwest::get(&url)
        .await
        .map_err(|e| Error::embedding(format!("Failed to download {}: {}", file, e)))?;

    if !response.status().is_success() {
        return Err(Error::embedding(format!(
            "Download of {} failed: HTTP {}",
            file,
            response.status()
        )));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| Error::embedding(format!("Failed to read {} bytes: {}", file, e)))?;

    // Partial downloads must never be mistaken for a cached model
    let partial = path.with_extension("partial");
    tokio::fs::write(&partial, &bytes).await?;
    tokio::fs::rename(&partial, path).await?;

    tracing::info!("Downloaded {} ({} bytes)", file, bytes.len());
    Ok(())
}
