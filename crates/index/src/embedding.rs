use std::time::Duration;

use auditrag_core::{HashEmbedder, HashEmbedderConfig};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::error::{IndexError, Result};

const GEMINI_BATCH_LIMIT: usize = 100;
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbeddingConfig {
    Gemini { api_key: String, model: String },
    Hash { dimensions: usize },
}

#[derive(Clone)]
pub enum EmbeddingBackend {
    Hash(HashEmbedder),
    Gemini(GeminiEmbeddingClient),
}

/// Computes embeddings at call time; nothing is cached.
#[derive(Clone)]
pub struct EmbeddingClient {
    backend: EmbeddingBackend,
}

#[derive(Clone, Copy)]
enum TaskType {
    Document,
    Query,
}

impl TaskType {
    fn as_str(self) -> &'static str {
        match self {
            TaskType::Document => "RETRIEVAL_DOCUMENT",
            TaskType::Query => "RETRIEVAL_QUERY",
        }
    }
}

impl EmbeddingClient {
    pub fn new(config: &EmbeddingConfig, timeout: Duration) -> Result<Self> {
        let backend = match config {
            EmbeddingConfig::Gemini { api_key, model } => EmbeddingBackend::Gemini(
                GeminiEmbeddingClient::new(api_key.clone(), model.clone(), timeout)?,
            ),
            EmbeddingConfig::Hash { dimensions } => {
                EmbeddingBackend::Hash(HashEmbedder::new(HashEmbedderConfig {
                    dimensions: *dimensions,
                    ..Default::default()
                }))
            }
        };
        Ok(Self { backend })
    }

    pub fn hash() -> Self {
        Self {
            backend: EmbeddingBackend::Hash(HashEmbedder::new(HashEmbedderConfig::default())),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self.backend {
            EmbeddingBackend::Hash(_) => "hash",
            EmbeddingBackend::Gemini(_) => "gemini",
        }
    }

    pub async fn embed_documents(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let vectors = match &self.backend {
            EmbeddingBackend::Hash(embedder) => inputs
                .iter()
                .map(|text| embedder.embed_text(text))
                .collect(),
            EmbeddingBackend::Gemini(client) => {
                let mut out = Vec::with_capacity(inputs.len());
                for batch in inputs.chunks(GEMINI_BATCH_LIMIT) {
                    out.extend(client.embed_batch(batch, TaskType::Document).await?);
                }
                out
            }
        };
        if vectors.len() != inputs.len() {
            return Err(IndexError::Embedding(format!(
                "expected {} embeddings, got {}",
                inputs.len(),
                vectors.len()
            )));
        }
        Ok(vectors)
    }

    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        match &self.backend {
            EmbeddingBackend::Hash(embedder) => Ok(embedder.embed_text(text)),
            EmbeddingBackend::Gemini(client) => client
                .embed_batch(&[text.to_string()], TaskType::Query)
                .await?
                .pop()
                .ok_or_else(|| IndexError::Embedding("empty embedding response".to_string())),
        }
    }
}

#[derive(Clone)]
pub struct GeminiEmbeddingClient {
    http: Client,
    model: String,
    api_key: String,
}

impl GeminiEmbeddingClient {
    pub fn new(api_key: String, model: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: Client::builder().timeout(timeout).build()?,
            model,
            api_key,
        })
    }

    async fn embed_batch(&self, inputs: &[String], task: TaskType) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let model_path = format!("models/{}", self.model);
        let requests = inputs
            .iter()
            .map(|text| {
                json!({
                    "model": model_path,
                    "content": { "parts": [{ "text": text }] },
                    "taskType": task.as_str(),
                })
            })
            .collect::<Vec<_>>();
        let url = format!("{GEMINI_BASE_URL}/{model_path}:batchEmbedContents");
        let response = self
            .http
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&json!({ "requests": requests }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IndexError::Embedding(format!(
                "gemini embeddings returned {status}: {body}"
            )));
        }
        let parsed: GeminiBatchResponse = response.json().await?;
        Ok(parsed.embeddings.into_iter().map(|e| e.values).collect())
    }
}

#[derive(Deserialize)]
struct GeminiBatchResponse {
    #[serde(default)]
    embeddings: Vec<GeminiEmbedding>,
}

#[derive(Deserialize)]
struct GeminiEmbedding {
    values: Vec<f32>,
}
