//! Ollama embedding provider (local models)

use async_trait::async_trait;
use mnema_core::{EmbeddingError, EmbeddingVector, MnemaError, MnemaResult};
use reqwest::Client;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    prompt: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

/// Ollama embedding provider for locally hosted models.
pub struct OllamaEmbeddingProvider {
    client: Client,
    base_url: String,
    model: String,
    dimensions: i32,
}

impl OllamaEmbeddingProvider {
    /// Create a new Ollama embedding provider.
    ///
    /// # Arguments
    /// * `base_url` - Ollama server URL (e.g., "http://localhost:11434")
    /// * `model` - Model name (e.g., "nomic-embed-text")
    /// * `dimensions` - Embedding dimensions for the model
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, dimensions: i32) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            dimensions,
        }
    }

    /// Create provider with the default nomic-embed-text model.
    pub fn with_default_model(base_url: impl Into<String>) -> Self {
        Self::new(base_url, "nomic-embed-text", 768)
    }

    /// Check if the model is available locally.
    pub async fn check_model_available(&self) -> MnemaResult<bool> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .map_err(|e| {
                MnemaError::Embedding(EmbeddingError::RequestFailed {
                    provider: "ollama".to_string(),
                    status: 0,
                    message: format!("failed to connect to Ollama: {}", e),
                })
            })?;

        if !response.status().is_success() {
            return Ok(false);
        }

        #[derive(Deserialize)]
        struct ListResponse {
            models: Vec<ModelEntry>,
        }
        #[derive(Deserialize)]
        struct ModelEntry {
            name: String,
        }

        let list: ListResponse = response.json().await.map_err(|e| {
            MnemaError::Embedding(EmbeddingError::InvalidResponse {
                provider: "ollama".to_string(),
                reason: format!("failed to parse models list: {}", e),
            })
        })?;

        Ok(list.models.iter().any(|m| m.name.contains(&self.model)))
    }
}

#[async_trait]
impl crate::EmbeddingProvider for OllamaEmbeddingProvider {
    async fn embed(&self, text: &str) -> MnemaResult<EmbeddingVector> {
        let request = EmbeddingRequest {
            model: self.model.clone(),
            prompt: text.to_string(),
        };

        let response = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                MnemaError::Embedding(EmbeddingError::RequestFailed {
                    provider: "ollama".to_string(),
                    status: 0,
                    message: e.to_string(),
                })
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(MnemaError::Embedding(EmbeddingError::RequestFailed {
                provider: "ollama".to_string(),
                status: status.as_u16() as i32,
                message,
            }));
        }

        let parsed: EmbeddingResponse = response.json().await.map_err(|e| {
            MnemaError::Embedding(EmbeddingError::InvalidResponse {
                provider: "ollama".to_string(),
                reason: e.to_string(),
            })
        })?;

        Ok(EmbeddingVector::new(parsed.embedding, self.model.clone()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> MnemaResult<Vec<EmbeddingVector>> {
        // The local API embeds one prompt per call.
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    fn dimensions(&self) -> i32 {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn provider_tag(&self) -> &str {
        "ollama"
    }
}

impl std::fmt::Debug for OllamaEmbeddingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaEmbeddingProvider")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .finish()
    }
}
