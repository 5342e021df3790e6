//! OpenAI embedding provider

use async_trait::async_trait;
use mnema_core::{EmbeddingError, EmbeddingVector, MnemaError, MnemaResult};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// OpenAI embedding provider using text-embedding-3-small or a custom model.
pub struct OpenAIEmbeddingProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dimensions: i32,
}

impl OpenAIEmbeddingProvider {
    /// Create a new OpenAI embedding provider.
    ///
    /// # Arguments
    /// * `api_key` - OpenAI API key
    /// * `model` - Model name (e.g., "text-embedding-3-small")
    /// * `dimensions` - Embedding dimensions (1536 for 3-small default)
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, dimensions: i32) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: model.into(),
            dimensions,
        }
    }

    /// Create provider with the default text-embedding-3-small model.
    pub fn with_default_model(api_key: impl Into<String>) -> Self {
        Self::new(api_key, "text-embedding-3-small", 1536)
    }

    /// Point the provider at a compatible server (tests, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn request(&self, input: Vec<String>) -> MnemaResult<EmbeddingResponse> {
        let body = EmbeddingRequest {
            model: self.model.clone(),
            input,
            dimensions: Some(self.dimensions),
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                MnemaError::Embedding(EmbeddingError::RequestFailed {
                    provider: "openai".to_string(),
                    status: 0,
                    message: e.to_string(),
                })
            })?;

        let status = response.status();
        if status.is_success() {
            return response.json().await.map_err(|e| {
                MnemaError::Embedding(EmbeddingError::InvalidResponse {
                    provider: "openai".to_string(),
                    reason: e.to_string(),
                })
            });
        }

        let retry_after_ms = response
            .headers()
            .get("retry-after")
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.parse::<i64>().ok())
            .map(|secs| secs * 1000)
            .unwrap_or(1000);
        let error_text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorResponse>(&error_text)
            .map(|e| e.error.message)
            .unwrap_or(error_text);

        Err(match status {
            StatusCode::TOO_MANY_REQUESTS => MnemaError::Embedding(EmbeddingError::RateLimited {
                provider: "openai".to_string(),
                retry_after_ms,
            }),
            _ => MnemaError::Embedding(EmbeddingError::RequestFailed {
                provider: "openai".to_string(),
                status: status.as_u16() as i32,
                message,
            }),
        })
    }
}

#[async_trait]
impl crate::EmbeddingProvider for OpenAIEmbeddingProvider {
    async fn embed(&self, text: &str) -> MnemaResult<EmbeddingVector> {
        let response = self.request(vec![text.to_string()]).await?;
        let data = response.data.into_iter().next().ok_or_else(|| {
            MnemaError::Embedding(EmbeddingError::InvalidResponse {
                provider: "openai".to_string(),
                reason: "no embedding data in response".to_string(),
            })
        })?;
        Ok(EmbeddingVector::new(data.embedding, self.model.clone()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> MnemaResult<Vec<EmbeddingVector>> {
        let response = self
            .request(texts.iter().map(|s| s.to_string()).collect())
            .await?;

        let embeddings: Vec<_> = response
            .data
            .into_iter()
            .map(|data| EmbeddingVector::new(data.embedding, self.model.clone()))
            .collect();

        if embeddings.len() != texts.len() {
            return Err(MnemaError::Embedding(EmbeddingError::InvalidResponse {
                provider: "openai".to_string(),
                reason: format!(
                    "expected {} embeddings but got {}",
                    texts.len(),
                    embeddings.len()
                ),
            }));
        }
        Ok(embeddings)
    }

    fn dimensions(&self) -> i32 {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn provider_tag(&self) -> &str {
        "openai"
    }
}

impl std::fmt::Debug for OpenAIEmbeddingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIEmbeddingProvider")
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}
