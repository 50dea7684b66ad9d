//! Embedding generation.
//!
//! Every ingested input is embedded once, through a single [`Embedder`].
//! The production implementation talks to an OpenAI-compatible
//! `/v1/embeddings` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::EmbeddingConfig;

/// Token usage reported for an embedding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingUsage {
    pub prompt_tokens: u32,
    pub total_tokens: u32,
}

/// One embedding vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub model: String,
    pub usage: EmbeddingUsage,
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding provider is not configured")]
    NotConfigured,
    #[error("cannot generate embedding for empty text")]
    EmptyInput,
    #[error("embedding request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("embedding API error ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("embedding response contained {got} vectors for {expected} inputs")]
    MissingData { expected: usize, got: usize },
}

/// Produces embedding vectors for text.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed one text. The text is trimmed; blank text is an error.
    async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError>;

    /// Embed several texts in one call. Entries are trimmed and blank ones
    /// dropped, so the result may be shorter than the input.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbeddingError>;

    /// Model name used for new embeddings.
    fn model(&self) -> &str;
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: EmbeddingInput<'a>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum EmbeddingInput<'a> {
    Single(&'a str),
    Batch(Vec<&'a str>),
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
    model: String,
    #[serde(default)]
    usage: EmbeddingUsage,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

/// OpenAI-compatible embedding client.
#[derive(Debug, Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    dimensions: usize,
}

impl OpenAiEmbedder {
    /// Build a client from configuration. A missing API key is allowed;
    /// every call then fails with [`EmbeddingError::NotConfigured`].
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            dimensions: config.dimensions,
        })
    }

    fn api_url(&self) -> String {
        format!("{}/v1/embeddings", self.base_url.trim_end_matches('/'))
    }

    async fn request(
        &self,
        input: EmbeddingInput<'_>,
    ) -> Result<EmbeddingResponse, EmbeddingError> {
        let api_key = self.api_key.as_deref().ok_or(EmbeddingError::NotConfigured)?;

        let response = self
            .client
            .post(self.api_url())
            .bearer_auth(api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let mut parsed: EmbeddingResponse = response.json().await?;
        parsed.data.sort_by_key(|d| d.index);

        if let Some(bad) = parsed.data.iter().find(|d| d.embedding.len() != self.dimensions) {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimensions,
                actual: bad.embedding.len(),
            });
        }

        Ok(parsed)
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }

        let response = self.request(EmbeddingInput::Single(text)).await?;
        let got = response.data.len();
        let datum = response
            .data
            .into_iter()
            .next()
            .ok_or(EmbeddingError::MissingData { expected: 1, got })?;

        tracing::debug!(
            model = %response.model,
            tokens = response.usage.total_tokens,
            "Generated embedding"
        );

        Ok(Embedding {
            vector: datum.embedding,
            model: response.model,
            usage: response.usage,
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbeddingError> {
        let clean: Vec<&str> = texts
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .collect();
        if clean.is_empty() {
            return Ok(Vec::new());
        }

        let expected = clean.len();
        let response = self.request(EmbeddingInput::Batch(clean)).await?;
        if response.data.len() != expected {
            return Err(EmbeddingError::MissingData {
                expected,
                got: response.data.len(),
            });
        }

        let count = u32::try_from(expected).unwrap_or(u32::MAX);
        let usage = EmbeddingUsage {
            prompt_tokens: response.usage.prompt_tokens / count,
            total_tokens: response.usage.total_tokens / count,
        };

        Ok(response
            .data
            .into_iter()
            .map(|d| Embedding {
                vector: d.embedding,
                model: response.model.clone(),
                usage,
            })
            .collect())
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let single = serde_json::to_value(EmbeddingRequest {
            model: "text-embedding-3-small",
            input: EmbeddingInput::Single("hello"),
        })
        .unwrap();
        assert_eq!(
            single,
            serde_json::json!({"model": "text-embedding-3-small", "input": "hello"})
        );

        let batch = serde_json::to_value(EmbeddingRequest {
            model: "m",
            input: EmbeddingInput::Batch(vec!["a", "b"]),
        })
        .unwrap();
        assert_eq!(batch["input"], serde_json::json!(["a", "b"]));
    }

    #[test]
    fn test_api_url_trims_slash() {
        let embedder = OpenAiEmbedder::new(&EmbeddingConfig {
            base_url: "http://localhost:9000/".to_string(),
            ..EmbeddingConfig::default()
        })
        .unwrap();
        assert_eq!(embedder.api_url(), "http://localhost:9000/v1/embeddings");
        assert_eq!(embedder.model(), "text-embedding-3-small");
    }

    #[tokio::test]
    async fn test_blank_text_and_missing_key() {
        let embedder = OpenAiEmbedder::new(&EmbeddingConfig::default()).unwrap();
        assert!(matches!(
            embedder.embed("   ").await,
            Err(EmbeddingError::EmptyInput)
        ));
        assert!(matches!(
            embedder.embed("hello").await,
            Err(EmbeddingError::NotConfigured)
        ));
        assert!(embedder.embed_batch(&[" ".to_string()]).await.unwrap().is_empty());
    }
}
