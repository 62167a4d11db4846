// src/embeddings/http.rs
// OpenAI-compatible embeddings endpoint client.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::EmbeddingProvider;
use crate::error::{MemoryError, Result};

pub struct HttpEmbeddingProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    dimension: usize,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

/// Response from the embeddings API
#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl HttpEmbeddingProvider {
    pub fn new<S: Into<String>>(base_url: S, api_key: S, model: S, dimension: usize) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            dimension,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let body = EmbeddingRequest {
            model: &self.model,
            input: text,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| MemoryError::Provider(format!("embedding request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(MemoryError::Provider(format!(
                "embedding API returned {status}: {detail}"
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| MemoryError::Provider(format!("malformed embedding response: {e}")))?;

        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| MemoryError::Provider("embedding response was empty".to_string()))?;

        if vector.len() != self.dimension {
            return Err(MemoryError::Provider(format!(
                "provider returned dimension {} but index expects {}",
                vector.len(),
                self.dimension
            )));
        }

        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
