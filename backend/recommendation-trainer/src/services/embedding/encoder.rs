use crate::error::{Result, TrainerError};
use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// External text encoder. Must return one vector per input text, in order.
#[async_trait]
pub trait EmbeddingEncoder: Send + Sync {
    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Model identifier reported in the run summary
    fn model_name(&self) -> &str;
}

// ============================================
// OpenAI Embeddings
// ============================================

pub struct OpenAiEncoder {
    client: HttpClient,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiEncoder {
    pub fn new(api_key: &str, model: &str) -> Result<Self> {
        let client = HttpClient::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| TrainerError::Embedding(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

#[derive(Serialize)]
struct OpenAiEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingData>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingEncoder for OpenAiEncoder {
    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = OpenAiEmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| TrainerError::Embedding(format!("OpenAI API error: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(TrainerError::Embedding(format!(
                "OpenAI API error ({}): {}",
                status, error_text
            )));
        }

        let mut result: OpenAiEmbeddingResponse = response
            .json()
            .await
            .map_err(|e| TrainerError::Embedding(format!("Parse error: {}", e)))?;

        if result.data.len() != texts.len() {
            return Err(TrainerError::Embedding(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                result.data.len()
            )));
        }

        result.data.sort_by_key(|d| d.index);
        Ok(result.data.into_iter().map(|d| d.embedding).collect())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
