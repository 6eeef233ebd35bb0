//! Embedding service seam.
//!
//! The pipeline only needs "text in, vector out". [`OpenAiEmbedder`] speaks the
//! OpenAI-compatible `/embeddings` API, which most hosted and local providers accept.

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::EmbeddingConfig;
use crate::http::{error_body, RetryPolicy};

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Embedding request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Embedding API returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Invalid embedding response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait Embedder: Send + Sync {
    /// One vector per input text, in input order.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_documents(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::InvalidResponse("empty embedding response".to_string()))
    }

    fn model_name(&self) -> &str;
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

pub struct OpenAiEmbedder {
    client: Client,
    retry: RetryPolicy,
    endpoint: String,
    api_key: String,
    model: String,
    batch_size: usize,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig, client: Client, retry: RetryPolicy) -> Self {
        Self {
            client,
            retry,
            endpoint: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model_name.clone(),
            batch_size: config.batch_size.max(1),
        }
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: batch,
        };
        let response = self
            .retry
            .send(|| {
                self.client
                    .post(&self.endpoint)
                    .bearer_auth(&self.api_key)
                    .json(&request)
            })
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = error_body(response).await;
            return Err(EmbeddingError::Status { status, body });
        }

        let result: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;
        reorder(result.data, batch.len())
    }
}

/// Places each vector at its `index`, rejecting gaps, duplicates and out-of-range entries.
fn reorder(data: Vec<EmbeddingData>, expected_len: usize) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    if data.len() != expected_len {
        return Err(EmbeddingError::InvalidResponse(format!(
            "expected {} embeddings, got {}",
            expected_len,
            data.len()
        )));
    }
    let mut ordered: Vec<Option<Vec<f32>>> = vec![None; expected_len];
    for item in data {
        let slot = ordered.get_mut(item.index).ok_or_else(|| {
            EmbeddingError::InvalidResponse(format!("index {} out of range", item.index))
        })?;
        if slot.replace(item.embedding).is_some() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "duplicate index {}",
                item.index
            )));
        }
    }
    // Lengths match and indices are unique and in range, so every slot is filled.
    Ok(ordered.into_iter().flatten().collect())
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            debug!("Embedding batch of {} texts with {}", batch.len(), self.model);
            vectors.extend(self.embed_batch(batch).await?);
        }
        Ok(vectors)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
