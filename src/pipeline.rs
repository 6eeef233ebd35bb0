//! Question in, rows out.
//!
//! Stages run strictly in order: index, retrieval, synthesis, execution. The
//! first failure ends the attempt and nothing partial is returned.

use std::num::NonZeroU64;
use std::sync::Arc;

use log::{debug, info};
use thiserror::Error;

use crate::config::{ConfigError, CubeConfig, EmbeddingConfig, HttpConfig, LlmConfig};
use crate::embedding::{Embedder, OpenAiEmbedder};
use crate::executor::{ExecutionError, QueryExecutor};
use crate::http::{build_client, RetryPolicy};
use crate::index::IndexStore;
use crate::indexer::{IndexManager, IndexerError, MetadataIndexer};
use crate::llm::{LanguageModel, OpenAiChatModel};
use crate::query::QuerySpecification;
use crate::retrieval::{RetrievalError, Retriever};
use crate::semantic_layer::{AnalyticsResult, CubeClient, SemanticLayer};
use crate::synthesizer::{QuerySynthesizer, SynthesisError};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),
    #[error("Could not rebuild the metadata index: {0}")]
    Indexing(#[from] IndexerError),
    #[error("Could not find relevant data: {0}")]
    Retrieval(#[from] RetrievalError),
    #[error("Could not generate a query: {0}")]
    Synthesis(#[from] SynthesisError),
    #[error("Could not run the query: {0}")]
    Execution(#[from] ExecutionError),
}

impl PipelineError {
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Configuration(_) => "configuration",
            PipelineError::Indexing(_) => "indexing",
            PipelineError::Retrieval(_) => "retrieval",
            PipelineError::Synthesis(_) => "synthesis",
            PipelineError::Execution(_) => "execution",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub default_limit: NonZeroU64,
}

impl PipelineSettings {
    pub fn from_config(config: &LlmConfig) -> Result<Self, ConfigError> {
        let default_limit =
            NonZeroU64::new(config.max_results).ok_or_else(|| ConfigError::InvalidValue {
                name: "MAX_RESULTS",
                reason: "must be greater than zero".to_string(),
            })?;
        Ok(Self { default_limit })
    }
}

/// Successful outcome of one question.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub table_name: String,
    pub query: QuerySpecification,
    pub result: AnalyticsResult,
}

pub struct Pipeline {
    index: IndexManager,
    retriever: Retriever,
    synthesizer: QuerySynthesizer,
    executor: QueryExecutor,
}

impl Pipeline {
    pub fn new(
        layer: Arc<dyn SemanticLayer>,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn LanguageModel>,
        store: Arc<dyn IndexStore>,
        settings: PipelineSettings,
    ) -> Self {
        let indexer = MetadataIndexer::new(Arc::clone(&layer), Arc::clone(&embedder), store);
        Self {
            index: IndexManager::new(indexer),
            retriever: Retriever::new(embedder),
            synthesizer: QuerySynthesizer::new(model, settings.default_limit),
            executor: QueryExecutor::new(layer),
        }
    }

    /// Wires the Cube and OpenAI-compatible clients over one shared HTTP client.
    pub fn from_config(
        cube: CubeConfig,
        llm: &LlmConfig,
        embedding: &EmbeddingConfig,
        http: &HttpConfig,
        store: Arc<dyn IndexStore>,
    ) -> Result<Self, PipelineError> {
        let client = build_client(http)?;
        let retry = RetryPolicy::from_config(http);
        let settings = PipelineSettings::from_config(llm)?;

        let layer = CubeClient::new(cube, client.clone(), retry.clone()).map_err(|e| {
            ConfigError::InvalidValue {
                name: "CUBE_API_SECRET",
                reason: e.to_string(),
            }
        })?;
        let embedder = OpenAiEmbedder::new(embedding, client.clone(), retry.clone());
        let model = OpenAiChatModel::new(llm, client, retry);

        Ok(Self::new(
            Arc::new(layer),
            Arc::new(embedder),
            Arc::new(model),
            store,
            settings,
        ))
    }

    pub async fn ask(&self, question: &str) -> Result<Answer, PipelineError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RetrievalError::EmptyQuestion.into());
        }
        debug!("Answering question: {}", question);

        let index = self
            .index
            .ensure_loaded()
            .await
            .map_err(RetrievalError::IndexUnavailable)?;
        let context = self.retriever.retrieve(question, &index).await?;
        let query = self.synthesizer.synthesize(question, &context).await?;
        let result = self.executor.execute(&query).await?;

        info!(
            "Answered question against {} with {} rows",
            context.table_name,
            result.len()
        );
        Ok(Answer {
            table_name: context.table_name,
            query,
            result,
        })
    }

    /// Rebuilds the index from fresh metadata and returns the number of indexed columns.
    pub async fn reload_metadata(&self) -> Result<usize, PipelineError> {
        let index = self.index.rebuild().await?;
        Ok(index.len())
    }
}
