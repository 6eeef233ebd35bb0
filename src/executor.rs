use std::sync::Arc;

use log::info;
use thiserror::Error;

use crate::query::QuerySpecification;
use crate::semantic_layer::{AnalyticsResult, SemanticLayer, SemanticLayerError};

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Analytics engine rejected the query ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("Failed to execute query: {0}")]
    SemanticLayer(SemanticLayerError),
}

impl From<SemanticLayerError> for ExecutionError {
    fn from(err: SemanticLayerError) -> Self {
        match err {
            SemanticLayerError::Status { status, message } => {
                ExecutionError::Rejected { status, message }
            }
            other => ExecutionError::SemanticLayer(other),
        }
    }
}

/// Submits validated queries to the analytics engine.
pub struct QueryExecutor {
    layer: Arc<dyn SemanticLayer>,
}

impl QueryExecutor {
    pub fn new(layer: Arc<dyn SemanticLayer>) -> Self {
        Self { layer }
    }

    pub async fn execute(
        &self,
        query: &QuerySpecification,
    ) -> Result<AnalyticsResult, ExecutionError> {
        let result = self.layer.load(query).await?;
        info!(
            "Query returned {} rows (measures={:?}, dimensions={:?}, limit={})",
            result.len(),
            query.measures,
            query.dimensions,
            query.limit
        );
        Ok(result)
    }
}
