use std::sync::Arc;

use log::debug;
use thiserror::Error;

use crate::embedding::{Embedder, EmbeddingError};
use crate::index::{IndexError, VectorIndex};
use crate::indexer::IndexerError;
use crate::semantic_layer::SchemaMetadataDocument;

/// Candidates considered when picking the table.
pub const TABLE_SEARCH_K: usize = 5;
/// Columns handed to the synthesizer.
pub const COLUMN_SEARCH_K: usize = 15;

#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("The question is empty")]
    EmptyQuestion,
    #[error("The metadata index is empty")]
    EmptyIndex,
    #[error("No table matches the question")]
    NoMatchingTable,
    #[error("Failed to embed the question: {0}")]
    Embedding(#[from] EmbeddingError),
    #[error("Index search failed: {0}")]
    Index(#[from] IndexError),
    #[error("Metadata index is unavailable: {0}")]
    IndexUnavailable(#[from] IndexerError),
}

/// The table chosen for a question and the columns the model may use.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedContext {
    pub table_name: String,
    pub columns: Vec<SchemaMetadataDocument>,
}

impl RetrievedContext {
    /// Column listing embedded in the prompt.
    pub fn context_block(&self) -> String {
        self.columns.iter().map(format_column_context).collect()
    }
}

pub fn format_column_context(doc: &SchemaMetadataDocument) -> String {
    format!(
        "Field: {}\n  Title: {}\n  Description: {}\n  Type: {} ({})\n  Table: {}\n\n",
        doc.qualified_name(),
        doc.column_title,
        doc.column_description.as_deref().unwrap_or("No description"),
        doc.column_member_type,
        doc.column_data_type,
        doc.table_name
    )
}

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }

    pub async fn retrieve(
        &self,
        question: &str,
        index: &VectorIndex,
    ) -> Result<RetrievedContext, RetrievalError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RetrievalError::EmptyQuestion);
        }
        if index.is_empty() {
            return Err(RetrievalError::EmptyIndex);
        }

        let query_vector = self.embedder.embed_query(question).await?;
        let hits = index.search(&query_vector, TABLE_SEARCH_K)?;
        let table_name = hits
            .first()
            .map(|hit| hit.document.table_name.clone())
            .ok_or(RetrievalError::NoMatchingTable)?;
        debug!(
            "Selected table {} from {} candidates (best score {:.3})",
            table_name,
            hits.len(),
            hits[0].score
        );

        let column_query = format!("All columns in {table_name}");
        let column_vector = self.embedder.embed_query(&column_query).await?;
        let columns: Vec<SchemaMetadataDocument> = index
            .search_table(&column_vector, COLUMN_SEARCH_K, &table_name)?
            .into_iter()
            .map(|hit| hit.document.clone())
            .collect();
        debug!("Retrieved {} columns of {}", columns.len(), table_name);

        Ok(RetrievedContext {
            table_name,
            columns,
        })
    }
}
