pub mod local_store;
pub mod s3_store;
pub mod store;

pub use local_store::LocalIndexStore;
pub use s3_store::S3IndexStore;
pub use store::{IndexStore, IndexStoreError};

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::semantic_layer::SchemaMetadataDocument;

/// Bumped whenever the persisted layout changes.
pub const INDEX_FORMAT_VERSION: u32 = 1;

#[derive(Error, Debug, PartialEq)]
pub enum IndexError {
    #[error("Embedding for {column} has {actual} dimensions, expected {expected}")]
    InconsistentDimension {
        column: String,
        expected: usize,
        actual: usize,
    },
    #[error("Embedding for {0} contains non-finite values")]
    NonFinite(String),
    #[error("Query vector has {actual} dimensions, index has {expected}")]
    QueryDimension { expected: usize, actual: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedDocument {
    pub document: SchemaMetadataDocument,
    pub text: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredDocument<'a> {
    pub document: &'a SchemaMetadataDocument,
    pub score: f32,
}

/// Embedded schema documents supporting exact cosine k-NN search.
///
/// Built wholesale by the indexer and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorIndex {
    format_version: u32,
    embedding_model: String,
    dimension: usize,
    entries: Vec<IndexedDocument>,
}

impl VectorIndex {
    pub fn new(
        embedding_model: impl Into<String>,
        entries: Vec<IndexedDocument>,
    ) -> Result<Self, IndexError> {
        let index = Self {
            format_version: INDEX_FORMAT_VERSION,
            embedding_model: embedding_model.into(),
            dimension: entries.first().map_or(0, |e| e.embedding.len()),
            entries,
        };
        index.validate()?;
        Ok(index)
    }

    /// Every embedding must be finite and have exactly `dimension` components.
    pub fn validate(&self) -> Result<(), IndexError> {
        for entry in &self.entries {
            if entry.embedding.len() != self.dimension {
                return Err(IndexError::InconsistentDimension {
                    column: entry.document.qualified_name(),
                    expected: self.dimension,
                    actual: entry.embedding.len(),
                });
            }
            if entry.embedding.iter().any(|v| !v.is_finite()) {
                return Err(IndexError::NonFinite(entry.document.qualified_name()));
            }
        }
        Ok(())
    }

    pub fn format_version(&self) -> u32 {
        self.format_version
    }

    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn tables(&self) -> BTreeSet<&str> {
        self.entries
            .iter()
            .map(|e| e.document.table_name.as_str())
            .collect()
    }

    /// The `k` documents closest to `query`, most similar first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredDocument<'_>>, IndexError> {
        self.search_where(query, k, |_| true)
    }

    /// Like [`search`](Self::search), restricted to documents of `table_name`.
    pub fn search_table(
        &self,
        query: &[f32],
        k: usize,
        table_name: &str,
    ) -> Result<Vec<ScoredDocument<'_>>, IndexError> {
        self.search_where(query, k, |doc| doc.table_name == table_name)
    }

    fn search_where<F>(
        &self,
        query: &[f32],
        k: usize,
        predicate: F,
    ) -> Result<Vec<ScoredDocument<'_>>, IndexError>
    where
        F: Fn(&SchemaMetadataDocument) -> bool,
    {
        if !self.entries.is_empty() && query.len() != self.dimension {
            return Err(IndexError::QueryDimension {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let mut scored: Vec<ScoredDocument<'_>> = self
            .entries
            .iter()
            .filter(|e| predicate(&e.document))
            .map(|e| ScoredDocument {
                document: &e.document,
                score: cosine_similarity(query, &e.embedding),
            })
            .collect();
        // sort_by is stable: equal scores keep index order.
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        Ok(scored)
    }
}

/// Cosine similarity in `[-1, 1]`; zero when either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f64::EPSILON {
        return 0.0;
    }
    (dot / denom) as f32
}
