//! In-process stand-ins for the external services.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::embedding::{Embedder, EmbeddingError};
use crate::index::{IndexStore, IndexStoreError, VectorIndex};
use crate::llm::{LanguageModel, LlmError};
use crate::query::QuerySpecification;
use crate::semantic_layer::{
    AnalyticsResult, MemberType, SchemaMetadataDocument, SemanticLayer, SemanticLayerError,
};

pub fn column(
    table: &str,
    field: &str,
    kind: MemberType,
    data_type: &str,
) -> SchemaMetadataDocument {
    SchemaMetadataDocument {
        table_name: table.to_string(),
        column_name: format!("{table}.{field}"),
        column_title: field.to_string(),
        column_description: None,
        column_member_type: kind,
        column_data_type: data_type.to_string(),
    }
}

/// Serves a fixed column list and canned rows, recording every query it receives.
pub struct StaticSemanticLayer {
    columns: Mutex<Vec<SchemaMetadataDocument>>,
    rows: Vec<Map<String, Value>>,
    load_error: Option<(u16, String)>,
    metadata_calls: AtomicUsize,
    loaded: Mutex<Vec<QuerySpecification>>,
}

impl StaticSemanticLayer {
    pub fn new(columns: Vec<SchemaMetadataDocument>) -> Self {
        Self {
            columns: Mutex::new(columns),
            rows: Vec::new(),
            load_error: None,
            metadata_calls: AtomicUsize::new(0),
            loaded: Mutex::new(Vec::new()),
        }
    }

    pub fn with_rows(mut self, rows: Vec<Map<String, Value>>) -> Self {
        self.rows = rows;
        self
    }

    pub fn with_load_error(mut self, status: u16, message: &str) -> Self {
        self.load_error = Some((status, message.to_string()));
        self
    }

    pub fn replace_columns(&self, columns: Vec<SchemaMetadataDocument>) {
        *self.columns.lock().unwrap() = columns;
    }

    pub fn metadata_calls(&self) -> usize {
        self.metadata_calls.load(Ordering::SeqCst)
    }

    pub fn load_calls(&self) -> usize {
        self.loaded.lock().unwrap().len()
    }

    pub fn loaded_queries(&self) -> Vec<QuerySpecification> {
        self.loaded.lock().unwrap().clone()
    }
}

#[async_trait]
impl SemanticLayer for StaticSemanticLayer {
    async fn fetch_metadata(&self) -> Result<Vec<SchemaMetadataDocument>, SemanticLayerError> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.columns.lock().unwrap().clone())
    }

    async fn load(
        &self,
        query: &QuerySpecification,
    ) -> Result<AnalyticsResult, SemanticLayerError> {
        self.loaded.lock().unwrap().push(query.clone());
        if let Some((status, message)) = &self.load_error {
            return Err(SemanticLayerError::Status {
                status: *status,
                message: message.clone(),
            });
        }
        Ok(AnalyticsResult {
            rows: self.rows.clone(),
        })
    }
}

const KEYWORD_DIMENSION: usize = 256;

/// Bag-of-words embedder: every distinct lowercase word gets its own axis.
///
/// Words are assigned axes in first-seen order, so one instance must embed both
/// the documents and the queries.
#[derive(Default)]
pub struct KeywordEmbedder {
    vocabulary: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl KeywordEmbedder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vocabulary = self.vocabulary.lock().unwrap();
        let mut vector = vec![0.0; KEYWORD_DIMENSION];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
        {
            let slot = match vocabulary.iter().position(|known| *known == word) {
                Some(slot) => slot,
                None => {
                    vocabulary.push(word);
                    vocabulary.len() - 1
                }
            };
            vector[slot % KEYWORD_DIMENSION] += 1.0;
        }
        vector
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.embed(t)).collect())
    }

    fn model_name(&self) -> &str {
        "keyword-test"
    }
}

pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed_documents(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Err(EmbeddingError::Status {
            status: 503,
            body: "embedding service unavailable".to_string(),
        })
    }

    fn model_name(&self) -> &str {
        "keyword-test"
    }
}

/// Answers with the first rule whose needle occurs in the prompt, else the fallback.
pub struct ScriptedModel {
    rules: Vec<(String, String)>,
    fallback: Option<String>,
    calls: AtomicUsize,
    last_prompt: Mutex<Option<String>>,
}

impl ScriptedModel {
    pub fn new(fallback: &str) -> Self {
        Self {
            rules: Vec::new(),
            fallback: Some(fallback.to_string()),
            calls: AtomicUsize::new(0),
            last_prompt: Mutex::new(None),
        }
    }

    /// Every unmatched prompt fails with a 500.
    pub fn failing() -> Self {
        Self {
            fallback: None,
            ..Self::new("")
        }
    }

    pub fn when_prompt_contains(mut self, needle: &str, response: &str) -> Self {
        self.rules.push((needle.to_string(), response.to_string()));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.last_prompt.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_prompt.lock().unwrap() = Some(prompt.to_string());
        self.rules
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, response)| response.clone())
            .or_else(|| self.fallback.clone())
            .ok_or_else(|| LlmError::Status {
                status: 500,
                body: "scripted failure".to_string(),
            })
    }
}

#[derive(Default)]
pub struct MemoryIndexStore {
    index: Mutex<Option<VectorIndex>>,
    saves: AtomicUsize,
}

impl MemoryIndexStore {
    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IndexStore for MemoryIndexStore {
    async fn load(&self) -> Result<Option<VectorIndex>, IndexStoreError> {
        Ok(self.index.lock().unwrap().clone())
    }

    async fn save(&self, index: &VectorIndex) -> Result<(), IndexStoreError> {
        *self.index.lock().unwrap() = Some(index.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}
