//! Turns a question plus retrieved columns into a validated [`QuerySpecification`].
//!
//! The model gets one attempt. Whatever it returns must be a bare JSON object
//! that deserializes strictly and only references the retrieved columns;
//! nothing is repaired or retried.

use std::num::NonZeroU64;
use std::sync::Arc;

use log::{debug, warn};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::llm::{LanguageModel, LlmError};
use crate::query::validate::{validate_members, MemberError};
use crate::query::QuerySpecification;
use crate::retrieval::RetrievedContext;

const PROMPT_TEMPLATE: &str = r#"You write Cube REST API queries that answer business questions about the {table_name} data model.

Columns you may use:
{columns}
Question: {question}

Reply with one JSON object shaped like this:
{
    "measures": ["{table_name}.measureName"],
    "dimensions": ["{table_name}.dimensionName"],
    "segments": ["{table_name}.segmentName"],
    "filters": [{"member": "{table_name}.fieldName", "operator": "equals", "values": ["value"]}],
    "timeDimensions": [{"dimension": "{table_name}.timeField", "dateRange": ["2024-01-01", "2024-12-31"], "granularity": "month"}],
    "order": {"{table_name}.fieldName": "desc"},
    "limit": 100
}

Rules:
- Reference only fields from the column list, written as Table.field.
- Put measures under "measures", dimensions under "dimensions" and segments under "segments".
- Add filters and time dimensions only when the question calls for them.
- Use a limit of 100 unless the question asks for a different number of rows.
- Output the JSON object alone. No explanation, no markdown, no code fences."#;

/// Fills the prompt template. Placeholders inside the values are left untouched.
pub fn render_prompt(question: &str, table_name: &str, columns: &str) -> String {
    let mut prompt = String::with_capacity(PROMPT_TEMPLATE.len() + columns.len() + question.len());
    let mut rest = PROMPT_TEMPLATE;
    while let Some(start) = rest.find('{') {
        prompt.push_str(&rest[..start]);
        let tail = &rest[start..];
        let (value, consumed) = if tail.starts_with("{table_name}") {
            (table_name, "{table_name}".len())
        } else if tail.starts_with("{columns}") {
            (columns, "{columns}".len())
        } else if tail.starts_with("{question}") {
            (question, "{question}".len())
        } else {
            ("{", 1)
        };
        prompt.push_str(value);
        rest = &tail[consumed..];
    }
    prompt.push_str(rest);
    prompt
}

#[derive(Error, Debug)]
pub enum SynthesisError {
    #[error("Language model call failed: {0}")]
    Model(#[from] LlmError),
    #[error("Language model returned an empty response")]
    EmptyResponse,
    #[error("Language model output is not valid JSON: {0}")]
    InvalidJson(serde_json::Error),
    #[error("Language model output is not a JSON object")]
    NotAnObject,
    #[error("Language model output is not a valid query: {0}")]
    Schema(serde_json::Error),
    #[error("Query references an invalid member: {0}")]
    Member(#[from] MemberError),
}

/// Adds `limit` unless some key already starts with `limit`.
///
/// Returns whether the limit was injected.
pub fn inject_default_limit(object: &mut Map<String, Value>, default_limit: NonZeroU64) -> bool {
    if object.keys().any(|key| key.starts_with("limit")) {
        return false;
    }
    object.insert("limit".to_string(), Value::from(default_limit.get()));
    true
}

pub fn parse_model_output(
    raw: &str,
    default_limit: NonZeroU64,
    context: &RetrievedContext,
) -> Result<QuerySpecification, SynthesisError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(SynthesisError::EmptyResponse);
    }

    let value: Value = serde_json::from_str(raw).map_err(SynthesisError::InvalidJson)?;
    let Value::Object(mut object) = value else {
        return Err(SynthesisError::NotAnObject);
    };
    if inject_default_limit(&mut object, default_limit) {
        debug!("Model output has no limit, using {}", default_limit);
    }

    let query: QuerySpecification =
        serde_json::from_value(Value::Object(object)).map_err(SynthesisError::Schema)?;
    validate_members(&query, &context.table_name, &context.columns)?;
    Ok(query)
}

pub struct QuerySynthesizer {
    model: Arc<dyn LanguageModel>,
    default_limit: NonZeroU64,
}

impl QuerySynthesizer {
    pub fn new(model: Arc<dyn LanguageModel>, default_limit: NonZeroU64) -> Self {
        Self {
            model,
            default_limit,
        }
    }

    pub async fn synthesize(
        &self,
        question: &str,
        context: &RetrievedContext,
    ) -> Result<QuerySpecification, SynthesisError> {
        let prompt = render_prompt(question, &context.table_name, &context.context_block());
        let raw = self.model.complete(&prompt).await?;
        parse_model_output(&raw, self.default_limit, context).map_err(|e| {
            warn!("Rejected model output for {}: {}", context.table_name, e);
            e
        })
    }
}
