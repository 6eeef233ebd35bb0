pub mod cube;

pub use cube::CubeClient;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::auth::AuthError;
use crate::query::QuerySpecification;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberType {
    Measure,
    Dimension,
    Segment,
}

impl fmt::Display for MemberType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MemberType::Measure => "measure",
            MemberType::Dimension => "dimension",
            MemberType::Segment => "segment",
        };
        f.write_str(name)
    }
}

/// One column (measure, dimension or segment) of the semantic layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaMetadataDocument {
    pub table_name: String,
    pub column_name: String,
    pub column_title: String,
    #[serde(default)]
    pub column_description: Option<String>,
    pub column_member_type: MemberType,
    pub column_data_type: String,
}

impl SchemaMetadataDocument {
    /// `Table.field`, regardless of whether the engine reported the column qualified.
    pub fn qualified_name(&self) -> String {
        if self.is_qualified() {
            self.column_name.clone()
        } else {
            format!("{}.{}", self.table_name, self.column_name)
        }
    }

    fn is_qualified(&self) -> bool {
        self.column_name
            .strip_prefix(self.table_name.as_str())
            .is_some_and(|rest| rest.starts_with('.'))
    }
}

/// Rows returned by the analytics engine. Zero rows is a valid outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsResult {
    pub rows: Vec<Map<String, Value>>,
}

impl AnalyticsResult {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Error, Debug)]
pub enum SemanticLayerError {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Request to analytics API failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Analytics API returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Invalid response from analytics API: {0}")]
    InvalidResponse(String),

    #[error("Query still processing after {0} attempts")]
    StillProcessing(u32),
}

/// Analytics engine exposing schema metadata and query execution.
#[async_trait]
pub trait SemanticLayer: Send + Sync {
    /// Every measure, dimension and segment of every table.
    async fn fetch_metadata(&self) -> Result<Vec<SchemaMetadataDocument>, SemanticLayerError>;

    async fn load(&self, query: &QuerySpecification)
        -> Result<AnalyticsResult, SemanticLayerError>;
}
