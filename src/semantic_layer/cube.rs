use async_trait::async_trait;
use log::{debug, info};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{AnalyticsResult, MemberType, SemanticLayer, SemanticLayerError, SchemaMetadataDocument};
use crate::auth::TokenSigner;
use crate::config::CubeConfig;
use crate::http::{error_body, RetryPolicy};
use crate::query::QuerySpecification;

/// Body the engine returns while a query is still being computed.
const CONTINUE_WAIT: &str = "Continue wait";

#[derive(Debug, Deserialize)]
struct MetaResponse {
    #[serde(default)]
    cubes: Vec<CubeMeta>,
}

#[derive(Debug, Deserialize)]
struct CubeMeta {
    name: String,
    #[serde(default)]
    measures: Vec<MemberMeta>,
    #[serde(default)]
    dimensions: Vec<MemberMeta>,
    #[serde(default)]
    segments: Vec<MemberMeta>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MemberMeta {
    name: String,
    title: Option<String>,
    short_title: Option<String>,
    description: Option<String>,
    #[serde(rename = "type")]
    data_type: Option<String>,
}

impl MemberMeta {
    fn into_document(self, table_name: &str, member_type: MemberType) -> SchemaMetadataDocument {
        let column_title = self
            .title
            .or(self.short_title)
            .unwrap_or_else(|| short_name(&self.name).to_string());
        let column_data_type = self.data_type.unwrap_or_else(|| match member_type {
            MemberType::Segment => "boolean".to_string(),
            _ => "unknown".to_string(),
        });
        SchemaMetadataDocument {
            table_name: table_name.to_string(),
            column_name: self.name,
            column_title,
            column_description: self.description.filter(|d| !d.trim().is_empty()),
            column_member_type: member_type,
            column_data_type,
        }
    }
}

fn short_name(member: &str) -> &str {
    member.rsplit_once('.').map_or(member, |(_, field)| field)
}

#[derive(Serialize)]
struct LoadRequest<'a> {
    query: &'a QuerySpecification,
}

#[derive(Debug, Deserialize)]
struct LoadResponse {
    #[serde(default)]
    data: Option<Vec<Map<String, Value>>>,
    #[serde(default)]
    error: Option<Value>,
}

fn error_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Extracts the `error` message the engine puts in failed response bodies.
fn upstream_message(body: &str) -> String {
    serde_json::from_str::<LoadResponse>(body)
        .ok()
        .and_then(|r| r.error)
        .map(|e| error_text(&e))
        .unwrap_or_else(|| body.to_string())
}

/// Client for the Cube REST API (`/meta` and `/load`).
pub struct CubeClient {
    config: CubeConfig,
    signer: TokenSigner,
    http: Client,
    retry: RetryPolicy,
}

impl CubeClient {
    pub fn new(
        config: CubeConfig,
        http: Client,
        retry: RetryPolicy,
    ) -> Result<Self, SemanticLayerError> {
        let signer = TokenSigner::from_config(&config)?;
        Ok(Self {
            config,
            signer,
            http,
            retry,
        })
    }

    async fn check_status(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, SemanticLayerError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = error_body(response).await;
        Err(SemanticLayerError::Status {
            status: status.as_u16(),
            message: upstream_message(&body),
        })
    }
}

#[async_trait]
impl SemanticLayer for CubeClient {
    async fn fetch_metadata(&self) -> Result<Vec<SchemaMetadataDocument>, SemanticLayerError> {
        let url = format!("{}/meta", self.config.base_url());
        let token = self.signer.mint()?;
        debug!("Fetching metadata from {}", url);

        let response = self
            .retry
            .send(|| self.http.get(&url).bearer_auth(&token))
            .await?;
        let meta: MetaResponse = Self::check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| SemanticLayerError::InvalidResponse(e.to_string()))?;

        let cube_count = meta.cubes.len();
        let mut documents = Vec::new();
        for cube in meta.cubes {
            let table = cube.name;
            let members = cube
                .measures
                .into_iter()
                .map(|m| (m, MemberType::Measure))
                .chain(cube.dimensions.into_iter().map(|d| (d, MemberType::Dimension)))
                .chain(cube.segments.into_iter().map(|s| (s, MemberType::Segment)));
            documents.extend(members.map(|(member, kind)| member.into_document(&table, kind)));
        }

        info!(
            "Fetched {} columns across {} tables",
            documents.len(),
            cube_count
        );
        Ok(documents)
    }

    async fn load(
        &self,
        query: &QuerySpecification,
    ) -> Result<AnalyticsResult, SemanticLayerError> {
        let url = format!("{}/load", self.config.base_url());
        let body = LoadRequest { query };
        let max_polls = self.config.continue_wait_attempts.max(1);

        let mut poll = 1;
        loop {
            let token = self.signer.mint()?;
            let response = self
                .retry
                .send(|| self.http.post(&url).bearer_auth(&token).json(&body))
                .await?;
            let status = response.status();
            let parsed: LoadResponse = Self::check_status(response)
                .await?
                .json()
                .await
                .map_err(|e| SemanticLayerError::InvalidResponse(e.to_string()))?;

            match parsed.error {
                Some(Value::String(ref e)) if e == CONTINUE_WAIT => {
                    if poll >= max_polls {
                        return Err(SemanticLayerError::StillProcessing(poll));
                    }
                    debug!("Query still processing, poll {}/{}", poll, max_polls);
                    tokio::time::sleep(self.retry.backoff_for_attempt(poll)).await;
                    poll += 1;
                }
                Some(e) => {
                    return Err(SemanticLayerError::Status {
                        status: status.as_u16(),
                        message: error_text(&e),
                    })
                }
                None => {
                    let rows = parsed.data.unwrap_or_default();
                    debug!("Query returned {} rows", rows.len());
                    return Ok(AnalyticsResult { rows });
                }
            }
        }
    }
}
