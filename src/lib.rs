pub mod auth;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod executor;
pub mod http;
pub mod index;
pub mod indexer;
pub mod llm;
pub mod pipeline;
pub mod query;
pub mod retrieval;
pub mod semantic_layer;
pub mod synthesizer;

pub use pipeline::{Answer, Pipeline, PipelineError};

#[cfg(test)]
mod test_support;
