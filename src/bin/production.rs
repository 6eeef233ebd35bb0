use clap::Parser;
use log::error;
use std::process;
use std::sync::Arc;

use analytics_chatbot::{
    cli::{self, Args},
    config::{CubeConfig, EmbeddingConfig, HttpConfig, LlmConfig, S3Config},
    index::S3IndexStore,
    Pipeline,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let cube_config = CubeConfig::new().map_err(|e| {
        error!("Failed to initialize Cube config: {}", e);
        e
    })?;

    let llm_config = LlmConfig::new().map_err(|e| {
        error!("Failed to initialize LLM config: {}", e);
        e
    })?;

    let embedding_config = EmbeddingConfig::new().map_err(|e| {
        error!("Failed to initialize embedding config: {}", e);
        e
    })?;

    let http_config = HttpConfig::new().map_err(|e| {
        error!("Failed to initialize HTTP config: {}", e);
        e
    })?;

    let s3_config = S3Config::new().map_err(|e| {
        error!("Failed to initialize S3 config: {}", e);
        e
    })?;

    let store = S3IndexStore::new(s3_config).await;

    let pipeline = Pipeline::from_config(
        cube_config,
        &llm_config,
        &embedding_config,
        &http_config,
        Arc::new(store),
    )
    .map_err(|e| {
        error!("Failed to create pipeline: {}", e);
        e
    })?;

    if let Err(e) = cli::run(&pipeline, &args).await {
        error!("{} failed: {}", e.stage(), e);
        process::exit(1);
    }

    Ok(())
}
