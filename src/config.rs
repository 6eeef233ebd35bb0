use std::time::Duration;

use envconfig::Envconfig;
use log::{debug, warn};
use reqwest::Url;
use thiserror::Error;

/// Shared secret shipped with the local analytics engine. Never use it outside development.
pub const INSECURE_DEFAULT_SECRET: &str = "simple-secret";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Env var error: {0}")]
    Env(#[from] envconfig::Error),

    #[error("Invalid URL in {name}: {value} ({reason})")]
    InvalidUrl {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

fn check_url(name: &'static str, value: &str) -> Result<(), ConfigError> {
    Url::parse(value).map(|_| ()).map_err(|e| ConfigError::InvalidUrl {
        name,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn check_positive(name: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            name,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}

#[derive(Envconfig, Clone, Debug)]
pub struct CubeConfig {
    #[envconfig(from = "CUBE_API_URL", default = "http://localhost:4000/cubejs-api/v1")]
    pub api_url: String,

    #[envconfig(from = "CUBE_API_SECRET", default = "simple-secret")]
    pub api_secret: String,

    /// Lifetime of minted bearer tokens. Zero mints tokens without `iat`/`exp` claims.
    #[envconfig(from = "CUBE_TOKEN_TTL_SECS", default = "300")]
    pub token_ttl_secs: u64,

    /// Polls allowed while the engine answers a load with "Continue wait".
    #[envconfig(from = "CUBE_CONTINUE_WAIT_ATTEMPTS", default = "10")]
    pub continue_wait_attempts: u32,
}

impl CubeConfig {
    pub fn new() -> Result<Self, ConfigError> {
        let config = Self::init_from_env()?;
        config.validate()?;
        debug!(
            "CubeConfig loaded: api_url={}, token_ttl_secs={}",
            config.api_url, config.token_ttl_secs
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_url("CUBE_API_URL", &self.api_url)?;
        if self.api_secret.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "CUBE_API_SECRET",
                reason: "must not be empty".to_string(),
            });
        }
        if self.api_secret == INSECURE_DEFAULT_SECRET {
            warn!("CUBE_API_SECRET is the insecure default, override it outside local development");
        }
        Ok(())
    }

    /// Base URL without a trailing slash, ready for `{base}/meta` and `{base}/load`.
    pub fn base_url(&self) -> &str {
        self.api_url.trim_end_matches('/')
    }

    pub fn token_ttl(&self) -> Option<Duration> {
        (self.token_ttl_secs > 0).then(|| Duration::from_secs(self.token_ttl_secs))
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct LlmConfig {
    #[envconfig(from = "OPENAI_API_KEY")]
    pub api_key: String,

    #[envconfig(from = "OPENAI_BASE_URL", default = "https://api.openai.com/v1")]
    pub base_url: String,

    #[envconfig(from = "MODEL_NAME", default = "gpt-3.5-turbo")]
    pub model_name: String,

    #[envconfig(from = "TEMPERATURE", default = "0.1")]
    pub temperature: f32,

    /// Limit injected into synthesized queries that do not carry one.
    #[envconfig(from = "MAX_RESULTS", default = "100")]
    pub max_results: u64,
}

impl LlmConfig {
    pub fn new() -> Result<Self, ConfigError> {
        let config = Self::init_from_env()?;
        config.validate()?;
        debug!(
            "LlmConfig loaded: base_url={}, model_name={}, temperature={}, max_results={}",
            config.base_url, config.model_name, config.temperature, config.max_results
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_url("OPENAI_BASE_URL", &self.base_url)?;
        if self.model_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "MODEL_NAME",
                reason: "must not be empty".to_string(),
            });
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidValue {
                name: "TEMPERATURE",
                reason: format!("{} is outside 0.0..=2.0", self.temperature),
            });
        }
        check_positive("MAX_RESULTS", self.max_results)
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct EmbeddingConfig {
    #[envconfig(from = "OPENAI_API_KEY")]
    pub api_key: String,

    #[envconfig(from = "OPENAI_BASE_URL", default = "https://api.openai.com/v1")]
    pub base_url: String,

    #[envconfig(from = "EMBEDDING_MODEL", default = "text-embedding-3-small")]
    pub model_name: String,

    #[envconfig(from = "EMBEDDING_BATCH_SIZE", default = "64")]
    pub batch_size: usize,
}

impl EmbeddingConfig {
    pub fn new() -> Result<Self, ConfigError> {
        let config = Self::init_from_env()?;
        config.validate()?;
        debug!(
            "EmbeddingConfig loaded: base_url={}, model_name={}, batch_size={}",
            config.base_url, config.model_name, config.batch_size
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_url("OPENAI_BASE_URL", &self.base_url)?;
        check_positive("EMBEDDING_BATCH_SIZE", self.batch_size as u64)
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct IndexConfig {
    #[envconfig(from = "VECTORSTORE_PATH", default = "vectorstore.json")]
    pub path: String,
}

impl IndexConfig {
    pub fn new() -> Result<Self, ConfigError> {
        let config = Self::init_from_env()?;
        debug!("IndexConfig loaded: path={}", config.path);
        Ok(config)
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct S3Config {
    #[envconfig(from = "TENANT")]
    pub tenant: String,

    #[envconfig(from = "S3_BUCKET_NAME")]
    pub bucket_name: String,

    #[envconfig(from = "INDEX_OBJECT_NAME", default = "vectorstore.json")]
    pub object_name: String,
}

impl S3Config {
    pub fn new() -> Result<Self, ConfigError> {
        let config = Self::init_from_env()?;
        debug!(
            "S3Config loaded: tenant={}, bucket_name={}, object_name={}",
            config.tenant, config.bucket_name, config.object_name
        );
        Ok(config)
    }

    pub fn object_key(&self) -> String {
        format!("{}/{}", self.tenant, self.object_name)
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct HttpConfig {
    #[envconfig(from = "HTTP_TIMEOUT_SECS", default = "30")]
    pub timeout_secs: u64,

    #[envconfig(from = "HTTP_CONNECT_TIMEOUT_SECS", default = "10")]
    pub connect_timeout_secs: u64,

    #[envconfig(from = "HTTP_MAX_ATTEMPTS", default = "3")]
    pub max_attempts: u32,

    #[envconfig(from = "HTTP_INITIAL_BACKOFF_MS", default = "250")]
    pub initial_backoff_ms: u64,

    #[envconfig(from = "HTTP_MAX_BACKOFF_MS", default = "4000")]
    pub max_backoff_ms: u64,
}

impl HttpConfig {
    pub fn new() -> Result<Self, ConfigError> {
        let config = Self::init_from_env()?;
        config.validate()?;
        debug!(
            "HttpConfig loaded: timeout_secs={}, connect_timeout_secs={}, max_attempts={}",
            config.timeout_secs, config.connect_timeout_secs, config.max_attempts
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_positive("HTTP_TIMEOUT_SECS", self.timeout_secs)?;
        check_positive("HTTP_CONNECT_TIMEOUT_SECS", self.connect_timeout_secs)?;
        check_positive("HTTP_MAX_ATTEMPTS", u64::from(self.max_attempts))
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            connect_timeout_secs: 10,
            max_attempts: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 4000,
        }
    }
}
