use std::time::Duration;

use log::warn;
use reqwest::{Client, RequestBuilder, Response, StatusCode};

use crate::config::{ConfigError, HttpConfig};

pub fn build_client(config: &HttpConfig) -> Result<Client, ConfigError> {
    Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .build()
        .map_err(|e| ConfigError::HttpClient(e.to_string()))
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &HttpConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms.max(1)),
            max_backoff: Duration::from_millis(
                config.max_backoff_ms.max(config.initial_backoff_ms),
            ),
        }
    }

    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        // attempt is 1-based; attempt=1 => initial backoff.
        let shift = attempt.saturating_sub(1).min(16);
        let backoff = self.initial_backoff.saturating_mul(1u32 << shift);
        backoff.min(self.max_backoff)
    }

    /// Sends the request built by `make_request`, re-sending it on timeouts,
    /// connection failures, 429 and 5xx until the attempt budget is spent.
    pub async fn send<F>(&self, mut make_request: F) -> Result<Response, reqwest::Error>
    where
        F: FnMut() -> RequestBuilder,
    {
        let mut attempt = 1;
        loop {
            match make_request().send().await {
                Ok(response)
                    if is_retryable_status(response.status()) && attempt < self.max_attempts =>
                {
                    warn!(
                        "Attempt {}/{} to {} returned {}, retrying",
                        attempt,
                        self.max_attempts,
                        response.url(),
                        response.status()
                    );
                }
                Ok(response) => return Ok(response),
                Err(e) if is_retryable_error(&e) && attempt < self.max_attempts => {
                    warn!(
                        "Attempt {}/{} failed: {}, retrying",
                        attempt, self.max_attempts, e
                    );
                }
                Err(e) => return Err(e),
            }
            tokio::time::sleep(self.backoff_for_attempt(attempt)).await;
            attempt += 1;
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect()
}

/// Reads a failed response body for error reporting, keeping it short.
pub async fn error_body(response: Response) -> String {
    let body = response.text().await.unwrap_or_default();
    const MAX_LEN: usize = 512;
    if body.len() > MAX_LEN {
        let mut end = MAX_LEN;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &body[..end])
    } else {
        body
    }
}
