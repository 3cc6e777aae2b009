//! Configuration management

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::constants::{
    DEFAULT_BLOCKING_ENCODE_TIMEOUT_MS, DEFAULT_MAX_RETRIES, DEFAULT_MAX_TOKEN_REFRESH_ATTEMPTS,
    DEFAULT_NORMAL_QUEUE_CONCURRENCY, DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_UPLOAD_TIMEOUT_MS,
    DEFAULT_WAITER_TIMEOUT_MS,
};
use crate::errors::{ClientError, ClientResult};

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: Url,
    #[serde(skip_serializing)]
    pub api_key: String,
    /// Retries per operation after the initial attempt.
    pub max_retries: u32,
    pub waiter_timeout_ms: u64,
    pub blocking_encode_timeout_ms: u64,
    pub normal_queue_concurrency: usize,
    /// Token refreshes a logical request may start. Waiting on a refresh
    /// started by another request does not count.
    pub max_token_refresh_attempts: u32,
    pub request_timeout_ms: u64,
    pub upload_timeout_ms: u64,
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is not set
    pub filter: String,
    pub json: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            waiter_timeout_ms: DEFAULT_WAITER_TIMEOUT_MS,
            blocking_encode_timeout_ms: DEFAULT_BLOCKING_ENCODE_TIMEOUT_MS,
            normal_queue_concurrency: DEFAULT_NORMAL_QUEUE_CONCURRENCY,
            max_token_refresh_attempts: DEFAULT_MAX_TOKEN_REFRESH_ATTEMPTS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            upload_timeout_ms: DEFAULT_UPLOAD_TIMEOUT_MS,
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { filter: "info".to_string(), json: false }
    }
}

fn default_base_url() -> Url {
    // Literal is a valid absolute URL.
    Url::parse("https://chat.example.com").unwrap_or_else(|_| unreachable!())
}

impl ClientConfig {
    pub fn new(base_url: Url, api_key: impl Into<String>) -> Self {
        Self { base_url, api_key: api_key.into(), ..Self::default() }
    }

    pub fn waiter_timeout(&self) -> Duration {
        Duration::from_millis(self.waiter_timeout_ms)
    }

    pub fn blocking_encode_timeout(&self) -> Duration {
        Duration::from_millis(self.blocking_encode_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_millis(self.upload_timeout_ms)
    }

    /// Validate configuration values
    ///
    /// # Errors
    /// Returns `ClientError::Config` when the API key is empty, the base URL
    /// cannot carry a path, or the normal queue would never run anything.
    pub fn validate(&self) -> ClientResult<()> {
        if self.api_key.trim().is_empty() {
            return Err(ClientError::Config("api_key must not be empty".into()));
        }
        if self.base_url.cannot_be_a_base() {
            return Err(ClientError::Config(format!(
                "base_url cannot be used as a base: {}",
                self.base_url
            )));
        }
        if self.normal_queue_concurrency == 0 {
            return Err(ClientError::Config("normal_queue_concurrency must be at least 1".into()));
        }
        if self.waiter_timeout_ms == 0 {
            return Err(ClientError::Config("waiter_timeout_ms must be positive".into()));
        }
        Ok(())
    }
}
