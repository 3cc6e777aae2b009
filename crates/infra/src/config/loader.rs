//! Configuration loader
//!
//! Loads [`ClientConfig`] from environment variables or files.
//!
//! ## Loading Strategy
//! 1. First, attempts to load from environment variables
//! 2. If `CHATWIRE_BASE_URL` or `CHATWIRE_API_KEY` is missing, falls back to
//!    loading from file
//! 3. Probes multiple paths for config files
//! 4. Supports JSON and TOML formats
//!
//! Every loaded configuration is validated before it is returned.
//!
//! ## Environment Variables
//! - `CHATWIRE_BASE_URL`: API base URL (required)
//! - `CHATWIRE_API_KEY`: application API key (required)
//! - `CHATWIRE_MAX_RETRIES`: retries per operation
//! - `CHATWIRE_WAITER_TIMEOUT_MS`: wait for token / connection id
//! - `CHATWIRE_NORMAL_QUEUE_CONCURRENCY`: concurrent normal requests
//! - `CHATWIRE_MAX_TOKEN_REFRESH_ATTEMPTS`: token refreshes per request
//! - `CHATWIRE_REQUEST_TIMEOUT_MS`: HTTP request timeout
//! - `CHATWIRE_LOG_FILTER`: `EnvFilter` directive
//! - `CHATWIRE_LOG_JSON`: JSON log output (true/false)
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `./chatwire.toml` or `./chatwire.json` (current working directory)
//! 2. `./config.toml` or `./config.json` (current working directory)
//! 3. The same names in the parent and grandparent directories
//! 4. Relative to executable location

use std::path::{Path, PathBuf};
use std::str::FromStr;

use chatwire_domain::{ClientConfig, ClientError, ClientResult};
use url::Url;

const FILE_NAMES: [&str; 4] = ["chatwire.toml", "chatwire.json", "config.toml", "config.json"];
const SEARCH_DIRS: [&str; 3] = [".", "..", "../.."];

/// Load configuration with automatic fallback strategy
///
/// # Errors
/// Returns `ClientError::Config` if:
/// - Configuration cannot be loaded from either source
/// - File format is invalid
/// - The loaded configuration fails validation
pub fn load() -> ClientResult<ClientConfig> {
    match load_from_env() {
        Ok(config) => {
            tracing::info!("configuration loaded from environment variables");
            Ok(config)
        }
        Err(e) => {
            tracing::debug!(error = %e, "failed to load from environment, trying file");
            load_from_file(None)
        }
    }
}

/// Load configuration from environment variables
///
/// `CHATWIRE_BASE_URL` and `CHATWIRE_API_KEY` are required; every other
/// variable falls back to its default when unset.
///
/// # Errors
/// Returns `ClientError::Config` if required variables are missing or any
/// variable has an invalid value.
pub fn load_from_env() -> ClientResult<ClientConfig> {
    let base_url = env_var("CHATWIRE_BASE_URL")?;
    let base_url = Url::parse(&base_url)
        .map_err(|e| ClientError::Config(format!("Invalid CHATWIRE_BASE_URL: {e}")))?;
    let mut config = ClientConfig::new(base_url, env_var("CHATWIRE_API_KEY")?);

    if let Some(value) = env_parse("CHATWIRE_MAX_RETRIES")? {
        config.max_retries = value;
    }
    if let Some(value) = env_parse("CHATWIRE_WAITER_TIMEOUT_MS")? {
        config.waiter_timeout_ms = value;
    }
    if let Some(value) = env_parse("CHATWIRE_NORMAL_QUEUE_CONCURRENCY")? {
        config.normal_queue_concurrency = value;
    }
    if let Some(value) = env_parse("CHATWIRE_MAX_TOKEN_REFRESH_ATTEMPTS")? {
        config.max_token_refresh_attempts = value;
    }
    if let Some(value) = env_parse("CHATWIRE_REQUEST_TIMEOUT_MS")? {
        config.request_timeout_ms = value;
    }
    if let Ok(filter) = std::env::var("CHATWIRE_LOG_FILTER") {
        config.logging.filter = filter;
    }
    config.logging.json = env_bool("CHATWIRE_LOG_JSON", config.logging.json);

    config.validate()?;
    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes multiple locations for config files.
/// Supports both JSON and TOML formats (detected by file extension).
///
/// # Errors
/// Returns `ClientError::Config` if:
/// - File not found (when path is specified)
/// - No config file found (when path is `None`)
/// - File format is invalid
/// - The configuration fails validation
pub fn load_from_file(path: Option<PathBuf>) -> ClientResult<ClientConfig> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(ClientError::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            ClientError::Config("No config file found in any of the standard locations".into())
        })?,
    };

    tracing::info!(path = %config_path.display(), "loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| ClientError::Config(format!("Failed to read config file: {e}")))?;

    let config = parse_config(&contents, &config_path)?;
    config.validate()?;
    Ok(config)
}

/// Parse configuration, detecting the format from the file extension
fn parse_config(contents: &str, path: &Path) -> ClientResult<ClientConfig> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| ClientError::Config(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| ClientError::Config(format!("Invalid JSON format: {e}"))),
        _ => Err(ClientError::Config(format!("Unsupported config format: {extension}"))),
    }
}

/// Probe the standard locations for a configuration file
///
/// Checks the working directory and its parents first, then the directories
/// around the executable.
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let roots = [
        std::env::current_dir().ok(),
        std::env::current_exe().ok().and_then(|exe| exe.parent().map(Path::to_path_buf)),
    ];

    roots
        .into_iter()
        .flatten()
        .flat_map(|root| {
            SEARCH_DIRS.iter().flat_map(move |dir| {
                let dir = root.join(dir);
                FILE_NAMES.iter().map(move |name| dir.join(name))
            })
        })
        .find(|path| path.exists())
}

/// Get required environment variable
fn env_var(key: &str) -> ClientResult<String> {
    std::env::var(key).map_err(|_| {
        ClientError::Config(format!("Missing required environment variable: {key}"))
    })
}

/// Parse an optional environment variable; unset yields `None`
fn env_parse<T>(key: &str) -> ClientResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| ClientError::Config(format!("Invalid value for {key}: {e}"))),
        Err(_) => Ok(None),
    }
}

/// Parse boolean from environment variable
///
/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}
