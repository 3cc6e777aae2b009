//! Protocol constants
//!
//! Centralized location for the query parameters, headers and default
//! timings shared by the encoder, the controller and the adapters.

// Query parameters
pub const API_KEY_QUERY_ITEM: &str = "api_key";
pub const CONNECTION_ID_QUERY_ITEM: &str = "connection_id";

// Auth headers
pub const AUTH_TYPE_HEADER: &str = "Stream-Auth-Type";
pub const AUTHORIZATION_HEADER: &str = "Authorization";
pub const AUTH_TYPE_JWT: &str = "jwt";
pub const AUTH_TYPE_ANONYMOUS: &str = "anonymous";
pub const CONTENT_TYPE_HEADER: &str = "Content-Type";
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// User ids starting with this prefix belong to anonymous users.
pub const ANONYMOUS_USER_PREFIX: &str = "!anon";

// Default timings
pub const DEFAULT_WAITER_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_BLOCKING_ENCODE_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_UPLOAD_TIMEOUT_MS: u64 = 120_000;

// Retry budgets
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_MAX_TOKEN_REFRESH_ATTEMPTS: u32 = 10;

// Scheduling
pub const DEFAULT_NORMAL_QUEUE_CONCURRENCY: usize = 8;

/// Chunk size used when streaming attachment bytes to the CDN.
pub const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;
