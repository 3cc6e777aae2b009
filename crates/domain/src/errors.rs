//! Error types used throughout the client
//!
//! [`ClientError`] is the only error a request completion ever receives.
//! Two views classify it:
//! - [`ErrorKind`]: what the lifecycle controller reacts to
//! - [`ErrorCategory`]: the user-facing taxonomy (transient, auth, domain, ...)

use std::fmt;
use std::ops::RangeInclusive;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::TransportError;

/// Structured error body returned by the server for status codes >= 300
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: i32,
    pub message: String,
    #[serde(rename = "StatusCode")]
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}

impl ErrorPayload {
    /// Server code signalling that the token used for the request expired.
    pub const EXPIRED_TOKEN_CODE: i32 = 40;
    /// Server codes signalling that the token is not usable at all.
    pub const INVALID_TOKEN_CODES: RangeInclusive<i32> = 40..=43;

    pub fn is_expired_token(&self) -> bool {
        self.code == Self::EXPIRED_TOKEN_CODE
    }

    pub fn is_invalid_token(&self) -> bool {
        Self::INVALID_TOKEN_CODES.contains(&self.code)
    }
}

impl fmt::Display for ErrorPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code {} (HTTP {}): {}", self.code, self.status_code, self.message)
    }
}

/// Value a waiter was waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitSubject {
    Token,
    ConnectionId,
    EncodedRequest,
}

impl fmt::Display for WaitSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token => f.write_str("token"),
            Self::ConnectionId => f.write_str("connection id"),
            Self::EncodedRequest => f.write_str("encoded request"),
        }
    }
}

/// Main error type delivered to request completions
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    #[error("Token expired: {0}")]
    ExpiredToken(ErrorPayload),

    #[error("Missing token: {0}")]
    MissingToken(String),

    #[error("Missing connection id: {0}")]
    MissingConnectionId(String),

    #[error("Timed out after {timeout:?} waiting for {subject}")]
    WaiterTimeout { subject: WaitSubject, timeout: Duration },

    #[error("Connection error: {0}")]
    Connection(TransportError),

    #[error("Transport error: {0}")]
    Transport(TransportError),

    #[error("Server error: {0}")]
    Server(ErrorPayload),

    #[error("Response body is empty: {0}")]
    ResponseBodyEmpty(String),

    #[error("Unexpected response: {0}")]
    Unexpected(String),

    #[error("Failed to decode response: {0}")]
    Decoding(String),

    #[error("Failed to encode request: {0}")]
    Encoding(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Token refresh failed: {0}")]
    TokenRefreshFailed(String),

    #[error("Token refresh attempts exceeded ({0})")]
    TokenRefreshLimitExceeded(u32),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Request was cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),
}

/// What the lifecycle controller reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ExpiredToken,
    RefreshingTokenInProgress,
    TokenRefreshed,
    WaiterTimeout,
    ConnectionError,
    DomainError,
    ResponseBodyEmpty,
    AuthMissing,
    Unexpected,
}

/// Error taxonomy used for reporting and retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Timeouts, DNS/connect failures, connection loss - retryable
    TransientNetwork,
    /// Expired token - triggers a refresh
    AuthExpired,
    /// No credential available - terminal
    AuthMissing,
    /// Token or connection id did not arrive in time - retried as transient
    WaiterTimeout,
    /// Server rejected the request - terminal, never retried
    Domain,
    /// Server broke the protocol contract (empty body, malformed payload)
    Protocol,
    /// Local misuse or configuration problems - terminal
    Client,
}

impl ClientError {
    /// Get the controller-facing kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ExpiredToken(_) => ErrorKind::ExpiredToken,
            Self::WaiterTimeout { .. } => ErrorKind::WaiterTimeout,
            Self::Connection(_) => ErrorKind::ConnectionError,
            Self::Server(_) | Self::Upload(_) => ErrorKind::DomainError,
            Self::ResponseBodyEmpty(_) => ErrorKind::ResponseBodyEmpty,
            Self::MissingToken(_)
            | Self::MissingConnectionId(_)
            | Self::TokenRefreshFailed(_)
            | Self::TokenRefreshLimitExceeded(_) => ErrorKind::AuthMissing,
            Self::Transport(_)
            | Self::Unexpected(_)
            | Self::Decoding(_)
            | Self::Encoding(_)
            | Self::InvalidUrl(_)
            | Self::Cancelled
            | Self::Config(_) => ErrorKind::Unexpected,
        }
    }

    /// Get the error category for this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection(_) => ErrorCategory::TransientNetwork,
            Self::ExpiredToken(_) => ErrorCategory::AuthExpired,
            Self::MissingToken(_)
            | Self::MissingConnectionId(_)
            | Self::TokenRefreshFailed(_)
            | Self::TokenRefreshLimitExceeded(_) => ErrorCategory::AuthMissing,
            Self::WaiterTimeout { .. } => ErrorCategory::WaiterTimeout,
            Self::Server(_) | Self::Upload(_) => ErrorCategory::Domain,
            Self::ResponseBodyEmpty(_) | Self::Unexpected(_) | Self::Decoding(_) => {
                ErrorCategory::Protocol
            }
            Self::Transport(_)
            | Self::Encoding(_)
            | Self::InvalidUrl(_)
            | Self::Cancelled
            | Self::Config(_) => ErrorCategory::Client,
        }
    }

    /// Transient connectivity failure
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    /// Whether the retry budget may be spent on this error
    pub fn is_retryable(&self) -> bool {
        matches!(self.category(), ErrorCategory::TransientNetwork | ErrorCategory::WaiterTimeout)
    }

    /// Server error code, when the server produced one
    pub fn server_code(&self) -> Option<i32> {
        match self {
            Self::Server(payload) | Self::ExpiredToken(payload) => Some(payload.code),
            _ => None,
        }
    }
}

/// Result type alias for client operations
pub type ClientResult<T> = std::result::Result<T, ClientError>;
