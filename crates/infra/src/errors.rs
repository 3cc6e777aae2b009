//! Conversions from external infrastructure errors into client errors.

use std::error::Error as StdError;

use chatwire_domain::{ClientError, TransportError, TransportErrorKind};
use reqwest::Error as HttpError;

/// Error newtype that keeps conversions on the infrastructure side and can be
/// converted back into the client error.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct InfraError(#[from] pub ClientError);

impl From<InfraError> for ClientError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

/* -------------------------------------------------------------------------- */
/* reqwest::Error → ClientError */
/* -------------------------------------------------------------------------- */

impl From<HttpError> for InfraError {
    fn from(err: HttpError) -> Self {
        if err.is_builder() {
            return InfraError(ClientError::Config(format!("invalid HTTP request: {err}")));
        }

        let transport = classify_reqwest_error(&err);
        InfraError(if transport.is_connection_error() {
            ClientError::Connection(transport)
        } else {
            ClientError::Transport(transport)
        })
    }
}

impl From<url::ParseError> for InfraError {
    fn from(err: url::ParseError) -> Self {
        InfraError(ClientError::InvalidUrl(err.to_string()))
    }
}

/// Map a reqwest failure onto the transport error kinds the decoder
/// understands.
pub fn classify_reqwest_error(err: &HttpError) -> TransportError {
    let kind = if err.is_timeout() {
        TransportErrorKind::TimedOut
    } else if err.is_connect() {
        if source_chain_mentions(err, "dns error") {
            TransportErrorKind::DnsLookupFailed
        } else {
            TransportErrorKind::CannotConnectToHost
        }
    } else if err.is_body() || err.is_decode() {
        TransportErrorKind::BadServerResponse
    } else if err.is_request() {
        TransportErrorKind::NetworkConnectionLost
    } else {
        TransportErrorKind::Other
    };

    TransportError::new(kind, err.to_string())
}

fn source_chain_mentions(err: &HttpError, needle: &str) -> bool {
    let mut source = err.source();
    while let Some(cause) = source {
        if cause.to_string().to_ascii_lowercase().contains(needle) {
            return true;
        }
        source = cause.source();
    }
    false
}
