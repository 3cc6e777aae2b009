//! Response decoder
//!
//! The only component that interprets a [`TransportResponse`]. Checks run in a
//! fixed order: transport error, HTTP head, empty body, server error payload,
//! then the expected payload.

use chatwire_domain::{ClientError, ClientResult, ErrorPayload, TransportResponse};
use serde::de::DeserializeOwned;
use tracing::{error, info};

/// Classifies raw responses into payloads or [`ClientError`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct ResponseDecoder;

impl ResponseDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decode `response` into `T`.
    ///
    /// # Errors
    /// - `Connection` / `Transport` for transport-level failures
    /// - `Unexpected` when there is no HTTP response
    /// - `ResponseBodyEmpty` when the body is missing or empty
    /// - `ExpiredToken` / `Server` for status codes >= 300
    /// - `Decoding` when a body cannot be parsed
    pub fn decode<T: DeserializeOwned>(&self, response: TransportResponse) -> ClientResult<T> {
        let TransportResponse { data, head, error } = response;

        if let Some(err) = error {
            if err.is_cancellation() || err.is_connection_lost() {
                info!(kind = ?err.kind, message = %err.message, "request did not complete");
            } else {
                error!(kind = ?err.kind, message = %err.message, "transport error");
            }
            return Err(if err.is_connection_error() {
                ClientError::Connection(err)
            } else {
                ClientError::Transport(err)
            });
        }

        let Some(head) = head else {
            error!("transport returned no HTTP response");
            return Err(ClientError::Unexpected("response is not an HTTP response".into()));
        };

        let body = match data {
            Some(body) if !body.is_empty() => body,
            _ => {
                let url = head.url.as_ref().map(ToString::to_string).unwrap_or_default();
                return Err(ClientError::ResponseBodyEmpty(format!(
                    "HTTP {} from {url}",
                    head.status
                )));
            }
        };

        if head.status >= 300 {
            let payload: ErrorPayload = serde_json::from_slice(&body).map_err(|e| {
                error!(status = head.status, error = %e, "unparsable server error payload");
                ClientError::Decoding(format!("server error payload (HTTP {}): {e}", head.status))
            })?;

            if payload.is_expired_token() {
                info!(code = payload.code, "token expired");
                return Err(ClientError::ExpiredToken(payload));
            }

            error!(
                code = payload.code,
                status = payload.status_code,
                message = %payload.message,
                "server rejected request"
            );
            return Err(ClientError::Server(payload));
        }

        serde_json::from_slice(&body).map_err(|e| ClientError::Decoding(e.to_string()))
    }
}
