//! Wire-level request and response types
//!
//! [`WireRequest`] is what the encoder produces and the transport sends.
//! [`TransportResponse`] is the `(data, head, error)` triple the transport
//! hands back; the decoder is the only component that interprets it.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::endpoint::HttpMethod;

/// Fully formed request ready for the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Vec<u8>>,
}

impl WireRequest {
    pub fn new(method: HttpMethod, url: Url) -> Self {
        Self { method, url, headers: BTreeMap::new(), body: None }
    }

    /// Value of a header, if set.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name.into(), value.into());
    }

    /// Value of the first query item named `name`.
    pub fn query_value(&self, name: &str) -> Option<String> {
        self.url.query_pairs().find(|(key, _)| key == name).map(|(_, value)| value.into_owned())
    }

    /// Append query items, keeping any that are already present.
    pub fn append_query_items<'a, I>(&mut self, items: I)
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut pairs = self.url.query_pairs_mut();
        for (key, value) in items {
            pairs.append_pair(key, value);
        }
    }
}

/// Status line and headers of an HTTP response
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HttpResponseHead {
    pub status: u16,
    pub url: Option<Url>,
    pub headers: BTreeMap<String, String>,
}

/// Everything the transport returned for one request
///
/// Mirrors the transport triple: any combination of body, head and error may
/// be present, and the decoder decides what it means.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportResponse {
    pub data: Option<Vec<u8>>,
    pub head: Option<HttpResponseHead>,
    pub error: Option<TransportError>,
}

impl TransportResponse {
    /// A completed HTTP exchange.
    pub fn http(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            data: Some(body.into()),
            head: Some(HttpResponseHead { status, ..HttpResponseHead::default() }),
            error: None,
        }
    }

    /// A transport-level failure with no HTTP exchange.
    pub fn failed(error: TransportError) -> Self {
        Self { data: None, head: None, error: Some(error) }
    }
}

/// Classification of transport-level failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    Cancelled,
    TimedOut,
    CannotFindHost,
    CannotConnectToHost,
    DnsLookupFailed,
    NetworkConnectionLost,
    NotConnectedToInternet,
    BadServerResponse,
    Other,
}

/// Transport-level failure with a human-readable message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn not_connected() -> Self {
        Self::new(
            TransportErrorKind::NotConnectedToInternet,
            "The Internet connection appears to be offline",
        )
    }

    pub fn cancelled() -> Self {
        Self::new(TransportErrorKind::Cancelled, "The request was cancelled")
    }

    /// Transient failures that indicate missing or flaky connectivity.
    pub fn is_connection_error(&self) -> bool {
        !matches!(self.kind, TransportErrorKind::Cancelled | TransportErrorKind::Other)
    }

    pub fn is_cancellation(&self) -> bool {
        self.kind == TransportErrorKind::Cancelled
    }

    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self.kind,
            TransportErrorKind::NetworkConnectionLost | TransportErrorKind::NotConnectedToInternet
        )
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for TransportError {}
