//! Request encoder
//!
//! Turns an [`Endpoint`] into a [`WireRequest`]: URL, `api_key`, query items,
//! body, auth headers and, when needed, the realtime `connection_id`.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use chatwire_domain::constants::{
    API_KEY_QUERY_ITEM, AUTHORIZATION_HEADER, AUTH_TYPE_ANONYMOUS, AUTH_TYPE_HEADER, AUTH_TYPE_JWT,
    CONNECTION_ID_QUERY_ITEM, CONTENT_TYPE_HEADER, CONTENT_TYPE_JSON,
    DEFAULT_BLOCKING_ENCODE_TIMEOUT_MS,
};
use chatwire_domain::{ClientError, ClientResult, Endpoint, WaitSubject, WireRequest};
use serde_json::{Map, Value};
use tokio::runtime::Handle;
use tracing::{debug, error};
use url::Url;

use crate::ports::ConnectionDetailsProvider;

/// Builds wire requests from endpoints
#[derive(Clone)]
pub struct RequestEncoder {
    base_url: Url,
    api_key: String,
    details: Arc<dyn ConnectionDetailsProvider>,
    blocking_timeout: Duration,
}

impl RequestEncoder {
    pub fn new(
        base_url: Url,
        api_key: impl Into<String>,
        details: Arc<dyn ConnectionDetailsProvider>,
    ) -> Self {
        Self {
            base_url,
            api_key: api_key.into(),
            details,
            blocking_timeout: Duration::from_millis(DEFAULT_BLOCKING_ENCODE_TIMEOUT_MS),
        }
    }

    /// Override the timeout of [`Self::encode_request_blocking`]
    pub fn with_blocking_timeout(mut self, timeout: Duration) -> Self {
        self.blocking_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Encode `endpoint`, waiting up to `timeout` for each connection detail
    /// it requires.
    ///
    /// # Errors
    /// - `MissingToken` / `MissingConnectionId` when the value is unavailable
    /// - `WaiterTimeout` when it did not arrive in time
    /// - `InvalidUrl` / `Encoding` when the endpoint cannot be expressed
    pub async fn encode_request<R>(
        &self,
        endpoint: &Endpoint<R>,
        timeout: Duration,
    ) -> ClientResult<WireRequest> {
        let mut request = self.prepare(endpoint)?;
        self.authorize(&mut request, endpoint, timeout).await?;
        self.attach_connection_id(&mut request, endpoint, timeout).await?;

        debug!(method = %request.method, url = %request.url, "encoded request");
        Ok(request)
    }

    /// Synchronous wrapper around [`Self::encode_request`].
    ///
    /// Blocks the calling thread for at most the blocking timeout. Never call
    /// it from a thread that drives `runtime`, and never for endpoints that
    /// require a connection id.
    ///
    /// # Errors
    /// Same as [`Self::encode_request`], plus `WaiterTimeout` for
    /// [`WaitSubject::EncodedRequest`] if the encode did not finish in time.
    pub fn encode_request_blocking<R: 'static>(
        &self,
        runtime: &Handle,
        endpoint: &Endpoint<R>,
    ) -> ClientResult<WireRequest> {
        if endpoint.requires_connection_id {
            error!(
                path = %endpoint.path,
                "blocking encode used for an endpoint that requires a connection id"
            );
            return Err(ClientError::Encoding(format!(
                "{} requires a connection id and cannot be encoded synchronously",
                endpoint.path
            )));
        }

        let timeout = self.blocking_timeout;
        let (tx, rx) = mpsc::sync_channel(1);
        let encoder = self.clone();
        let endpoint = endpoint.clone();
        runtime.spawn(async move {
            let encoded = encoder.encode_request(&endpoint, timeout).await;
            let _ = tx.send(encoded);
        });

        rx.recv_timeout(timeout).unwrap_or(Err(ClientError::WaiterTimeout {
            subject: WaitSubject::EncodedRequest,
            timeout,
        }))
    }

    /// Build the request without any connection details.
    ///
    /// # Errors
    /// `InvalidUrl` if the path cannot be joined to the base URL, `Encoding`
    /// if query items or a folded body are not JSON objects.
    pub fn prepare<R>(&self, endpoint: &Endpoint<R>) -> ClientResult<WireRequest> {
        let url = self.endpoint_url(&endpoint.path)?;
        let mut request = WireRequest::new(endpoint.method, url);
        request.append_query_items([(API_KEY_QUERY_ITEM, self.api_key.as_str())]);

        if let Some(query) = &endpoint.query_items {
            append_json_query(&mut request, query)?;
        }

        if endpoint.method.carries_body() {
            let body = endpoint.body.clone().unwrap_or_else(|| Value::Object(Map::new()));
            let bytes =
                serde_json::to_vec(&body).map_err(|e| ClientError::Encoding(e.to_string()))?;
            request.body = Some(bytes);
            request.set_header(CONTENT_TYPE_HEADER, CONTENT_TYPE_JSON);
        } else if let Some(body) = &endpoint.body {
            append_json_query(&mut request, body)?;
        }

        Ok(request)
    }

    /// Add auth headers, waiting for the token when the endpoint needs one.
    ///
    /// # Errors
    /// Token wait failures as described on [`Self::encode_request`].
    pub async fn authorize<R>(
        &self,
        request: &mut WireRequest,
        endpoint: &Endpoint<R>,
        timeout: Duration,
    ) -> ClientResult<()> {
        if !endpoint.requires_token {
            request.set_header(AUTH_TYPE_HEADER, AUTH_TYPE_ANONYMOUS);
            return Ok(());
        }

        let token = self.details.provide_token(timeout).await?;
        if token.is_anonymous() {
            request.set_header(AUTH_TYPE_HEADER, AUTH_TYPE_ANONYMOUS);
        } else {
            request.set_header(AUTH_TYPE_HEADER, AUTH_TYPE_JWT);
            request.set_header(AUTHORIZATION_HEADER, token.raw);
        }
        Ok(())
    }

    /// Append `connection_id` when the endpoint needs one.
    ///
    /// # Errors
    /// Connection id wait failures as described on [`Self::encode_request`].
    pub async fn attach_connection_id<R>(
        &self,
        request: &mut WireRequest,
        endpoint: &Endpoint<R>,
        timeout: Duration,
    ) -> ClientResult<()> {
        if !endpoint.requires_connection_id {
            return Ok(());
        }

        let connection_id = self.details.provide_connection_id(timeout).await?;
        request.append_query_items([(CONNECTION_ID_QUERY_ITEM, connection_id.as_str())]);
        Ok(())
    }

    fn endpoint_url(&self, path: &str) -> ClientResult<Url> {
        let mut base = self.base_url.clone();
        if !base.path().ends_with('/') {
            let dir = format!("{}/", base.path());
            base.set_path(&dir);
        }
        base.join(path.trim_start_matches('/'))
            .map_err(|e| ClientError::InvalidUrl(format!("{path}: {e}")))
    }
}

fn append_json_query(request: &mut WireRequest, value: &Value) -> ClientResult<()> {
    let Value::Object(fields) = value else {
        return Err(ClientError::Encoding(format!(
            "query items must be a JSON object, got {value}"
        )));
    };

    let mut pairs = Vec::with_capacity(fields.len());
    for (key, value) in fields {
        let rendered = match value {
            Value::Null => continue,
            Value::String(s) => s.clone(),
            Value::Bool(_) | Value::Number(_) => value.to_string(),
            Value::Array(_) | Value::Object(_) => {
                serde_json::to_string(value).map_err(|e| ClientError::Encoding(e.to_string()))?
            }
        };
        pairs.push((key.as_str(), rendered));
    }

    request.append_query_items(pairs.iter().map(|(key, value)| (*key, value.as_str())));
    Ok(())
}
