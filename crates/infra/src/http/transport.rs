use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chatwire_core::Transport;
use chatwire_domain::constants::DEFAULT_REQUEST_TIMEOUT_MS;
use chatwire_domain::{HttpMethod, HttpResponseHead, TransportResponse, WireRequest};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client as ReqwestClient, Method, Response};
use tracing::{debug, warn};

use crate::errors::{classify_reqwest_error, InfraError};

/// [`Transport`] that sends wire requests with reqwest.
///
/// Never retries on its own; the request lifecycle owns retry decisions.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: ReqwestClient,
}

impl ReqwestTransport {
    /// Start building a new transport.
    pub fn builder() -> ReqwestTransportBuilder {
        ReqwestTransportBuilder::default()
    }

    /// Convenience constructor with default configuration.
    pub fn new() -> Result<Self, InfraError> {
        Self::builder().build()
    }

    /// Underlying reqwest client, shared with the CDN uploader.
    pub fn client(&self) -> &ReqwestClient {
        &self.client
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: WireRequest) -> TransportResponse {
        let WireRequest { method, url, headers, body } = request;
        debug!(%method, %url, "sending HTTP request");

        let mut builder = self.client.request(to_reqwest_method(method), url);
        for (name, value) in &headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = body {
            builder = builder.body(body);
        }

        match builder.send().await {
            Ok(response) => read_response(response).await,
            Err(err) => {
                debug!(error = %err, "HTTP request failed");
                TransportResponse::failed(classify_reqwest_error(&err))
            }
        }
    }
}

/// Collect status, headers and body into a [`TransportResponse`].
///
/// A body that fails mid-read keeps the head and reports the error, leaving
/// the decoder to decide.
pub(crate) async fn read_response(response: Response) -> TransportResponse {
    let status = response.status();
    let head = HttpResponseHead {
        status: status.as_u16(),
        url: Some(response.url().clone()),
        headers: collect_headers(response.headers()),
    };
    debug!(%status, url = %response.url(), "received HTTP response");

    match response.bytes().await {
        Ok(bytes) => {
            TransportResponse { data: Some(bytes.to_vec()), head: Some(head), error: None }
        }
        Err(err) => {
            warn!(error = %err, "failed to read response body");
            let error = Some(classify_reqwest_error(&err));
            TransportResponse { data: None, head: Some(head), error }
        }
    }
}

fn collect_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value.to_str().ok().map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

fn to_reqwest_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

/// Builder for [`ReqwestTransport`].
#[derive(Debug)]
pub struct ReqwestTransportBuilder {
    timeout: Duration,
    user_agent: String,
    default_headers: HeaderMap,
    system_proxy: bool,
}

impl Default for ReqwestTransportBuilder {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            user_agent: concat!("chatwire/", env!("CARGO_PKG_VERSION")).to_string(),
            default_headers: HeaderMap::new(),
            system_proxy: true,
        }
    }
}

impl ReqwestTransportBuilder {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }

    /// Header sent with every request.
    ///
    /// # Errors
    /// Returns `ClientError::Config` if the name or value is not a valid
    /// HTTP header.
    pub fn default_header(mut self, name: &str, value: &str) -> Result<Self, InfraError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| config_error(format!("invalid header name {name:?}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| config_error(format!("invalid value for header {name}: {e}")))?;
        self.default_headers.insert(name, value);
        Ok(self)
    }

    /// Whether to honor proxy settings from the environment.
    pub fn system_proxy(mut self, enabled: bool) -> Self {
        self.system_proxy = enabled;
        self
    }

    pub fn build(self) -> Result<ReqwestTransport, InfraError> {
        let mut builder = ReqwestClient::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent)
            .default_headers(self.default_headers);

        if !self.system_proxy {
            builder = builder.no_proxy();
        }

        Ok(ReqwestTransport { client: builder.build()? })
    }
}

fn config_error(message: String) -> InfraError {
    InfraError(chatwire_domain::ClientError::Config(message))
}
