//! Assembles an [`ApiClient`] backed by the reqwest adapters

use std::sync::Arc;

use chatwire_core::{
    ApiClient, ConnectionDetailsProvider, OfflineRequestQueue, RequestEncoder, TokenRefresher,
};
use chatwire_domain::{ClientConfig, ClientResult};
use tracing::info;

use crate::http::{HttpCdnClient, ReqwestTransport};

/// Build a client that sends requests and uploads through reqwest.
///
/// The transport and the CDN uploader share one connection pool. The
/// realtime side supplies `details` and `refresher`; `offline_queue` defaults
/// to one that only logs.
///
/// # Errors
/// Returns `ClientError::Config` if the configuration is invalid, the HTTP
/// client cannot be built, or no tokio runtime is running.
pub fn build_api_client(
    config: ClientConfig,
    details: Arc<dyn ConnectionDetailsProvider>,
    refresher: Arc<dyn TokenRefresher>,
    offline_queue: Option<Arc<dyn OfflineRequestQueue>>,
) -> ClientResult<ApiClient> {
    config.validate()?;

    let transport = ReqwestTransport::builder().timeout(config.request_timeout()).build()?;
    let encoder =
        RequestEncoder::new(config.base_url.clone(), config.api_key.clone(), Arc::clone(&details));
    let cdn = HttpCdnClient::new(
        transport.client().clone(),
        encoder,
        config.waiter_timeout(),
        config.upload_timeout(),
    );

    let mut builder = ApiClient::builder(config)
        .transport(Arc::new(transport))
        .connection_details(details)
        .token_refresher(refresher)
        .cdn(Arc::new(cdn));
    if let Some(queue) = offline_queue {
        builder = builder.offline_queue(queue);
    }

    let client = builder.build()?;
    info!(base_url = %client.config().base_url, "reqwest-backed api client assembled");
    Ok(client)
}
