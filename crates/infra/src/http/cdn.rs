//! Multipart attachment uploader
//!
//! Requests are encoded by the shared [`RequestEncoder`] so they carry the
//! same `api_key` and auth headers as API calls, then sent as a multipart form
//! whose body is streamed in chunks. Progress is reported as each chunk is
//! handed to the connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chatwire_core::{CdnClient, ProgressSink, RequestEncoder, ResponseDecoder};
use chatwire_domain::constants::{CONTENT_TYPE_HEADER, UPLOAD_CHUNK_SIZE};
use chatwire_domain::{
    AttachmentUpload, ClientError, ClientResult, Endpoint, TransportResponse, UploadedFile,
};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client as ReqwestClient};
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use super::transport::read_response;
use crate::errors::classify_reqwest_error;

/// Response body of the upload endpoints
#[derive(Debug, Deserialize)]
struct CdnUploadResponse {
    file: Url,
    #[serde(default)]
    thumb_url: Option<Url>,
}

/// [`CdnClient`] posting attachments to `channels/{type}/{id}/{image|file}`
#[derive(Clone)]
pub struct HttpCdnClient {
    client: ReqwestClient,
    encoder: RequestEncoder,
    decoder: ResponseDecoder,
    waiter_timeout: Duration,
    upload_timeout: Duration,
    chunk_size: usize,
}

impl HttpCdnClient {
    pub fn new(
        client: ReqwestClient,
        encoder: RequestEncoder,
        waiter_timeout: Duration,
        upload_timeout: Duration,
    ) -> Self {
        Self {
            client,
            encoder,
            decoder: ResponseDecoder::new(),
            waiter_timeout,
            upload_timeout,
            chunk_size: UPLOAD_CHUNK_SIZE,
        }
    }

    /// Size of the chunks the body is streamed in; progress is reported once
    /// per chunk.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    fn form(&self, attachment: &AttachmentUpload, progress: ProgressSink) -> ClientResult<Form> {
        let total = attachment.data.len() as u64;
        let sent = Arc::new(AtomicU64::new(0));
        let chunks: Vec<Vec<u8>> =
            attachment.data.chunks(self.chunk_size).map(<[u8]>::to_vec).collect();

        let stream = futures::stream::iter(chunks.into_iter().map(move |chunk| {
            let done = sent.fetch_add(chunk.len() as u64, Ordering::SeqCst) + chunk.len() as u64;
            progress(fraction(done, total));
            Ok::<_, std::io::Error>(chunk)
        }));

        let part = Part::stream_with_length(Body::wrap_stream(stream), total)
            .file_name(attachment.file_name.clone())
            .mime_str(&attachment.mime_type)
            .map_err(|e| {
                ClientError::Upload(format!("invalid mime type {}: {e}", attachment.mime_type))
            })?;

        Ok(Form::new().part("file", part))
    }
}

fn fraction(done: u64, total: u64) -> f64 {
    if total == 0 {
        1.0
    } else {
        done as f64 / total as f64
    }
}

#[async_trait]
impl CdnClient for HttpCdnClient {
    async fn upload_attachment(
        &self,
        attachment: &AttachmentUpload,
        progress: ProgressSink,
    ) -> ClientResult<UploadedFile> {
        let endpoint = Endpoint::<CdnUploadResponse>::post(attachment.upload_path());
        let mut wire = self.encoder.encode_request(&endpoint, self.waiter_timeout).await?;
        // The multipart form replaces the JSON body.
        wire.body = None;
        wire.headers.remove(CONTENT_TYPE_HEADER);

        let form = self.form(attachment, Arc::clone(&progress))?;
        let mut builder =
            self.client.post(wire.url.clone()).timeout(self.upload_timeout).multipart(form);
        for (name, value) in &wire.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        debug!(
            url = %wire.url,
            file_name = %attachment.file_name,
            bytes = attachment.data.len(),
            "uploading attachment"
        );
        let response = match builder.send().await {
            Ok(response) => read_response(response).await,
            Err(err) => TransportResponse::failed(classify_reqwest_error(&err)),
        };

        let uploaded: CdnUploadResponse = self.decoder.decode(response)?;
        info!(remote_url = %uploaded.file, "attachment uploaded");
        Ok(UploadedFile { remote_url: uploaded.file, thumbnail_url: uploaded.thumb_url })
    }
}
