//! Attachment upload pipeline
//!
//! Uploads run as retryable operations on the normal queue, so they pause in
//! recovery mode and during token refreshes like any other request. Only
//! connection errors are retried; uploads are never queued offline.

use std::sync::Arc;

use chatwire_domain::{AttachmentUpload, ClientError, ClientResult, UploadedFile};
use tracing::{debug, warn};
use uuid::Uuid;

use super::lifecycle::{self, Action};
use super::{ApiClient, CompletionSlot};
use crate::ports::ProgressSink;
use crate::scheduling::{Done, RetryableOperation};

struct UploadRequest {
    id: Uuid,
    attachment: AttachmentUpload,
    progress: ProgressSink,
    completion: CompletionSlot<UploadedFile>,
}

impl ApiClient {
    /// Upload `attachment` through the configured CDN client.
    ///
    /// `progress` may be called any number of times per attempt, independently
    /// of `completion`.
    pub fn upload_attachment<F>(
        &self,
        attachment: AttachmentUpload,
        progress: Option<ProgressSink>,
        completion: F,
    ) where
        F: FnOnce(ClientResult<UploadedFile>) + Send + 'static,
    {
        let Some(cdn) = self.inner.cdn.clone() else {
            warn!(file_name = %attachment.file_name, "upload requested without a CDN client");
            completion(Err(ClientError::Upload("no CDN client configured".into())));
            return;
        };

        let request = Arc::new(UploadRequest {
            id: Uuid::new_v4(),
            attachment,
            progress: progress.unwrap_or_else(|| Arc::new(|_| {})),
            completion: CompletionSlot::new(Box::new(completion)),
        });
        debug!(
            request_id = %request.id,
            path = %request.attachment.upload_path(),
            bytes = request.attachment.data.len(),
            "upload submitted"
        );

        let operation = RetryableOperation::new(self.inner.config.max_retries, move |context| {
            let cdn = Arc::clone(&cdn);
            let request = Arc::clone(&request);
            async move {
                let result =
                    cdn.upload_attachment(&request.attachment, Arc::clone(&request.progress)).await;
                let outcome = result.as_ref().err().map(ClientError::kind);

                match lifecycle::next_upload_action(outcome, context.can_retry()) {
                    Action::RetryInPlace => {
                        debug!(request_id = %request.id, "retrying upload after connection error");
                        Done::Retry
                    }
                    _ => {
                        request.completion.deliver(result);
                        Done::Continue
                    }
                }
            }
        });
        self.inner.normal.add(operation);
    }
}
