//! Attachment upload types

use serde::{Deserialize, Serialize};
use url::Url;

use crate::impl_wire_name_conversions;

/// Upload category; selects the CDN route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    File,
}

impl_wire_name_conversions!(AttachmentKind {
    Image => "image",
    File => "file",
});

/// Local attachment waiting to be uploaded to a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentUpload {
    pub channel_type: String,
    pub channel_id: String,
    pub kind: AttachmentKind,
    pub file_name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl AttachmentUpload {
    /// CDN path relative to the API base URL.
    pub fn upload_path(&self) -> String {
        format!("channels/{}/{}/{}", self.channel_type, self.channel_id, self.kind)
    }
}

/// Result of a successful upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub remote_url: Url,
    pub thumbnail_url: Option<Url>,
}
