//! Domain types and models
//!
//! Value types exchanged between the encoder, the transport, the decoder and
//! the upload pipeline.

pub mod attachment;
pub mod token;
pub mod wire;

// Re-export for convenience
pub use attachment::{AttachmentKind, AttachmentUpload, UploadedFile};
pub use token::{ConnectionId, Token};
pub use wire::{
    HttpResponseHead, TransportError, TransportErrorKind, TransportResponse, WireRequest,
};
