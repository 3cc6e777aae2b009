//! # Chatwire Core
//!
//! Request orchestration layer - no HTTP library code.
//!
//! This crate contains:
//! - Port interfaces for the transport, token refresher, offline queue and CDN
//! - The waiter registry feeding tokens and connection ids to the encoder
//! - Request encoding and response decoding
//! - Retryable operations and the queues that run them
//! - The request lifecycle controller ([`ApiClient`]) and upload pipeline
//!
//! ## Architecture Principles
//! - Only depends on `chatwire-domain`
//! - All network access goes through [`ports::Transport`] and [`ports::CdnClient`]
//! - Decision logic is pure and unit-tested ([`client::lifecycle`])

pub mod client;
pub mod decoder;
pub mod encoder;
pub mod ports;
pub mod scheduling;
pub mod waiters;

pub use client::{ApiClient, ApiClientBuilder, Completion, ModeFlags};
pub use decoder::ResponseDecoder;
pub use encoder::RequestEncoder;
pub use ports::{
    CdnClient, ConnectionDetailsProvider, LoggingOfflineQueue, OfflineRequestQueue,
    ProgressSink, TokenRefresher, Transport,
};
pub use scheduling::{Done, OperationContext, OperationQueue, RetryableOperation};
pub use waiters::{ConnectionDetails, ConnectionState, WaiterError, WaiterRegistry};
