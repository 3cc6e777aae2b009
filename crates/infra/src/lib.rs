//! # Chatwire Infrastructure
//!
//! Adapters for the ports defined in `chatwire-core`.
//!
//! This crate contains:
//! - The reqwest-backed [`Transport`](chatwire_core::Transport)
//! - The multipart CDN uploader
//! - Configuration loading from the environment or a file
//! - Tracing subscriber setup
//!
//! ## Architecture
//! - Implements traits defined in `chatwire-core`
//! - Contains all I/O; the core crate never touches the network directly

pub mod config;
pub mod errors;
pub mod http;
pub mod observability;
pub mod wiring;

// Re-export commonly used items
pub use errors::InfraError;
pub use http::{HttpCdnClient, ReqwestTransport, ReqwestTransportBuilder};
pub use observability::init_tracing;
pub use wiring::build_api_client;
