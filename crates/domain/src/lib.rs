//! # Chatwire Domain
//!
//! Value types shared by every Chatwire crate.
//!
//! This crate contains:
//! - Endpoint descriptors and wire request/response types
//! - Client error taxonomy and the server error payload
//! - Client configuration structures
//! - Protocol constants (query parameters, auth headers)
//!
//! ## Architecture
//! - No dependencies on other Chatwire crates
//! - No I/O and no async runtime
//! - Pure data structures and classification helpers

pub mod config;
pub mod constants;
pub mod endpoint;
pub mod errors;
pub mod macros;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use endpoint::{Endpoint, HttpMethod};
pub use errors::*;
pub use types::*;
