//! HTTP adapters built on reqwest

pub mod cdn;
pub mod transport;

pub use cdn::HttpCdnClient;
pub use transport::{ReqwestTransport, ReqwestTransportBuilder};
