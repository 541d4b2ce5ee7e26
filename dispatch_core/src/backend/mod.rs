//! Remote call boundary.
//!
//! Every backend verb goes through [`RemoteBackend::call`], which yields the
//! decoded [`ResultEnvelope`] or a [`TransportError`] when the backend could
//! not be reached or answered with something that is not an envelope.

use async_trait::async_trait;
use dispatch_runtime::{ResultEnvelope, RpcCall};
use thiserror::Error;

mod http;
mod memory;

pub use http::HttpBackend;
pub use memory::MemoryBackend;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("backend returned HTTP {0}")]
    Status(u16),
}

#[async_trait]
pub trait RemoteBackend: Send + Sync {
    async fn call(&self, token: &str, call: &RpcCall) -> Result<ResultEnvelope, TransportError>;
}
