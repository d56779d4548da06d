//! Streaming completion providers

use crate::types::{Chunk, Completion};
use futures::Stream;
use std::pin::Pin;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("rate limited{}", .retry_after.map(|d| format!(", retry after {}ms", d.as_millis())).unwrap_or_default())]
    RateLimited { retry_after: Option<Duration> },

    #[error("provider overloaded: {0}")]
    Overloaded(String),

    #[error("http {status}: {body}")]
    Http { status: u16, body: String },

    #[error("malformed stream event: {0}")]
    Malformed(String),

    #[error("stream failed: {0}")]
    Stream(String),

    #[error("cancelled")]
    Cancelled,

    #[error("network: {0}")]
    Network(#[from] reqwest::Error),
}

impl ProviderError {
    /// Worth another attempt after a short pause.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::RateLimited { .. } | ProviderError::Overloaded(_) => true,
            ProviderError::Http { status, .. } => *status >= 500,
            ProviderError::Network(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Server-suggested pause, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = ProviderResult<Chunk>> + Send>>;

#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Start a streamed completion. Cancelling `cancel` drops the connection and
    /// ends the stream with `ProviderError::Cancelled`.
    async fn stream(&self, completion: Completion, cancel: CancellationToken) -> ProviderResult<ChunkStream>;
}
