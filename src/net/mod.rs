//! Upstream transport subsystem.
//!
//! # Data Flow
//! ```text
//! RetryingFetcher
//!     → Transport::get(url)            (one network call, no retries)
//!     → client.rs (reqwest, per-call timeout, Accept + User-Agent headers)
//!     → TransportResponse { status, retry_after, body } | TransportError
//! ```
//!
//! # Design Decisions
//! - The transport never interprets status codes; classification belongs to
//!   the governance layer
//! - Only the `Retry-After` header is surfaced, raw, for the backoff parser
//! - Tests substitute scripted transports through the same trait

use std::future::Future;

use thiserror::Error;

pub mod client;

pub use client::HttpTransport;

/// A completed HTTP exchange, whatever its status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    /// Raw `Retry-After` header value, if the provider sent one.
    pub retry_after: Option<String>,
    pub body: String,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            retry_after: None,
            body: body.into(),
        }
    }

    pub fn with_retry_after(mut self, value: impl Into<String>) -> Self {
        self.retry_after = Some(value.into());
        self
    }
}

/// Failures below the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("failed to read response body: {0}")]
    Body(String),
}

/// A single outbound GET.
pub trait Transport: Send + Sync + 'static {
    fn get(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<TransportResponse, TransportError>> + Send;
}
