//! Attempt classification and terminal fetch errors.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::net::{TransportError, TransportResponse};

/// Result of one attempt against an upstream.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Success(Value),
    NotFound,
    /// Raw `Retry-After` value, if any.
    RateLimited(Option<String>),
    ServerError(u16),
    NetworkError(String),
    ParseError(String),
    /// A status outside the handled set.
    UnexpectedStatus(u16),
}

impl FetchOutcome {
    /// Outcomes the retry loop backs off and tries again on.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchOutcome::RateLimited(_) | FetchOutcome::ServerError(_) | FetchOutcome::NetworkError(_)
        )
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchOutcome::Success(_) => "success",
            FetchOutcome::NotFound => "not_found",
            FetchOutcome::RateLimited(_) => "rate_limited",
            FetchOutcome::ServerError(_) => "server_error",
            FetchOutcome::NetworkError(_) => "network_error",
            FetchOutcome::ParseError(_) => "parse_error",
            FetchOutcome::UnexpectedStatus(_) => "unexpected_status",
        }
    }
}

/// Map a raw transport result onto an outcome.
pub fn classify(result: Result<TransportResponse, TransportError>) -> FetchOutcome {
    let response = match result {
        Ok(response) => response,
        Err(e) => return FetchOutcome::NetworkError(e.to_string()),
    };

    match response.status {
        200..=299 => {
            if response.body.trim().is_empty() {
                return FetchOutcome::ParseError("empty response body".to_string());
            }
            match serde_json::from_str::<Value>(&response.body) {
                Ok(value) => FetchOutcome::Success(value),
                Err(e) => FetchOutcome::ParseError(e.to_string()),
            }
        }
        404 => FetchOutcome::NotFound,
        429 => FetchOutcome::RateLimited(response.retry_after),
        500..=599 => FetchOutcome::ServerError(response.status),
        other => FetchOutcome::UnexpectedStatus(other),
    }
}

/// Terminal failure of one logical fetch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    #[error("not found: {url}")]
    NotFound { url: String },

    #[error("unreadable response from {url}: {reason}")]
    Parse { url: String, reason: String },

    #[error("HTTP {status} from {url}")]
    Http { url: String, status: u16 },

    #[error("gave up on {url} after {attempts} attempts ({:.1}s waiting): {last}", .waited.as_secs_f64())]
    RetriesExhausted {
        url: String,
        attempts: u32,
        waited: Duration,
        last: String,
    },
}

impl FetchError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::NotFound { .. })
    }
}
