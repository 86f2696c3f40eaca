//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for a label run.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for a label run.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LabelsConfig {
    /// `User-Agent` sent with every upstream request.
    pub user_agent: String,

    /// Worker pool settings.
    pub dispatch: DispatchConfig,

    /// iNaturalist API budget.
    pub inaturalist: ProviderConfig,

    /// Mushroom Observer API budget.
    pub mushroom_observer: ProviderConfig,

    /// Retry and timeout configuration.
    pub retry: RetryConfig,

    /// Ancestor lookup batching.
    pub coalescer: CoalescerConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for LabelsConfig {
    fn default() -> Self {
        Self {
            user_agent: format!(
                "herbarium-labels/{} (specimen label generator)",
                env!("CARGO_PKG_VERSION")
            ),
            dispatch: DispatchConfig::default(),
            inaturalist: ProviderConfig::inaturalist(),
            mushroom_observer: ProviderConfig::mushroom_observer(),
            retry: RetryConfig::default(),
            coalescer: CoalescerConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Number of concurrent label-building workers.
    pub workers: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        // Mirrors the documented fair-use concurrency of the iNaturalist API.
        Self { workers: 5 }
    }
}

/// Per-provider request budget.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    /// API root, without trailing slash.
    pub base_url: String,

    /// Sustained requests per rolling minute. Zero or negative disables limiting.
    pub requests_per_minute: i64,

    /// Admissions allowed within the window before spacing is enforced.
    pub burst: u32,

    /// Initial cap on in-flight calls. Values <= 0 are clamped to 1.
    pub concurrency: i64,
}

impl ProviderConfig {
    pub fn inaturalist() -> Self {
        Self {
            base_url: "https://api.inaturalist.org/v1".to_string(),
            requests_per_minute: 60,
            burst: 10,
            concurrency: 5,
        }
    }

    pub fn mushroom_observer() -> Self {
        Self {
            base_url: "https://mushroomobserver.org/api2".to_string(),
            requests_per_minute: 20,
            burst: 5,
            concurrency: 2,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempt ceiling per logical fetch (first try included).
    pub max_attempts: u32,

    /// Cumulative backoff a single fetch may spend sleeping, in seconds.
    pub total_wait_budget_secs: u64,

    /// Cumulative wait after which a one-time patience notice is emitted.
    pub patience_threshold_secs: u64,

    /// Timeout for each individual network call, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            total_wait_budget_secs: 30,
            patience_threshold_secs: 8,
            request_timeout_secs: 20,
        }
    }
}

impl RetryConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Ancestor lookup coalescing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CoalescerConfig {
    /// How long the first queued key waits for companions, in milliseconds.
    pub window_ms: u64,

    /// Maximum keys per upstream batch call.
    pub max_batch: usize,
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            window_ms: 100,
            max_batch: 50,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error) when `RUST_LOG` is unset.
    pub log_level: String,

    /// Suppress verbose retry notices on the progress stream.
    pub quiet: bool,

    /// Prometheus exporter bind address. Disabled when unset.
    pub metrics_address: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            quiet: false,
            metrics_address: None,
        }
    }
}
