//! Command-line and environment overrides.
//!
//! The binary fills a [`ConfigOverrides`] from its flags (each flag also reads
//! a `LABELS_*` environment variable) and applies it on top of the file or
//! default configuration before validation.

use crate::config::schema::LabelsConfig;

/// Values that replace their configured counterparts when set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub workers: Option<usize>,
    /// iNaturalist requests per minute.
    pub requests_per_minute: Option<i64>,
    /// iNaturalist burst threshold.
    pub burst: Option<u32>,
    pub request_timeout_secs: Option<u64>,
    pub total_wait_budget_secs: Option<u64>,
    pub batch_window_ms: Option<u64>,
    pub batch_size: Option<usize>,
    /// Only ever switches quiet mode on.
    pub quiet: bool,
}

impl ConfigOverrides {
    pub fn apply(&self, config: &mut LabelsConfig) {
        if let Some(workers) = self.workers {
            config.dispatch.workers = workers;
        }
        if let Some(rpm) = self.requests_per_minute {
            config.inaturalist.requests_per_minute = rpm;
            // A lowered rate drags the configured burst down with it unless
            // the burst was given explicitly too.
            if rpm > 0 && self.burst.is_none() {
                let cap = u32::try_from(rpm).unwrap_or(u32::MAX);
                config.inaturalist.burst = config.inaturalist.burst.min(cap);
            }
        }
        if let Some(burst) = self.burst {
            config.inaturalist.burst = burst;
        }
        if let Some(secs) = self.request_timeout_secs {
            config.retry.request_timeout_secs = secs;
        }
        if let Some(secs) = self.total_wait_budget_secs {
            config.retry.total_wait_budget_secs = secs;
        }
        if let Some(ms) = self.batch_window_ms {
            config.coalescer.window_ms = ms;
        }
        if let Some(size) = self.batch_size {
            config.coalescer.max_batch = size;
        }
        if self.quiet {
            config.observability.quiet = true;
        }
    }
}
