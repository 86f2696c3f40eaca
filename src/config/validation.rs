//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (workers > 0, timeouts > 0, batch size > 0)
//! - Validate provider base URLs
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: LabelsConfig → Result<(), Vec<ValidationError>>
//! - A zero or negative rate budget is legal (limiting disabled)

use thiserror::Error;

use crate::config::schema::{LabelsConfig, ProviderConfig};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("dispatch.workers must be at least 1")]
    NoWorkers,

    #[error("{provider}.base_url is not a valid URL: {reason}")]
    InvalidBaseUrl { provider: &'static str, reason: String },

    #[error("{provider}.burst ({burst}) exceeds requests_per_minute ({rpm})")]
    BurstAboveBudget {
        provider: &'static str,
        burst: u32,
        rpm: i64,
    },

    #[error("retry.max_attempts must be at least 1")]
    NoAttempts,

    #[error("retry.request_timeout_secs must be greater than zero")]
    ZeroTimeout,

    #[error("coalescer.max_batch must be at least 1")]
    EmptyBatch,

    #[error("user_agent must not be empty")]
    EmptyUserAgent,
}

/// Check a configuration, collecting every problem found.
pub fn validate_config(config: &LabelsConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.dispatch.workers == 0 {
        errors.push(ValidationError::NoWorkers);
    }
    validate_provider("inaturalist", &config.inaturalist, &mut errors);
    validate_provider("mushroom_observer", &config.mushroom_observer, &mut errors);

    if config.retry.max_attempts == 0 {
        errors.push(ValidationError::NoAttempts);
    }
    if config.retry.request_timeout_secs == 0 {
        errors.push(ValidationError::ZeroTimeout);
    }
    if config.coalescer.max_batch == 0 {
        errors.push(ValidationError::EmptyBatch);
    }
    if config.user_agent.trim().is_empty() {
        errors.push(ValidationError::EmptyUserAgent);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_provider(
    provider: &'static str,
    config: &ProviderConfig,
    errors: &mut Vec<ValidationError>,
) {
    if let Err(e) = url::Url::parse(&config.base_url) {
        errors.push(ValidationError::InvalidBaseUrl {
            provider,
            reason: e.to_string(),
        });
    }
    if config.requests_per_minute > 0 && i64::from(config.burst) > config.requests_per_minute {
        errors.push(ValidationError::BurstAboveBudget {
            provider,
            burst: config.burst,
            rpm: config.requests_per_minute,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&LabelsConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = LabelsConfig::default();
        config.dispatch.workers = 0;
        config.retry.max_attempts = 0;
        config.inaturalist.base_url = "not a url".to_string();
        config.mushroom_observer.burst = 50;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.contains(&ValidationError::NoWorkers));
        assert!(errors.contains(&ValidationError::NoAttempts));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::BurstAboveBudget { provider: "mushroom_observer", .. })));
    }

    #[test]
    fn test_disabled_rate_allows_any_burst() {
        let mut config = LabelsConfig::default();
        config.inaturalist.requests_per_minute = 0;
        config.inaturalist.burst = 1000;
        assert!(validate_config(&config).is_ok());
    }
}
