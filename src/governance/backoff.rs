//! Backoff curves, jitter and `Retry-After` parsing.
//!
//! Everything here is a pure function of its inputs (the jitter factor is
//! drawn separately) so the retry loop's timing can be tested without a
//! network or a clock.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

/// Longest computed wait after a 429 without a usable `Retry-After`.
pub const RATE_LIMIT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Longest computed wait after a 5xx or network failure.
pub const SERVER_ERROR_MAX_DELAY: Duration = Duration::from_secs(30);

pub const JITTER_MIN: f64 = 0.8;
pub const JITTER_MAX: f64 = 1.2;

/// `min(60, 2^attempt)` seconds.
pub fn rate_limit_backoff(attempt: u32) -> Duration {
    curve(2.0, attempt, RATE_LIMIT_MAX_DELAY)
}

/// `min(30, 1.5^attempt)` seconds.
pub fn server_error_backoff(attempt: u32) -> Duration {
    curve(1.5, attempt, SERVER_ERROR_MAX_DELAY)
}

fn curve(base: f64, attempt: u32, max: Duration) -> Duration {
    let secs = base.powi(attempt.min(64) as i32);
    if secs >= max.as_secs_f64() {
        max
    } else {
        Duration::from_secs_f64(secs)
    }
}

/// Interpret a `Retry-After` value: integer (or decimal) seconds, else an
/// HTTP-date measured from `now` and floored at zero. `None` when unparseable.
/// Values too large for a `Duration` saturate; callers clamp to their budget.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    if let Ok(secs) = value.parse::<f64>() {
        if secs.is_finite() {
            return Some(Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX));
        }
        return None;
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

/// Draw a multiplicative jitter factor in `[JITTER_MIN, JITTER_MAX]`.
pub fn jitter_factor() -> f64 {
    rand::thread_rng().gen_range(JITTER_MIN..=JITTER_MAX)
}

/// Scale `delay` by `factor`, saturating, and truncate to whole milliseconds
/// (the timer's resolution) so the time actually slept matches the wait.
pub fn apply_jitter(delay: Duration, factor: f64) -> Duration {
    let scaled =
        Duration::try_from_secs_f64(delay.as_secs_f64() * factor.clamp(JITTER_MIN, JITTER_MAX))
            .unwrap_or(Duration::MAX);
    Duration::from_millis(u64::try_from(scaled.as_millis()).unwrap_or(u64::MAX))
}

/// Clamp a proposed wait so that `waited + wait` never exceeds `budget`.
pub fn clamp_to_budget(wait: Duration, waited: Duration, budget: Duration) -> Duration {
    wait.min(budget.saturating_sub(waited))
}
