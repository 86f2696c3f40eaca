//! Sliding-window admission control with burst allowance.
//!
//! # Algorithm
//! ```text
//! admit():
//!   lock
//!     prune admissions older than 60s
//!     fewer than `burst` recent admissions → admit now (no spacing)
//!     otherwise:
//!       at = max(now, next_allowed)
//!       while the window ending at `at` is full → at = oldest_in_window + 60s
//!       record `at`, next_allowed = at + min_interval
//!   unlock
//!   sleep until `at`
//! ```
//!
//! # Design Decisions
//! - Admissions are recorded as reservations while the lock is held, so
//!   concurrent callers see each other's future slots
//! - The sleep happens outside the lock
//! - A budget of zero or less disables limiting entirely

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};

/// Length of the rolling window.
pub const WINDOW: Duration = Duration::from_secs(60);

/// Request budget for one provider. Immutable after construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateBudget {
    requests_per_window: usize,
    burst: usize,
    min_interval: Duration,
}

impl RateBudget {
    /// `None` when `requests_per_minute <= 0` (limiting disabled).
    pub fn new(requests_per_minute: i64, burst: u32) -> Option<Self> {
        if requests_per_minute <= 0 {
            return None;
        }
        let requests_per_window = requests_per_minute as usize;
        Some(Self {
            requests_per_window,
            burst: (burst as usize).min(requests_per_window),
            min_interval: interval_for(requests_per_window),
        })
    }

    pub fn requests_per_window(&self) -> usize {
        self.requests_per_window
    }

    pub fn burst(&self) -> usize {
        self.burst
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}

/// `WINDOW / requests`, computed in nanoseconds so very large rates do not
/// truncate.
fn interval_for(requests: usize) -> Duration {
    let nanos = WINDOW.as_nanos() / requests.max(1) as u128;
    Duration::from_nanos(nanos as u64)
}

#[derive(Debug, Default)]
struct WindowState {
    /// Admission instants, oldest first. May include reserved future slots.
    admissions: VecDeque<Instant>,
    next_allowed: Option<Instant>,
}

impl WindowState {
    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.admissions.front() {
            if oldest + WINDOW <= now {
                self.admissions.pop_front();
            } else {
                break;
            }
        }
    }

    fn record(&mut self, at: Instant) {
        let idx = self.admissions.partition_point(|t| *t <= at);
        self.admissions.insert(idx, at);
    }

    /// Earliest instant >= `at` at which the window has room for one more.
    fn first_open_slot(&self, mut at: Instant, capacity: usize) -> Instant {
        loop {
            let mut in_window = self.admissions.iter().filter(move |t| **t + WINDOW > at);
            let count = in_window.clone().count();
            if count < capacity {
                return at;
            }
            match in_window.next() {
                Some(&oldest) => at = oldest + WINDOW,
                None => return at,
            }
        }
    }
}

/// Rolling-minute limiter shared by every caller of one provider.
#[derive(Debug)]
pub struct RateWindow {
    budget: Option<RateBudget>,
    state: Mutex<WindowState>,
}

impl RateWindow {
    pub fn new(budget: Option<RateBudget>) -> Self {
        Self {
            budget,
            state: Mutex::new(WindowState::default()),
        }
    }

    /// A window that admits everything immediately.
    pub fn unlimited() -> Self {
        Self::new(None)
    }

    pub fn budget(&self) -> Option<RateBudget> {
        self.budget
    }

    /// Wait until a call may start, then return its admission instant.
    pub async fn admit(&self) -> Instant {
        let now = Instant::now();
        let at = self.reserve(now);
        if at > now {
            sleep_until(at).await;
        }
        at
    }

    /// Reserve the next admission slot at or after `now`.
    fn reserve(&self, now: Instant) -> Instant {
        let Some(budget) = self.budget else {
            return now;
        };

        let mut state = self.state.lock().expect("rate window mutex poisoned");
        state.prune(now);

        if state.admissions.len() < budget.burst {
            state.record(now);
            return now;
        }

        let candidate = state.next_allowed.map_or(now, |next| next.max(now));
        let at = state.first_open_slot(candidate, budget.requests_per_window);
        state.record(at);
        state.next_allowed = Some(at + budget.min_interval);

        if at > now {
            tracing::debug!(
                delay_ms = (at - now).as_millis() as u64,
                in_window = state.admissions.len(),
                "Smoothing admission"
            );
        }
        at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_budget_construction() {
        assert!(RateBudget::new(0, 10).is_none());
        assert!(RateBudget::new(-5, 10).is_none());

        let budget = RateBudget::new(60, 10).unwrap();
        assert_eq!(budget.min_interval(), Duration::from_secs(1));
        assert_eq!(budget.burst(), 10);

        // Burst can never exceed the window capacity.
        assert_eq!(RateBudget::new(5, 50).unwrap().burst(), 5);
    }

    #[test]
    fn test_huge_rates_keep_a_sane_interval() {
        let budget = RateBudget::new(1 << 32, 10).unwrap();
        assert_eq!(budget.min_interval(), Duration::from_nanos(13));
        assert_eq!(budget.burst(), 10);

        let budget = RateBudget::new((1 << 32) + 60, 10).unwrap();
        assert!(budget.min_interval() < Duration::from_nanos(14));

        let budget = RateBudget::new(i64::MAX, u32::MAX).unwrap();
        assert_eq!(budget.min_interval(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_never_sleeps() {
        let window = RateWindow::new(RateBudget::new(60, 10));
        let start = Instant::now();
        for _ in 0..10 {
            let at = window.admit().await;
            assert_eq!(at, start);
        }
        assert_eq!(Instant::now(), start);
    }

    #[tokio::test(start_paused = true)]
    async fn test_smoothing_after_burst() {
        let window = RateWindow::new(RateBudget::new(60, 2));
        let start = Instant::now();
        window.admit().await;
        window.admit().await;

        // Past the burst: spaced by the 1s minimum interval.
        let third = window.admit().await;
        let fourth = window.admit().await;
        assert_eq!(third, start);
        assert_eq!(fourth - third, Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_exceeds_budget_in_any_window() {
        let window = Arc::new(RateWindow::new(RateBudget::new(5, 3)));
        let mut handles = Vec::new();
        for _ in 0..17 {
            let window = window.clone();
            handles.push(tokio::spawn(async move { window.admit().await }));
        }
        let mut stamps = Vec::new();
        for h in handles {
            stamps.push(h.await.unwrap());
        }
        stamps.sort();

        for (i, start) in stamps.iter().enumerate() {
            let in_window = stamps[i..]
                .iter()
                .take_while(|t| **t < *start + WINDOW)
                .count();
            assert!(in_window <= 5, "{in_window} admissions within 60s of {i}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_is_pass_through() {
        let window = RateWindow::unlimited();
        let start = Instant::now();
        for _ in 0..1000 {
            window.admit().await;
        }
        assert_eq!(Instant::now(), start);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_refills_after_window() {
        let window = RateWindow::new(RateBudget::new(60, 3));
        for _ in 0..3 {
            window.admit().await;
        }
        tokio::time::sleep(WINDOW + Duration::from_millis(1)).await;

        let before = Instant::now();
        for _ in 0..3 {
            assert_eq!(window.admit().await, before);
        }
    }

    #[test]
    fn test_first_open_slot_waits_for_oldest() {
        let base = Instant::now();
        let mut state = WindowState::default();
        state.record(base);
        state.record(base + Duration::from_secs(10));

        assert_eq!(state.first_open_slot(base + Duration::from_secs(20), 2), base + WINDOW);
        assert_eq!(state.first_open_slot(base + Duration::from_secs(20), 3), base + Duration::from_secs(20));
    }
}
