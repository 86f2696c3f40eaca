//! Adaptive cap on in-flight upstream calls.
//!
//! # Responsibilities
//! - Block callers until fewer than `target` calls are in flight
//! - Track overload (HTTP 429) signals in a short rolling log
//! - Lower `target` by one when overloads cluster
//!
//! # Design Decisions
//! - `target` only ever decreases within a governor's lifetime; recovery
//!   needs a fresh run
//! - Permits are RAII guards, so a panicking or early-returning caller
//!   can never leak an in-flight slot
//! - A lowered target does not revoke permits already handed out; it takes
//!   effect as they are released

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

/// Overload reports that must cluster before the target is lowered.
pub const OVERLOAD_THRESHOLD: usize = 3;

/// How far back overload reports are considered.
pub const OVERLOAD_WINDOW: Duration = Duration::from_secs(10);

#[derive(Debug)]
struct ConcurrencyState {
    in_flight: usize,
    target: usize,
    overloads: VecDeque<Instant>,
}

/// Bounds simultaneous calls to one provider.
#[derive(Debug)]
pub struct ConcurrencyGovernor {
    state: Mutex<ConcurrencyState>,
    released: Notify,
}

impl ConcurrencyGovernor {
    /// Initial targets <= 0 are clamped to 1.
    pub fn new(initial_target: i64) -> Self {
        let target = initial_target.max(1) as usize;
        Self {
            state: Mutex::new(ConcurrencyState {
                in_flight: 0,
                target,
                overloads: VecDeque::with_capacity(OVERLOAD_THRESHOLD),
            }),
            released: Notify::new(),
        }
    }

    /// Wait for an in-flight slot. Never fails.
    pub async fn acquire(&self) -> ConcurrencyPermit<'_> {
        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            // Register before checking so a release between the check and the
            // await cannot be missed.
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().expect("governor mutex poisoned");
                if state.in_flight < state.target {
                    state.in_flight += 1;
                    return ConcurrencyPermit { governor: self };
                }
            }

            notified.await;
        }
    }

    fn release(&self) {
        {
            let mut state = self.state.lock().expect("governor mutex poisoned");
            state.in_flight = state.in_flight.saturating_sub(1);
        }
        self.released.notify_waiters();
    }

    /// Record an overload signal. Returns the new target when it was lowered.
    pub fn report_overload(&self) -> Option<usize> {
        self.report_overload_at(Instant::now())
    }

    fn report_overload_at(&self, now: Instant) -> Option<usize> {
        let mut state = self.state.lock().expect("governor mutex poisoned");

        while let Some(&oldest) = state.overloads.front() {
            if now.duration_since(oldest) > OVERLOAD_WINDOW {
                state.overloads.pop_front();
            } else {
                break;
            }
        }
        state.overloads.push_back(now);

        if state.overloads.len() < OVERLOAD_THRESHOLD || state.target <= 1 {
            return None;
        }

        state.target -= 1;
        // A fresh cluster is required for the next reduction.
        state.overloads.clear();
        tracing::warn!(
            new_target = state.target,
            in_flight = state.in_flight,
            "Repeated overload signals, lowering concurrency target"
        );
        Some(state.target)
    }

    pub fn target(&self) -> usize {
        self.state.lock().expect("governor mutex poisoned").target
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().expect("governor mutex poisoned").in_flight
    }
}

/// An in-flight slot; released on drop.
#[derive(Debug)]
pub struct ConcurrencyPermit<'a> {
    governor: &'a ConcurrencyGovernor,
}

impl Drop for ConcurrencyPermit<'_> {
    fn drop(&mut self) {
        self.governor.release();
    }
}
