//! Outbound request governance.
//!
//! # Data Flow
//! ```text
//! worker
//!     → RetryingFetcher::fetch(url)                      (retries.rs)
//!         per attempt:
//!         → RateWindow::admit()          (rate_window.rs, may sleep)
//!         → ConcurrencyGovernor::acquire (concurrency.rs, may block)
//!         → Transport::get(url)          (net/, per-call timeout)
//!         → classify                     (outcome.rs)
//!         → transient? backoff + jitter, clamp to budget (backoff.rs), retry
//!     → payload | FetchError
//!
//! ancestor lookups:
//!     → ResourceCoalescer::resolve(key)                  (coalescer.rs)
//!         → one batched RetryingFetcher call per window
//! ```
//!
//! # Design Decisions
//! - One `GovernanceContext` per run owns every piece of mutable state
//! - Each provider gets its own rate window and governor
//! - Each component guards its state with its own lock; locks are never nested
//! - No cancellation token: suspensions end with the process

pub mod backoff;
pub mod coalescer;
pub mod concurrency;
pub mod context;
pub mod outcome;
pub mod rate_window;
pub mod retries;

pub use coalescer::{BatchPolicy, BatchSource, ResourceCoalescer};
pub use concurrency::{ConcurrencyGovernor, ConcurrencyPermit};
pub use context::GovernanceContext;
pub use outcome::{classify, FetchError, FetchOutcome};
pub use rate_window::{RateBudget, RateWindow};
pub use retries::{RetryPolicy, RetryingFetcher};
