//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, stderr)
//!     → metrics.rs (counters, gauges)
//!     → progress.rs (human-readable lines for the CLI / front-end, stdout)
//! ```
//!
//! # Design Decisions
//! - Progress lines are a product interface, not logging; they go through an
//!   injected `ProgressSink` so quiet mode and embedding stay explicit
//! - Logging and metrics are ambient and global

pub mod logging;
pub mod metrics;
pub mod progress;

pub use progress::{ChannelSink, ConsoleSink, NullSink, ProgressEvent, ProgressSink, Stream};
