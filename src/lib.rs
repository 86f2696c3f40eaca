//! Herbarium label generator library.
//!
//! Fetches observation records from iNaturalist and Mushroom Observer under
//! per-provider rate and concurrency governance, and assembles them into
//! printable label data.

// Core subsystems
pub mod config;
pub mod dispatch;
pub mod governance;
pub mod net;
pub mod providers;

// Output
pub mod labels;

// Cross-cutting concerns
pub mod observability;

pub use config::schema::LabelsConfig;
pub use dispatch::{Dispatcher, RunReport};
pub use providers::{ObservationId, ObservationSource};
