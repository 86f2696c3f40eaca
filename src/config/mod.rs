//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → overrides.rs (CLI flags / LABELS_* environment variables)
//!     → validation.rs (semantic checks)
//!     → LabelsConfig (validated, immutable for the run)
//!     → consumed once when the run context is built
//! ```
//!
//! # Design Decisions
//! - Config is immutable once a run starts
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod overrides;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use overrides::ConfigOverrides;
pub use schema::{
    CoalescerConfig, DispatchConfig, LabelsConfig, ObservabilityConfig, ProviderConfig,
    RetryConfig,
};
pub use validation::{validate_config, ValidationError};
