//! Upstream observation providers.
//!
//! # Data Flow
//! ```text
//! raw input ("12345", "mo:678", observation URL)
//!     → ObservationId::parse (this module)
//!     → ObservationSource::fetch
//!         → inaturalist.rs  (observation, then coalesced ancestor taxa)
//!         → mushroom_observer.rs (observation, id-only listing fallback)
//!     → ObservationRecord (handed to the label builder)
//! ```
//!
//! # Design Decisions
//! - Every provider call goes through that provider's `RetryingFetcher`
//! - Payloads are decoded into typed records here; a shape mismatch is a
//!   terminal parse error, never a retry
//! - Only the ancestor lookup is coalesced

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::config::LabelsConfig;
use crate::governance::{FetchError, GovernanceContext};
use crate::net::Transport;
use crate::observability::ProgressSink;

pub mod inaturalist;
pub mod mushroom_observer;

pub use inaturalist::{InatObservation, Taxon, TaxonSource};
pub use mushroom_observer::MoObservation;

/// The two upstream services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Provider {
    INaturalist,
    MushroomObserver,
}

impl Provider {
    pub fn name(&self) -> &'static str {
        match self {
            Provider::INaturalist => "iNaturalist",
            Provider::MushroomObserver => "Mushroom Observer",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Rejected observation input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    #[error("empty observation input")]
    Empty,

    #[error("invalid observation input: {0}")]
    Invalid(String),
}

/// A normalized observation reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ObservationId {
    INaturalist(u64),
    MushroomObserver(u64),
}

impl ObservationId {
    /// Normalize a user-supplied identifier.
    ///
    /// Accepts bare digits (iNaturalist), `mo:<n>`, `MO<n>` and `mo <n>`
    /// (Mushroom Observer), and observation URLs from either site.
    pub fn parse(input: &str) -> Result<Self, IdentifierError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(IdentifierError::Empty);
        }
        let invalid = || IdentifierError::Invalid(trimmed.to_string());
        let lower = trimmed.to_ascii_lowercase();

        if lower.contains("://") {
            return parse_url(trimmed).ok_or_else(invalid);
        }

        if let Some(rest) = lower.strip_prefix("mo") {
            let rest = rest.strip_prefix(':').unwrap_or(rest).trim();
            return parse_number(rest)
                .map(ObservationId::MushroomObserver)
                .ok_or_else(invalid);
        }

        parse_number(trimmed)
            .map(ObservationId::INaturalist)
            .ok_or_else(invalid)
    }

    pub fn provider(&self) -> Provider {
        match self {
            ObservationId::INaturalist(_) => Provider::INaturalist,
            ObservationId::MushroomObserver(_) => Provider::MushroomObserver,
        }
    }

    pub fn number(&self) -> u64 {
        match self {
            ObservationId::INaturalist(n) | ObservationId::MushroomObserver(n) => *n,
        }
    }

    /// Public web page for the observation.
    pub fn web_url(&self) -> String {
        match self {
            ObservationId::INaturalist(n) => format!("https://www.inaturalist.org/observations/{n}"),
            ObservationId::MushroomObserver(n) => format!("https://mushroomobserver.org/obs/{n}"),
        }
    }
}

impl fmt::Display for ObservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObservationId::INaturalist(n) => write!(f, "{n}"),
            ObservationId::MushroomObserver(n) => write!(f, "MO{n}"),
        }
    }
}

impl FromStr for ObservationId {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn parse_number(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn parse_url(input: &str) -> Option<ObservationId> {
    let url = Url::parse(input).ok()?;
    let host = url.host_str()?.to_ascii_lowercase();
    let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();

    if host.ends_with("inaturalist.org") {
        let idx = segments.iter().position(|s| *s == "observations")?;
        return parse_number(segments.get(idx + 1)?).map(ObservationId::INaturalist);
    }
    if host.ends_with("mushroomobserver.org") {
        return parse_number(segments.last()?).map(ObservationId::MushroomObserver);
    }
    None
}

/// A fetched observation, ready for label building.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ObservationRecord {
    INaturalist {
        observation: InatObservation,
        /// Resolved ancestor taxa, root first. Unresolvable ancestors are skipped.
        ancestors: Vec<Taxon>,
    },
    MushroomObserver {
        number: u64,
        observation: MoObservation,
    },
}

/// Fetches observations from whichever provider an identifier belongs to.
pub struct ObservationSource<T: Transport> {
    governance: GovernanceContext<T>,
    inaturalist_base: String,
    mushroom_observer_base: String,
}

impl<T: Transport> ObservationSource<T> {
    /// Build the per-run governance for both providers.
    pub fn new(config: &LabelsConfig, transport: Arc<T>, sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            governance: GovernanceContext::new(config, transport, sink),
            inaturalist_base: config.inaturalist.base_url.trim_end_matches('/').to_string(),
            mushroom_observer_base: config
                .mushroom_observer
                .base_url
                .trim_end_matches('/')
                .to_string(),
        }
    }

    pub fn governance(&self) -> &GovernanceContext<T> {
        &self.governance
    }

    pub async fn fetch(&self, id: ObservationId) -> Result<ObservationRecord, FetchError> {
        match id {
            ObservationId::INaturalist(number) => {
                let fetcher = self.governance.fetcher(Provider::INaturalist);
                let observation =
                    inaturalist::fetch_observation(fetcher, &self.inaturalist_base, number).await?;
                let ancestors = inaturalist::resolve_ancestors(self.governance.taxa(), &observation).await;
                Ok(ObservationRecord::INaturalist {
                    observation,
                    ancestors,
                })
            }
            ObservationId::MushroomObserver(number) => {
                let fetcher = self.governance.fetcher(Provider::MushroomObserver);
                let observation =
                    mushroom_observer::fetch_observation(fetcher, &self.mushroom_observer_base, number)
                        .await?;
                Ok(ObservationRecord::MushroomObserver {
                    number,
                    observation,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_digits_are_inaturalist() {
        assert_eq!(ObservationId::parse("12345"), Ok(ObservationId::INaturalist(12345)));
        assert_eq!(ObservationId::parse("  987 "), Ok(ObservationId::INaturalist(987)));
    }

    #[test]
    fn test_mushroom_observer_prefixes() {
        assert_eq!(ObservationId::parse("mo:42"), Ok(ObservationId::MushroomObserver(42)));
        assert_eq!(ObservationId::parse("MO:  42"), Ok(ObservationId::MushroomObserver(42)));
        assert_eq!(ObservationId::parse("MO42"), Ok(ObservationId::MushroomObserver(42)));
        assert_eq!(ObservationId::parse("mo 42"), Ok(ObservationId::MushroomObserver(42)));
    }

    #[test]
    fn test_urls() {
        assert_eq!(
            ObservationId::parse("https://www.inaturalist.org/observations/151234567"),
            Ok(ObservationId::INaturalist(151234567))
        );
        assert_eq!(
            ObservationId::parse("https://inaturalist.org/observations/77?tab=ids"),
            Ok(ObservationId::INaturalist(77))
        );
        assert_eq!(
            ObservationId::parse("https://mushroomobserver.org/obs/555"),
            Ok(ObservationId::MushroomObserver(555))
        );
        assert_eq!(
            ObservationId::parse("https://mushroomobserver.org/555"),
            Ok(ObservationId::MushroomObserver(555))
        );
        assert_eq!(
            ObservationId::parse("https://mushroomobserver.org/observations/555/"),
            Ok(ObservationId::MushroomObserver(555))
        );
    }

    #[test]
    fn test_invalid_inputs() {
        assert_eq!(ObservationId::parse(""), Err(IdentifierError::Empty));
        assert_eq!(
            ObservationId::parse("abc"),
            Err(IdentifierError::Invalid("abc".into()))
        );
        assert!(ObservationId::parse("moinat12").is_err());
        assert!(ObservationId::parse("https://example.com/observations/12").is_err());
        assert!(ObservationId::parse("https://www.inaturalist.org/people/12").is_err());
        assert!(ObservationId::parse("99999999999999999999999").is_err());
    }

    #[test]
    fn test_display_and_urls() {
        let inat = ObservationId::INaturalist(12);
        let mo = ObservationId::MushroomObserver(34);
        assert_eq!(inat.to_string(), "12");
        assert_eq!(mo.to_string(), "MO34");
        assert_eq!(mo.web_url(), "https://mushroomobserver.org/obs/34");
        assert_eq!(inat.provider().name(), "iNaturalist");
    }
}
