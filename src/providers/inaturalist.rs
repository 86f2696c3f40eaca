//! iNaturalist API v1: observations and batched taxon lookups.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::governance::{BatchSource, FetchError, ResourceCoalescer, RetryingFetcher};
use crate::net::Transport;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

/// The observation fields used on a label.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct InatObservation {
    pub id: u64,
    #[serde(default)]
    pub taxon: Option<TaxonSummary>,
    #[serde(default)]
    pub place_guess: Option<String>,
    #[serde(default)]
    pub geojson: Option<GeoPoint>,
    #[serde(default)]
    pub positional_accuracy: Option<f64>,
    #[serde(default)]
    pub observed_on_string: Option<String>,
    #[serde(default)]
    pub observed_on: Option<String>,
    #[serde(default)]
    pub user: Option<InatUser>,
    /// Observation field values.
    #[serde(default)]
    pub ofvs: Vec<FieldValue>,
    #[serde(default)]
    pub description: Option<String>,
}

impl InatObservation {
    /// Case-insensitive observation field lookup, rendered as text.
    pub fn field(&self, name: &str) -> Option<String> {
        self.ofvs
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
            .and_then(|f| match &f.value {
                Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
                Some(Value::Null) | None => None,
                Some(Value::String(_)) => None,
                Some(other) => Some(other.to_string()),
            })
    }

    pub fn ancestor_ids(&self) -> &[u64] {
        self.taxon
            .as_ref()
            .map(|t| t.ancestor_ids.as_slice())
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TaxonSummary {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub rank: Option<String>,
    #[serde(default)]
    pub preferred_common_name: Option<String>,
    #[serde(default)]
    pub ancestor_ids: Vec<u64>,
}

/// GeoJSON point; coordinates are `[longitude, latitude]`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GeoPoint {
    #[serde(default)]
    pub coordinates: Vec<f64>,
}

impl GeoPoint {
    pub fn lat_lon(&self) -> Option<(f64, f64)> {
        match self.coordinates.as_slice() {
            [lon, lat, ..] => Some((*lat, *lon)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct InatUser {
    pub login: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FieldValue {
    pub name: String,
    #[serde(default)]
    pub value: Option<Value>,
}

/// One taxon from the batched taxa endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Taxon {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub rank: Option<String>,
    #[serde(default)]
    pub preferred_common_name: Option<String>,
}

impl Taxon {
    /// Both name and rank present.
    pub fn is_complete(&self) -> bool {
        self.name.is_some() && self.rank.is_some()
    }
}

/// `GET {base}/observations/{id}`; the record is `results[0]`.
pub async fn fetch_observation<T: Transport>(
    fetcher: &RetryingFetcher<T>,
    base_url: &str,
    id: u64,
) -> Result<InatObservation, FetchError> {
    let url = format!("{base_url}/observations/{id}");
    let body = fetcher.fetch(&url).await?;
    let envelope: Envelope<InatObservation> =
        serde_json::from_value(body).map_err(|e| FetchError::Parse {
            url: url.clone(),
            reason: e.to_string(),
        })?;
    envelope
        .results
        .into_iter()
        .next()
        .ok_or(FetchError::NotFound { url })
}

/// Resolve the observation's ancestor taxa through the coalescer.
pub async fn resolve_ancestors<T: Transport>(
    taxa: &ResourceCoalescer<TaxonSource<T>>,
    observation: &InatObservation,
) -> Vec<Taxon> {
    let ids = observation.ancestor_ids();
    if ids.is_empty() {
        return Vec::new();
    }
    let resolved = taxa.resolve_many(ids).await;
    let found: Vec<Taxon> = resolved.into_iter().flatten().collect();
    if found.len() < ids.len() {
        tracing::debug!(
            observation = observation.id,
            requested = ids.len(),
            resolved = found.len(),
            "Some ancestor taxa could not be resolved"
        );
    }
    found
}

/// Batched `GET {base}/taxa/{id,id,...}` behind the iNaturalist fetcher.
pub struct TaxonSource<T: Transport> {
    fetcher: Arc<RetryingFetcher<T>>,
    base_url: String,
}

impl<T: Transport> TaxonSource<T> {
    pub fn new(fetcher: Arc<RetryingFetcher<T>>, base_url: impl Into<String>) -> Self {
        Self {
            fetcher,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn batch_url(&self, keys: &[u64]) -> String {
        let ids: Vec<String> = keys.iter().map(u64::to_string).collect();
        format!("{}/taxa/{}?per_page={}", self.base_url, ids.join(","), keys.len())
    }
}

impl<T: Transport> BatchSource for TaxonSource<T> {
    type Key = u64;
    type Value = Taxon;

    async fn fetch_batch(&self, keys: &[u64]) -> Result<HashMap<u64, Taxon>, FetchError> {
        let url = self.batch_url(keys);
        let body = match self.fetcher.fetch(&url).await {
            Ok(body) => body,
            // Every requested id is unknown.
            Err(FetchError::NotFound { .. }) => return Ok(HashMap::new()),
            Err(e) => return Err(e),
        };
        let envelope: Envelope<Taxon> = serde_json::from_value(body)
            .map_err(|e| FetchError::Parse { url, reason: e.to_string() })?;
        Ok(envelope.results.into_iter().map(|t| (t.id, t)).collect())
    }

    fn is_complete(&self, value: &Taxon) -> bool {
        value.is_complete()
    }
}
