//! Mushroom Observer API v2 observations.
//!
//! The detail endpoint sometimes answers with an id-only listing
//! (`"results": [1234]`); the record is then fetched through the `ids=`
//! query form instead.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::governance::{FetchError, RetryingFetcher};
use crate::net::Transport;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MoName {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MoOwner {
    #[serde(default)]
    pub login_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MoSequence {
    #[serde(default)]
    pub locus: Option<String>,
    #[serde(default)]
    pub bases: Option<String>,
}

impl MoSequence {
    /// Base count with whitespace removed.
    pub fn base_pairs(&self) -> usize {
        self.bases
            .as_deref()
            .map_or(0, |b| b.chars().filter(|c| !c.is_whitespace()).count())
    }
}

/// The observation fields used on a label.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MoObservation {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub consensus: Option<MoName>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub owner: Option<MoOwner>,
    #[serde(default)]
    pub login_name: Option<String>,
    #[serde(default)]
    pub herbarium_name: Option<String>,
    /// Catalog number; the API sends either a string or a number.
    #[serde(default)]
    pub herbarium_id: Option<Value>,
    #[serde(default)]
    pub sequences: Vec<MoSequence>,
}

impl MoObservation {
    pub fn scientific_name(&self) -> Option<&str> {
        self.consensus
            .as_ref()
            .and_then(|c| c.name.as_deref())
            .or(self.name.as_deref())
    }

    pub fn login(&self) -> Option<&str> {
        self.owner
            .as_ref()
            .and_then(|o| o.login_name.as_deref())
            .or(self.login_name.as_deref())
    }

    pub fn herbarium_catalog_number(&self) -> Option<String> {
        match self.herbarium_id.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

/// Fetch one observation, following the id-only listing when needed.
pub async fn fetch_observation<T: Transport>(
    fetcher: &RetryingFetcher<T>,
    base_url: &str,
    id: u64,
) -> Result<MoObservation, FetchError> {
    let url = format!("{base_url}/observations/{id}.json?detail=high");
    let first = first_result(fetcher.fetch(&url).await?);

    let (url, record) = match first {
        Some(Value::Number(_)) => {
            let url = format!("{base_url}/observations?ids={id}&detail=high");
            tracing::debug!(id, "Id-only listing, fetching full record");
            let record = first_result(fetcher.fetch(&url).await?);
            (url, record)
        }
        other => (url, other),
    };

    match record {
        Some(value @ Value::Object(_)) => {
            serde_json::from_value(value).map_err(|e| FetchError::Parse {
                url,
                reason: e.to_string(),
            })
        }
        _ => Err(FetchError::NotFound { url }),
    }
}

fn first_result(body: Value) -> Option<Value> {
    match body {
        Value::Object(mut map) => match map.remove("results")? {
            Value::Array(results) => results.into_iter().next(),
            _ => None,
        },
        _ => None,
    }
}
