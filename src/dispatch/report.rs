//! Per-item outcomes and run summary.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::governance::FetchError;
use crate::labels::{Label, LabelError};
use crate::providers::{IdentifierError, ObservationId};

/// Why one identifier produced no label.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ItemError {
    #[error(transparent)]
    Identifier(#[from] IdentifierError),

    #[error("{} observation {id} does not exist", .id.provider())]
    NotFound { id: ObservationId },

    #[error("{} observation {id}: {source}", .id.provider())]
    Fetch {
        id: ObservationId,
        #[source]
        source: FetchError,
    },

    #[error("cannot build label for {id}: {source}")]
    Label {
        id: ObservationId,
        #[source]
        source: LabelError,
    },

    #[error("worker aborted before finishing this item")]
    Aborted,
}

impl ItemError {
    pub(crate) fn fetch(id: ObservationId, source: FetchError) -> Self {
        if source.is_not_found() {
            ItemError::NotFound { id }
        } else {
            ItemError::Fetch { id, source }
        }
    }
}

/// Result for one input, in submission position `index`.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemOutcome {
    pub index: usize,
    pub input: String,
    pub result: Result<Label, ItemError>,
}

impl ItemOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub requested: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

/// Everything a run produced. `outcomes` follows input order.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub outcomes: Vec<ItemOutcome>,
    pub summary: RunSummary,
}

impl RunReport {
    pub(crate) fn new(run_id: Uuid, outcomes: Vec<ItemOutcome>, elapsed: Duration) -> Self {
        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        let summary = RunSummary {
            requested: outcomes.len(),
            succeeded,
            failed: outcomes.len() - succeeded,
            elapsed,
        };
        Self {
            run_id,
            outcomes,
            summary,
        }
    }

    pub fn labels(&self) -> Vec<Label> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok().cloned())
            .collect()
    }

    /// `(input, error)` for every failed item.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &ItemError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.input.as_str(), e)))
    }

    pub fn all_succeeded(&self) -> bool {
        self.summary.failed == 0
    }
}
