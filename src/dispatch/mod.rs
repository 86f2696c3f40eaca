//! Worker pool that turns identifiers into labels.
//!
//! # Data Flow
//! ```text
//! run(inputs)
//!     → FIFO queue of (index, input)
//!     → N worker tasks, each looping:
//!         pop → ObservationId::parse → ObservationSource::fetch
//!             → LabelBuilder::build → ItemOutcome
//!     → collect outcomes as workers send them
//!     → fill any slot a crashed worker left empty
//!     → RunReport (input order) + summary event
//! ```
//!
//! # Design Decisions
//! - One item's failure never affects another; workers only stop when the
//!   queue is empty
//! - Every input yields exactly one outcome, even if its worker panicked
//! - Outcomes are reported in input order regardless of completion order

mod report;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::labels::{Label, LabelBuilder};
use crate::net::Transport;
use crate::observability::{metrics, ProgressEvent, ProgressSink};
use crate::providers::{ObservationId, ObservationSource};

pub use report::{ItemError, ItemOutcome, RunReport, RunSummary};

type Queue = Arc<Mutex<VecDeque<(usize, String)>>>;

/// Fans identifiers out to a fixed pool of workers.
pub struct Dispatcher<T: Transport, B: LabelBuilder + 'static> {
    source: Arc<ObservationSource<T>>,
    builder: Arc<B>,
    workers: usize,
    sink: Arc<dyn ProgressSink>,
}

impl<T: Transport, B: LabelBuilder + 'static> Dispatcher<T, B> {
    pub fn new(
        source: Arc<ObservationSource<T>>,
        builder: Arc<B>,
        workers: usize,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            source,
            builder,
            workers: workers.max(1),
            sink,
        }
    }

    pub fn source(&self) -> &ObservationSource<T> {
        &self.source
    }

    /// Process every input and report one outcome per input.
    pub async fn run(&self, inputs: Vec<String>) -> RunReport {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("run", %run_id, items = inputs.len());
        self.run_inner(run_id, inputs).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid, inputs: Vec<String>) -> RunReport {
        let start = Instant::now();
        let total = inputs.len();
        let worker_count = self.workers.min(total).max(1);
        tracing::info!(workers = worker_count, "Starting run");

        let mut slots: Vec<Option<ItemOutcome>> = vec![None; total];
        let queue: Queue = Arc::new(Mutex::new(inputs.iter().cloned().enumerate().collect()));
        let (results_tx, mut results) = mpsc::unbounded_channel();

        let mut workers = JoinSet::new();
        for worker_id in 0..worker_count {
            let worker = Worker {
                id: worker_id,
                total,
                queue: queue.clone(),
                results: results_tx.clone(),
                source: self.source.clone(),
                builder: self.builder.clone(),
                sink: self.sink.clone(),
            };
            workers.spawn(worker.run().in_current_span());
        }
        drop(results_tx);

        // A panicking worker loses only the item it was holding.
        while let Some(outcome) = results.recv().await {
            let index = outcome.index;
            slots[index] = Some(outcome);
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Worker task failed");
            }
        }

        let outcomes: Vec<ItemOutcome> = slots
            .into_iter()
            .zip(inputs)
            .enumerate()
            .map(|(index, (slot, input))| {
                slot.unwrap_or_else(|| {
                    self.sink.emit(ProgressEvent::ItemFailed {
                        input: input.clone(),
                        reason: ItemError::Aborted.to_string(),
                    });
                    metrics::record_item(false);
                    ItemOutcome {
                        index,
                        input,
                        result: Err(ItemError::Aborted),
                    }
                })
            })
            .collect();

        let report = RunReport::new(run_id, outcomes, start.elapsed());
        let summary = report.summary;
        tracing::info!(
            requested = summary.requested,
            succeeded = summary.succeeded,
            failed = summary.failed,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Run finished"
        );
        self.sink.emit(ProgressEvent::Summary {
            requested: summary.requested,
            succeeded: summary.succeeded,
            failed: summary.failed,
            elapsed: summary.elapsed,
        });
        report
    }
}

struct Worker<T: Transport, B> {
    id: usize,
    total: usize,
    queue: Queue,
    results: mpsc::UnboundedSender<ItemOutcome>,
    source: Arc<ObservationSource<T>>,
    builder: Arc<B>,
    sink: Arc<dyn ProgressSink>,
}

impl<T: Transport, B: LabelBuilder + 'static> Worker<T, B> {
    async fn run(self) {
        loop {
            let next = self.queue.lock().expect("dispatch queue mutex poisoned").pop_front();
            let Some((index, input)) = next else {
                break;
            };

            self.sink.emit(ProgressEvent::ItemStarted {
                index: index + 1,
                total: self.total,
                input: input.clone(),
            });
            let result = self.process(&input).await;

            match &result {
                Ok(_) => {
                    tracing::info!(worker = self.id, input = %input, "Label built");
                    self.sink.emit(ProgressEvent::ItemSucceeded {
                        input: input.clone(),
                    });
                }
                Err(e) => {
                    tracing::warn!(worker = self.id, input = %input, error = %e, "Item failed");
                    self.sink.emit(ProgressEvent::ItemFailed {
                        input: input.clone(),
                        reason: e.to_string(),
                    });
                }
            }
            metrics::record_item(result.is_ok());
            let _ = self.results.send(ItemOutcome {
                index,
                input,
                result,
            });
        }
    }

    async fn process(&self, input: &str) -> Result<Label, ItemError> {
        let id = ObservationId::parse(input)?;
        let record = self
            .source
            .fetch(id)
            .await
            .map_err(|e| ItemError::fetch(id, e))?;
        self.builder
            .build(&record)
            .map_err(|source| ItemError::Label { id, source })
    }
}
