//! Per-run governance state.
//!
//! One context is built per run and dropped with it. Nothing here is global,
//! so concurrent runs (and tests) never share budgets or caches.

use std::sync::Arc;

use crate::config::{LabelsConfig, ProviderConfig};
use crate::governance::coalescer::{BatchPolicy, ResourceCoalescer};
use crate::governance::concurrency::ConcurrencyGovernor;
use crate::governance::rate_window::{RateBudget, RateWindow};
use crate::governance::retries::{RetryPolicy, RetryingFetcher};
use crate::net::Transport;
use crate::observability::{metrics, ProgressSink};
use crate::providers::{Provider, TaxonSource};

/// Rate windows, governors and fetchers for both providers, plus the taxon
/// coalescer.
pub struct GovernanceContext<T: Transport> {
    inaturalist: Arc<RetryingFetcher<T>>,
    mushroom_observer: Arc<RetryingFetcher<T>>,
    taxa: ResourceCoalescer<TaxonSource<T>>,
}

impl<T: Transport> GovernanceContext<T> {
    /// Must be called inside a tokio runtime (the coalescer spawns its batcher).
    pub fn new(config: &LabelsConfig, transport: Arc<T>, sink: Arc<dyn ProgressSink>) -> Self {
        let policy = RetryPolicy::from(&config.retry);

        let inaturalist = Arc::new(build_fetcher(
            Provider::INaturalist,
            &config.inaturalist,
            transport.clone(),
            policy.clone(),
            sink.clone(),
        ));
        let mushroom_observer = Arc::new(build_fetcher(
            Provider::MushroomObserver,
            &config.mushroom_observer,
            transport,
            policy,
            sink,
        ));

        let taxa = ResourceCoalescer::new(
            Arc::new(TaxonSource::new(inaturalist.clone(), &config.inaturalist.base_url)),
            BatchPolicy::from(&config.coalescer),
        );

        Self {
            inaturalist,
            mushroom_observer,
            taxa,
        }
    }

    pub fn fetcher(&self, provider: Provider) -> &RetryingFetcher<T> {
        match provider {
            Provider::INaturalist => &self.inaturalist,
            Provider::MushroomObserver => &self.mushroom_observer,
        }
    }

    pub fn taxa(&self) -> &ResourceCoalescer<TaxonSource<T>> {
        &self.taxa
    }
}

fn build_fetcher<T: Transport>(
    provider: Provider,
    config: &ProviderConfig,
    transport: Arc<T>,
    policy: RetryPolicy,
    sink: Arc<dyn ProgressSink>,
) -> RetryingFetcher<T> {
    let budget = RateBudget::new(config.requests_per_minute, config.burst);
    if budget.is_none() {
        tracing::info!(provider = provider.name(), "Rate limiting disabled");
    }
    let governor = ConcurrencyGovernor::new(config.concurrency);
    metrics::record_concurrency_target(provider.name(), governor.target());

    RetryingFetcher::new(
        provider.name(),
        transport,
        Arc::new(RateWindow::new(budget)),
        Arc::new(governor),
        policy,
        sink,
    )
}
