//! Request coalescing for shared secondary resources.
//!
//! # Data Flow
//! ```text
//! resolve(key)
//!     → cache hit (complete or absent)        → return
//!     → in-flight for key                     → wait on its watch channel
//!     → otherwise register in-flight, enqueue → wait on new watch channel
//!
//! batcher task (owns the queue receiver):
//!     first key → collect until window elapses or max_batch reached
//!     → spawn complete_batch(keys)
//!         → one fetch_batch(keys) upstream call
//!         → cache every key (omitted ones as absent), then signal waiters
//! ```
//!
//! # Design Decisions
//! - Cache and in-flight registry share one lock, so a key is either cached,
//!   in flight, or unknown, never two at once
//! - Only the first caller for a key enqueues it; the batcher never sees
//!   duplicates
//! - A failed batch resolves every key in it as absent
//! - Values the source reports as incomplete are returned but fetched again
//!   on a later resolve
//! - The batcher exits when the coalescer is dropped

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::join_all;
use futures_util::FutureExt;
use tokio::sync::{mpsc, watch};

use crate::config::CoalescerConfig;
use crate::governance::outcome::FetchError;
use crate::observability::metrics;

/// An upstream endpoint that can look up many keys in one call.
pub trait BatchSource: Send + Sync + 'static {
    type Key: Clone + Eq + Hash + Debug + Send + Sync + 'static;
    type Value: Clone + Send + Sync + 'static;

    /// Fetch every key in `keys`. Keys missing from the map are absent upstream.
    fn fetch_batch(
        &self,
        keys: &[Self::Key],
    ) -> impl Future<Output = Result<HashMap<Self::Key, Self::Value>, FetchError>> + Send;

    /// Whether a cached value has the full expected shape.
    fn is_complete(&self, _value: &Self::Value) -> bool {
        true
    }
}

#[derive(Debug, Clone)]
enum Slot<V> {
    Pending,
    Resolved(Option<V>),
}

struct Registry<K, V> {
    cache: HashMap<K, Option<V>>,
    inflight: HashMap<K, watch::Sender<Slot<V>>>,
}

type SharedRegistry<S> =
    Arc<Mutex<Registry<<S as BatchSource>::Key, <S as BatchSource>::Value>>>;

/// Batch window and size cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    pub window: Duration,
    pub max_batch: usize,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self::from(&CoalescerConfig::default())
    }
}

impl From<&CoalescerConfig> for BatchPolicy {
    fn from(config: &CoalescerConfig) -> Self {
        Self {
            window: Duration::from_millis(config.window_ms),
            max_batch: config.max_batch.max(1),
        }
    }
}

/// Deduplicating, batching cache in front of a [`BatchSource`].
pub struct ResourceCoalescer<S: BatchSource> {
    source: Arc<S>,
    registry: SharedRegistry<S>,
    queue: mpsc::UnboundedSender<S::Key>,
}

impl<S: BatchSource> ResourceCoalescer<S> {
    /// Start the batcher. Must be called inside a tokio runtime.
    pub fn new(source: Arc<S>, policy: BatchPolicy) -> Self {
        let registry = Arc::new(Mutex::new(Registry {
            cache: HashMap::new(),
            inflight: HashMap::new(),
        }));
        let (queue, rx) = mpsc::unbounded_channel();

        tokio::spawn(run_batcher(source.clone(), registry.clone(), rx, policy));

        Self {
            source,
            registry,
            queue,
        }
    }

    /// Resolve one key, sharing any upstream call already under way for it.
    pub async fn resolve(&self, key: S::Key) -> Option<S::Value> {
        let mut rx = {
            let mut registry = self.registry.lock().expect("coalescer mutex poisoned");

            if let Some(entry) = registry.cache.get(&key) {
                match entry {
                    None => {
                        metrics::record_cache_hit();
                        return None;
                    }
                    Some(value) if self.source.is_complete(value) => {
                        metrics::record_cache_hit();
                        return Some(value.clone());
                    }
                    Some(_) => {}
                }
            }

            match registry.inflight.get(&key) {
                Some(tx) => tx.subscribe(),
                None => {
                    let (tx, rx) = watch::channel(Slot::Pending);
                    if self.queue.send(key.clone()).is_err() {
                        tracing::warn!(?key, "Batcher stopped, resolving as absent");
                        return None;
                    }
                    registry.inflight.insert(key, tx);
                    rx
                }
            }
        };

        let result = match rx.wait_for(|slot| matches!(slot, Slot::Resolved(_))).await {
            Ok(slot) => match &*slot {
                Slot::Resolved(value) => value.clone(),
                Slot::Pending => None,
            },
            Err(_) => None,
        };
        result
    }

    /// Resolve several keys concurrently; results follow the input order.
    pub async fn resolve_many(&self, keys: &[S::Key]) -> Vec<Option<S::Value>> {
        join_all(keys.iter().cloned().map(|key| self.resolve(key))).await
    }

    pub fn cached_len(&self) -> usize {
        self.registry.lock().expect("coalescer mutex poisoned").cache.len()
    }
}

async fn run_batcher<S: BatchSource>(
    source: Arc<S>,
    registry: SharedRegistry<S>,
    mut rx: mpsc::UnboundedReceiver<S::Key>,
    policy: BatchPolicy,
) {
    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        let deadline = tokio::time::sleep(policy.window);
        tokio::pin!(deadline);

        while batch.len() < policy.max_batch {
            tokio::select! {
                key = rx.recv() => match key {
                    Some(key) => batch.push(key),
                    None => break,
                },
                _ = &mut deadline => break,
            }
        }

        metrics::record_batch(batch.len());
        tracing::debug!(size = batch.len(), "Dispatching coalesced batch");
        tokio::spawn(complete_batch(source.clone(), registry.clone(), batch));
    }
    tracing::debug!("Coalescer batcher stopped");
}

async fn complete_batch<S: BatchSource>(source: Arc<S>, registry: SharedRegistry<S>, batch: Vec<S::Key>) {
    let fetched = AssertUnwindSafe(source.fetch_batch(&batch)).catch_unwind().await;
    let mut found = match fetched {
        Ok(Ok(found)) => found,
        Ok(Err(e)) => {
            tracing::warn!(size = batch.len(), error = %e, "Batched lookup failed");
            HashMap::new()
        }
        Err(_) => {
            tracing::error!(size = batch.len(), "Batched lookup panicked");
            HashMap::new()
        }
    };

    let mut registry = registry.lock().expect("coalescer mutex poisoned");
    for key in batch {
        // An earlier partial value beats nothing.
        let value = found
            .remove(&key)
            .or_else(|| registry.cache.get(&key).cloned().flatten());
        registry.cache.insert(key.clone(), value.clone());
        if let Some(tx) = registry.inflight.remove(&key) {
            tx.send_replace(Slot::Resolved(value));
        }
    }
}
