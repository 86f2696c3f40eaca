//! Retrying fetch of a single upstream resource.
//!
//! # Responsibilities
//! - Obtain rate and concurrency clearance for every attempt
//! - Classify each response and retry transient failures with jittered backoff
//! - Cap total backoff per logical fetch, and the number of attempts
//! - Report rate-limit, server-error and patience notices to the progress sink
//!
//! # Design Decisions
//! - The concurrency permit covers only the network call, never the backoff sleep
//! - `Retry-After` wins over the computed curve when it parses
//! - 404, unreadable bodies and unexpected statuses are terminal immediately
//! - Every network call is wrapped in the per-call timeout here, independent of
//!   whatever the transport enforces

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::time::Instant;

use crate::config::RetryConfig;
use crate::governance::backoff::{
    apply_jitter, clamp_to_budget, jitter_factor, parse_retry_after, rate_limit_backoff,
    server_error_backoff,
};
use crate::governance::concurrency::ConcurrencyGovernor;
use crate::governance::outcome::{classify, FetchError, FetchOutcome};
use crate::governance::rate_window::RateWindow;
use crate::net::{Transport, TransportError};
use crate::observability::metrics;
use crate::observability::{ProgressEvent, ProgressSink};

/// Retry limits for one logical fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempt ceiling, first try included.
    pub max_attempts: u32,
    /// Upper bound on cumulative backoff sleeping.
    pub total_wait_budget: Duration,
    /// Cumulative wait that triggers the one-time patience notice.
    pub patience_threshold: Duration,
    /// Deadline for each individual network call.
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            total_wait_budget: Duration::from_secs(config.total_wait_budget_secs),
            patience_threshold: Duration::from_secs(config.patience_threshold_secs),
            request_timeout: config.request_timeout(),
        }
    }
}

/// Why an attempt is being retried.
#[derive(Debug)]
enum Retry {
    RateLimited,
    Server(u16),
    Network(String),
}

impl Retry {
    fn describe(&self) -> String {
        match self {
            Retry::RateLimited => "HTTP 429".to_string(),
            Retry::Server(status) => format!("HTTP {status}"),
            Retry::Network(reason) => reason.clone(),
        }
    }

    fn metric_reason(&self) -> &'static str {
        match self {
            Retry::RateLimited => "rate_limited",
            Retry::Server(_) => "server_error",
            Retry::Network(_) => "network_error",
        }
    }

    fn event(self, provider: &'static str, attempt: u32, wait: Duration) -> ProgressEvent {
        match self {
            Retry::RateLimited => ProgressEvent::RateLimited { provider, attempt, wait },
            Retry::Server(status) => ProgressEvent::ServerError {
                provider,
                status,
                attempt,
                wait,
            },
            Retry::Network(reason) => ProgressEvent::NetworkError {
                provider,
                reason,
                attempt,
                wait,
            },
        }
    }
}

/// Governed GET for one provider.
pub struct RetryingFetcher<T> {
    provider: &'static str,
    transport: Arc<T>,
    rate: Arc<RateWindow>,
    governor: Arc<ConcurrencyGovernor>,
    policy: RetryPolicy,
    sink: Arc<dyn ProgressSink>,
}

impl<T: Transport> RetryingFetcher<T> {
    pub fn new(
        provider: &'static str,
        transport: Arc<T>,
        rate: Arc<RateWindow>,
        governor: Arc<ConcurrencyGovernor>,
        policy: RetryPolicy,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            provider,
            transport,
            rate,
            governor,
            policy,
            sink,
        }
    }

    pub fn provider(&self) -> &'static str {
        self.provider
    }

    pub fn governor(&self) -> &ConcurrencyGovernor {
        &self.governor
    }

    pub fn rate_window(&self) -> &RateWindow {
        &self.rate
    }

    /// Fetch `url`, retrying transient failures. Returns the parsed JSON body.
    pub async fn fetch(&self, url: &str) -> Result<Value, FetchError> {
        let mut waited = Duration::ZERO;
        let mut patience_sent = false;
        let mut last = String::new();
        let mut attempts = 0;

        while attempts < self.policy.max_attempts {
            attempts += 1;

            let outcome = self.attempt(url).await;
            metrics::record_upstream(self.provider, outcome.kind());
            tracing::debug!(
                provider = self.provider,
                url,
                attempt = attempts,
                outcome = outcome.kind(),
                transient = outcome.is_transient(),
                "Upstream attempt finished"
            );

            let (retry, base) = match outcome {
                FetchOutcome::Success(value) => return Ok(value),
                FetchOutcome::NotFound => {
                    return Err(FetchError::NotFound { url: url.to_string() })
                }
                FetchOutcome::ParseError(reason) => {
                    return Err(FetchError::Parse {
                        url: url.to_string(),
                        reason,
                    })
                }
                FetchOutcome::UnexpectedStatus(status) => {
                    return Err(FetchError::Http {
                        url: url.to_string(),
                        status,
                    })
                }
                FetchOutcome::RateLimited(hint) => {
                    self.report_overload();
                    let delay = hint
                        .as_deref()
                        .and_then(|value| parse_retry_after(value, Utc::now()))
                        .unwrap_or_else(|| rate_limit_backoff(attempts));
                    (Retry::RateLimited, delay)
                }
                FetchOutcome::ServerError(status) => {
                    (Retry::Server(status), server_error_backoff(attempts))
                }
                FetchOutcome::NetworkError(reason) => {
                    (Retry::Network(reason), server_error_backoff(attempts))
                }
            };
            last = retry.describe();

            if attempts >= self.policy.max_attempts || waited >= self.policy.total_wait_budget {
                break;
            }

            let wait = clamp_to_budget(
                apply_jitter(base, jitter_factor()),
                waited,
                self.policy.total_wait_budget,
            );
            metrics::record_retry(self.provider, retry.metric_reason());
            tracing::info!(
                provider = self.provider,
                url,
                attempt = attempts,
                delay_ms = wait.as_millis() as u64,
                reason = %last,
                "Retrying upstream request"
            );
            self.sink.emit(retry.event(self.provider, attempts, wait));

            let slept_from = Instant::now();
            tokio::time::sleep(wait).await;
            waited += slept_from.elapsed();

            if !patience_sent && waited >= self.policy.patience_threshold {
                patience_sent = true;
                self.sink.emit(ProgressEvent::Patience {
                    provider: self.provider,
                    waited,
                });
            }
        }

        tracing::warn!(
            provider = self.provider,
            url,
            attempts,
            waited_ms = waited.as_millis() as u64,
            last = %last,
            "Giving up on upstream request"
        );
        Err(FetchError::RetriesExhausted {
            url: url.to_string(),
            attempts,
            waited,
            last,
        })
    }

    /// One admitted, permit-bracketed, time-limited network call.
    async fn attempt(&self, url: &str) -> FetchOutcome {
        self.rate.admit().await;
        let result = {
            let _permit = self.governor.acquire().await;
            match tokio::time::timeout(self.policy.request_timeout, self.transport.get(url)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout),
            }
        };
        classify(result)
    }

    fn report_overload(&self) {
        if let Some(target) = self.governor.report_overload() {
            metrics::record_concurrency_target(self.provider, target);
            self.sink.emit(ProgressEvent::ConcurrencyLowered {
                provider: self.provider,
                target,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::TransportResponse;
    use crate::observability::ChannelSink;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc::UnboundedReceiver;

    /// Replays scripted results, repeating the last one forever.
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<TransportResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Transport for ScriptedTransport {
        async fn get(&self, _url: &str) -> Result<TransportResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().unwrap()
            }
        }
    }

    /// Never answers.
    struct HangingTransport;

    impl Transport for HangingTransport {
        async fn get(&self, _url: &str) -> Result<TransportResponse, TransportError> {
            std::future::pending().await
        }
    }

    fn fetcher<T: Transport>(
        transport: Arc<T>,
        policy: RetryPolicy,
    ) -> (RetryingFetcher<T>, UnboundedReceiver<ProgressEvent>) {
        let (sink, rx) = ChannelSink::new();
        let fetcher = RetryingFetcher::new(
            "iNaturalist",
            transport,
            Arc::new(RateWindow::unlimited()),
            Arc::new(ConcurrencyGovernor::new(5)),
            policy,
            Arc::new(sink),
        );
        (fetcher, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn ok_body() -> Result<TransportResponse, TransportError> {
        Ok(TransportResponse::new(200, r#"{"results":[{"id":1}]}"#))
    }

    #[tokio::test(start_paused = true)]
    async fn test_honors_retry_after_then_succeeds() {
        let transport = ScriptedTransport::new(vec![
            Ok(TransportResponse::new(429, r#"{"error":"slow down"}"#).with_retry_after("2")),
            ok_body(),
        ]);
        let policy = RetryPolicy::default();
        let (fetcher, mut rx) = fetcher(transport.clone(), policy.clone());

        let start = Instant::now();
        let value = fetcher.fetch("https://api.example/obs/1").await.unwrap();
        let elapsed = start.elapsed();

        assert_eq!(value["results"][0]["id"], 1);
        assert_eq!(transport.calls(), 2);
        assert!(elapsed >= Duration::from_millis(1600), "waited {elapsed:?}");
        assert!(elapsed <= policy.total_wait_budget);

        let events = drain(&mut rx);
        assert!(matches!(events[0], ProgressEvent::RateLimited { attempt: 1, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_is_immediate() {
        let transport = ScriptedTransport::new(vec![Ok(TransportResponse::new(404, ""))]);
        let (fetcher, mut rx) = fetcher(transport.clone(), RetryPolicy::default());

        let start = Instant::now();
        let err = fetcher.fetch("https://api.example/obs/404").await.unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(transport.calls(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_parse_error_is_terminal() {
        let transport = ScriptedTransport::new(vec![Ok(TransportResponse::new(200, ""))]);
        let (fetcher, _rx) = fetcher(transport.clone(), RetryPolicy::default());

        let err = fetcher.fetch("https://api.example/obs/1").await.unwrap_err();
        assert!(matches!(err, FetchError::Parse { .. }));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_status_is_terminal() {
        let transport = ScriptedTransport::new(vec![Ok(TransportResponse::new(401, ""))]);
        let (fetcher, _rx) = fetcher(transport.clone(), RetryPolicy::default());

        let err = fetcher.fetch("https://api.example/obs/1").await.unwrap_err();
        assert_eq!(
            err,
            FetchError::Http {
                url: "https://api.example/obs/1".into(),
                status: 401
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_ceiling() {
        let transport = ScriptedTransport::new(vec![Ok(TransportResponse::new(503, ""))]);
        let policy = RetryPolicy {
            max_attempts: 4,
            total_wait_budget: Duration::from_secs(300),
            ..RetryPolicy::default()
        };
        let (fetcher, _rx) = fetcher(transport.clone(), policy);

        let err = fetcher.fetch("https://api.example/obs/1").await.unwrap_err();
        match err {
            FetchError::RetriesExhausted { attempts, last, .. } => {
                assert_eq!(attempts, 4);
                assert_eq!(last, "HTTP 503");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(transport.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_budget_bounds_total_latency() {
        let transport = ScriptedTransport::new(vec![Ok(TransportResponse::new(429, ""))]);
        let policy = RetryPolicy {
            max_attempts: 50,
            total_wait_budget: Duration::from_secs(10),
            ..RetryPolicy::default()
        };
        let (fetcher, _rx) = fetcher(transport.clone(), policy);

        let start = Instant::now();
        let err = fetcher.fetch("https://api.example/obs/1").await.unwrap_err();

        assert!(start.elapsed() <= Duration::from_secs(10));
        match err {
            FetchError::RetriesExhausted { waited, attempts, .. } => {
                assert_eq!(waited, Duration::from_secs(10));
                assert!(attempts < 50);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_retry_after_is_clamped_to_budget() {
        let transport = ScriptedTransport::new(vec![Ok(TransportResponse::new(429, "")
            .with_retry_after("99999999999999999999"))]);
        let policy = RetryPolicy {
            max_attempts: 3,
            total_wait_budget: Duration::from_secs(10),
            ..RetryPolicy::default()
        };
        let (fetcher, _rx) = fetcher(transport.clone(), policy);

        let start = Instant::now();
        let err = fetcher.fetch("https://api.example/obs/1").await.unwrap_err();

        assert_eq!(start.elapsed(), Duration::from_secs(10));
        assert!(matches!(
            err,
            FetchError::RetriesExhausted { attempts: 2, .. }
        ));
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_patience_notice_emitted_once() {
        let transport = ScriptedTransport::new(vec![
            Ok(TransportResponse::new(503, "")),
            Ok(TransportResponse::new(503, "")),
            Ok(TransportResponse::new(429, "").with_retry_after("10")),
            Ok(TransportResponse::new(503, "")),
            ok_body(),
        ]);
        let (fetcher, mut rx) = fetcher(transport.clone(), RetryPolicy::default());

        fetcher.fetch("https://api.example/obs/1").await.unwrap();

        let patience = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, ProgressEvent::Patience { .. }))
            .count();
        assert_eq!(patience, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_retried_as_network_error() {
        let policy = RetryPolicy {
            max_attempts: 2,
            request_timeout: Duration::from_secs(20),
            ..RetryPolicy::default()
        };
        let (fetcher, mut rx) = fetcher(Arc::new(HangingTransport), policy);

        let start = Instant::now();
        let err = fetcher.fetch("https://api.example/obs/1").await.unwrap_err();

        assert!(matches!(err, FetchError::RetriesExhausted { attempts: 2, .. }));
        assert!(start.elapsed() >= Duration::from_secs(40));
        assert!(matches!(drain(&mut rx)[0], ProgressEvent::NetworkError { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clustered_429s_lower_concurrency() {
        let transport = ScriptedTransport::new(vec![
            Ok(TransportResponse::new(429, "").with_retry_after("0")),
            Ok(TransportResponse::new(429, "").with_retry_after("0")),
            Ok(TransportResponse::new(429, "").with_retry_after("0")),
            ok_body(),
        ]);
        let (fetcher, mut rx) = fetcher(transport, RetryPolicy::default());

        fetcher.fetch("https://api.example/obs/1").await.unwrap();

        assert_eq!(fetcher.governor().target(), 4);
        assert!(drain(&mut rx).contains(&ProgressEvent::ConcurrencyLowered {
            provider: "iNaturalist",
            target: 4
        }));
    }
}
