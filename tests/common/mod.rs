//! Shared utilities for integration tests.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use herbarium_labels::config::LabelsConfig;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// What the mock backend saw.
#[derive(Debug, Clone)]
pub struct MockRequest {
    /// Path and query, e.g. `/observations/1`.
    pub path: String,
    /// Raw request head, lowercased.
    pub head: String,
}

impl MockRequest {
    pub fn header(&self, name: &str) -> Option<String> {
        let prefix = format!("{}:", name.to_ascii_lowercase());
        self.head
            .lines()
            .find_map(|line| line.strip_prefix(&prefix).map(|v| v.trim().to_string()))
    }
}

/// What the mock backend answers.
#[derive(Debug, Clone)]
pub struct MockReply {
    pub status: u16,
    pub body: String,
    pub retry_after: Option<String>,
}

#[allow(dead_code)]
impl MockReply {
    pub fn json(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, value: &str) -> Self {
        self.retry_after = Some(value.to_string());
        self
    }
}

/// Requests seen by a backend, in arrival order.
#[derive(Debug, Default, Clone)]
pub struct RequestLog {
    seen: Arc<Mutex<Vec<MockRequest>>>,
    count: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl RequestLog {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn paths(&self) -> Vec<String> {
        self.seen.lock().unwrap().iter().map(|r| r.path.clone()).collect()
    }

    pub fn requests(&self) -> Vec<MockRequest> {
        self.seen.lock().unwrap().clone()
    }

    pub fn count_matching(&self, needle: &str) -> usize {
        self.paths().iter().filter(|p| p.contains(needle)).count()
    }
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// Start a programmable mock backend on an ephemeral port.
pub async fn start_programmable_backend<F, Fut>(f: F) -> (SocketAddr, RequestLog)
where
    F: Fn(MockRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MockReply> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let log = RequestLog::default();
    let f = Arc::new(f);

    let task_log = log.clone();
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    let log = task_log.clone();
                    tokio::spawn(async move {
                        let Some(request) = read_request(&mut socket).await else {
                            return;
                        };
                        log.count.fetch_add(1, Ordering::SeqCst);
                        log.seen.lock().unwrap().push(request.clone());

                        let reply = f(request).await;
                        let retry_after = reply
                            .retry_after
                            .map(|v| format!("Retry-After: {v}\r\n"))
                            .unwrap_or_default();
                        let response = format!(
                            "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\n{}Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                            reply.status,
                            status_text(reply.status),
                            retry_after,
                            reply.body.len(),
                            reply.body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    (addr, log)
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> Option<MockRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let head = String::from_utf8_lossy(&buf).to_string();
    let path = head.split_whitespace().nth(1)?.to_string();
    Some(MockRequest {
        path,
        head: head.to_ascii_lowercase(),
    })
}

/// Defaults pointed at a mock backend, with fast retries.
#[allow(dead_code)]
pub fn config_for(addr: SocketAddr) -> LabelsConfig {
    let mut config = LabelsConfig::default();
    config.inaturalist.base_url = format!("http://{addr}/v1");
    config.mushroom_observer.base_url = format!("http://{addr}/api2");
    config.retry.total_wait_budget_secs = 5;
    config.retry.request_timeout_secs = 5;
    config.observability.quiet = true;
    config
}

/// An iNaturalist observation envelope.
#[allow(dead_code)]
pub fn inat_observation(id: u64, ancestor_ids: &[u64]) -> String {
    serde_json::json!({
        "total_results": 1,
        "results": [{
            "id": id,
            "taxon": {
                "id": 48715,
                "name": "Amanita muscaria",
                "rank": "species",
                "preferred_common_name": "Fly Agaric",
                "ancestor_ids": ancestor_ids
            },
            "place_guess": "Point Reyes, CA",
            "geojson": {"type": "Point", "coordinates": [-122.8, 38.05]},
            "positional_accuracy": 20,
            "observed_on": "2024-01-07",
            "user": {"login": "fieldworker", "name": "Sam Field"},
            "ofvs": [],
            "description": "Under pines."
        }]
    })
    .to_string()
}
