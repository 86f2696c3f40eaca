//! Human-readable progress stream.
//!
//! Every event renders to exactly one line. Front-ends read these lines from
//! stdout as they are produced; diagnostic logging goes to stderr instead.

use std::fmt;
use std::io::Write;
use std::time::Duration;

use tokio::sync::mpsc;

/// One progress or warning notice.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    RateLimited {
        provider: &'static str,
        attempt: u32,
        wait: Duration,
    },
    ServerError {
        provider: &'static str,
        status: u16,
        attempt: u32,
        wait: Duration,
    },
    NetworkError {
        provider: &'static str,
        reason: String,
        attempt: u32,
        wait: Duration,
    },
    Patience {
        provider: &'static str,
        waited: Duration,
    },
    ConcurrencyLowered {
        provider: &'static str,
        target: usize,
    },
    ItemStarted {
        index: usize,
        total: usize,
        input: String,
    },
    ItemSucceeded {
        input: String,
    },
    ItemFailed {
        input: String,
        reason: String,
    },
    Summary {
        requested: usize,
        succeeded: usize,
        failed: usize,
        elapsed: Duration,
    },
}

impl ProgressEvent {
    /// Retry chatter that quiet mode suppresses.
    pub fn is_verbose(&self) -> bool {
        matches!(
            self,
            ProgressEvent::RateLimited { .. }
                | ProgressEvent::ServerError { .. }
                | ProgressEvent::NetworkError { .. }
                | ProgressEvent::ItemStarted { .. }
        )
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressEvent::RateLimited { provider, attempt, wait } => write!(
                f,
                "{provider} rate limit hit (attempt {attempt}), waiting {:.1}s before retrying",
                wait.as_secs_f64()
            ),
            ProgressEvent::ServerError { provider, status, attempt, wait } => write!(
                f,
                "{provider} server error {status} (attempt {attempt}), retrying in {:.1}s",
                wait.as_secs_f64()
            ),
            ProgressEvent::NetworkError { provider, reason, attempt, wait } => write!(
                f,
                "{provider} network error: {reason} (attempt {attempt}), retrying in {:.1}s",
                wait.as_secs_f64()
            ),
            ProgressEvent::Patience { provider, waited } => write!(
                f,
                "{provider} is responding slowly; still working after {:.0}s of backoff, please be patient",
                waited.as_secs_f64()
            ),
            ProgressEvent::ConcurrencyLowered { provider, target } => write!(
                f,
                "Warning: {provider} keeps rate limiting us; reducing concurrent requests to {target}"
            ),
            ProgressEvent::ItemStarted { index, total, input } => {
                write!(f, "Fetching {input} ({index}/{total})")
            }
            ProgressEvent::ItemSucceeded { input } => write!(f, "Fetched {input}"),
            ProgressEvent::ItemFailed { input, reason } => write!(f, "Error: {input}: {reason}"),
            ProgressEvent::Summary { requested, succeeded, failed, elapsed } => write!(
                f,
                "Requested {requested}, succeeded {succeeded}, failed {failed} in {:.1}s",
                elapsed.as_secs_f64()
            ),
        }
    }
}

/// Receiver of progress events.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Which console stream a [`ConsoleSink`] writes to.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    #[default]
    Stdout,
    Stderr,
}

/// Writes each event as a line on the console.
#[derive(Debug, Default)]
pub struct ConsoleSink {
    quiet: bool,
    stream: Stream,
}

impl ConsoleSink {
    pub fn new(stream: Stream, quiet: bool) -> Self {
        Self { quiet, stream }
    }

    /// The default: progress lines on stdout.
    pub fn stdout(quiet: bool) -> Self {
        Self::new(Stream::Stdout, quiet)
    }

    /// Used when stdout carries machine-readable output.
    pub fn stderr(quiet: bool) -> Self {
        Self::new(Stream::Stderr, quiet)
    }

    fn accepts(&self, event: &ProgressEvent) -> bool {
        !(self.quiet && event.is_verbose())
    }
}

impl ProgressSink for ConsoleSink {
    fn emit(&self, event: ProgressEvent) {
        if !self.accepts(&event) {
            return;
        }
        // Line-buffered consumers need every line flushed as it happens.
        let _ = match self.stream {
            Stream::Stdout => {
                let mut out = std::io::stdout().lock();
                writeln!(out, "{event}").and_then(|_| out.flush())
            }
            Stream::Stderr => {
                let mut err = std::io::stderr().lock();
                writeln!(err, "{event}").and_then(|_| err.flush())
            }
        };
    }
}

/// Forwards events into a channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelSink {
    fn emit(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _event: ProgressEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbose_classification() {
        let retry = ProgressEvent::RateLimited {
            provider: "iNaturalist",
            attempt: 1,
            wait: Duration::from_secs(2),
        };
        let lowered = ProgressEvent::ConcurrencyLowered {
            provider: "iNaturalist",
            target: 4,
        };
        assert!(retry.is_verbose());
        assert!(!lowered.is_verbose());
        assert!(!ProgressEvent::Patience {
            provider: "iNaturalist",
            waited: Duration::from_secs(9)
        }
        .is_verbose());
    }

    #[test]
    fn test_lines_are_single_line() {
        let event = ProgressEvent::ItemFailed {
            input: "12345".into(),
            reason: "observation not found".into(),
        };
        let line = event.to_string();
        assert_eq!(line, "Error: 12345: observation not found");
        assert!(!line.contains('\n'));

        let summary = ProgressEvent::Summary {
            requested: 10,
            succeeded: 7,
            failed: 3,
            elapsed: Duration::from_millis(2500),
        };
        assert_eq!(summary.to_string(), "Requested 10, succeeded 7, failed 3 in 2.5s");
    }

    #[test]
    fn test_quiet_console_drops_retry_chatter() {
        let quiet = ConsoleSink::stderr(true);
        let chatty = ConsoleSink::stdout(false);
        let retry = ProgressEvent::ServerError {
            provider: "Mushroom Observer",
            status: 503,
            attempt: 2,
            wait: Duration::from_secs(2),
        };
        let failure = ProgressEvent::ItemFailed {
            input: "MO1".into(),
            reason: "gone".into(),
        };
        assert!(!quiet.accepts(&retry));
        assert!(quiet.accepts(&failure));
        assert!(chatty.accepts(&retry));
    }

    #[tokio::test]
    async fn test_channel_sink_forwards() {
        let (sink, mut rx) = ChannelSink::new();
        sink.emit(ProgressEvent::ItemSucceeded { input: "MO123".into() });
        assert_eq!(
            rx.recv().await,
            Some(ProgressEvent::ItemSucceeded { input: "MO123".into() })
        );
    }
}
