//! Periodic reporter
//!
//! Samples the registry once per interval, diffs the monotonic counters
//! against the previous sample and writes one line. Producers are never
//! waited on; the four counters are read one after another.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::{ReportFormat, ReporterConfig};
use crate::error::Result;
use crate::metrics::{MetricsRegistry, MetricsSnapshot};

/// One report line
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub timestamp: DateTime<Utc>,
    /// Time actually covered by this report
    pub elapsed_ms: u64,
    /// Queries issued during the interval
    pub queries: u64,
    /// Connections that exited during the interval
    pub failures: u64,
    pub active_connections: i64,
    pub waiting_connections: i64,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "QPS {} FailPS {} Conns {} Waiting {}",
            self.queries, self.failures, self.active_connections, self.waiting_connections
        )
    }
}

pub struct Reporter {
    metrics: Arc<MetricsRegistry>,
    interval: Duration,
    format: ReportFormat,
    previous: MetricsSnapshot,
    previous_at: Instant,
}

impl Reporter {
    /// The baseline is the registry as it is right now.
    pub fn new(metrics: Arc<MetricsRegistry>, config: &ReporterConfig) -> Self {
        let previous = metrics.snapshot();
        Self {
            metrics,
            interval: config.interval(),
            format: config.format,
            previous,
            previous_at: Instant::now(),
        }
    }

    /// Snapshot the registry and diff against the previous sample.
    pub fn sample(&mut self) -> Report {
        let now = Instant::now();
        let current = self.metrics.snapshot();
        let delta = current.delta_since(&self.previous);
        let elapsed = now.duration_since(self.previous_at);

        self.previous = current;
        self.previous_at = now;

        Report {
            timestamp: Utc::now(),
            elapsed_ms: elapsed.as_millis() as u64,
            queries: delta.queries,
            failures: delta.exits,
            active_connections: current.active_connections,
            waiting_connections: current.waiting_connections,
        }
    }

    pub fn render(&self, report: &Report) -> Result<String> {
        match self.format {
            ReportFormat::Text => Ok(report.to_string()),
            ReportFormat::Json => Ok(serde_json::to_string(report)?),
        }
    }

    fn emit<W: Write>(&mut self, out: &mut W) -> Result<()> {
        let report = self.sample();
        writeln!(out, "{}", self.render(&report)?)?;
        out.flush()?;
        Ok(())
    }

    /// Report every interval until cancelled, then write one last report.
    ///
    /// A failed write loses that line only; reporting carries on with the
    /// next interval. Only the final write's error is returned.
    pub async fn run<W: Write>(mut self, mut out: W, cancel: CancellationToken) -> Result<()> {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.emit(&mut out) {
                        warn!(error = %e, "Failed to write report line");
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }

        self.emit(&mut out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_config() -> ReporterConfig {
        ReporterConfig {
            interval_ms: 1_000,
            format: ReportFormat::Text,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_qps_is_delta_between_samples() {
        let metrics = Arc::new(MetricsRegistry::new());
        metrics.queries_issued.add(100);
        let mut reporter = Reporter::new(Arc::clone(&metrics), &text_config());

        tokio::time::advance(Duration::from_secs(1)).await;
        metrics.queries_issued.add(50);
        metrics.active_connections.add(7);
        metrics.waiting_connections.add(2);
        metrics.connection_exited();

        let report = reporter.sample();
        assert_eq!(report.queries, 50);
        assert_eq!(report.failures, 1);
        assert_eq!(report.active_connections, 6);
        assert_eq!(report.waiting_connections, 2);
        assert_eq!(report.elapsed_ms, 1_000);
        assert_eq!(report.to_string(), "QPS 50 FailPS 1 Conns 6 Waiting 2");

        // nothing happened since the last sample
        let report = reporter.sample();
        assert_eq!(report.queries, 0);
        assert_eq!(report.failures, 0);
        assert_eq!(report.active_connections, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delta_independent_of_producer_count() {
        let metrics = Arc::new(MetricsRegistry::new());
        metrics.queries_issued.add(100);
        let mut reporter = Reporter::new(Arc::clone(&metrics), &text_config());

        let producers: Vec<_> = (0..5)
            .map(|_| {
                let metrics = Arc::clone(&metrics);
                tokio::spawn(async move {
                    for _ in 0..10 {
                        metrics.query_issued();
                    }
                })
            })
            .collect();
        for p in producers {
            p.await.unwrap();
        }

        assert_eq!(reporter.sample().queries, 50);
    }

    #[tokio::test]
    async fn test_json_render() {
        let metrics = Arc::new(MetricsRegistry::new());
        let config = ReporterConfig {
            format: ReportFormat::Json,
            ..text_config()
        };
        let mut reporter = Reporter::new(Arc::clone(&metrics), &config);
        metrics.query_issued();
        let report = reporter.sample();
        let line = reporter.render(&report).unwrap();

        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["queries"], 1);
        assert_eq!(value["failures"], 0);
        assert!(value["timestamp"].is_string());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_emits_once_per_interval_and_on_cancel() {
        let metrics = Arc::new(MetricsRegistry::new());
        let reporter = Reporter::new(Arc::clone(&metrics), &text_config());
        let cancel = CancellationToken::new();
        let mut out = Vec::new();

        let stopper = {
            let cancel = cancel.clone();
            let metrics = Arc::clone(&metrics);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(3_500)).await;
                metrics.queries_issued.add(3);
                cancel.cancel();
            })
        };

        reporter.run(&mut out, cancel).await.unwrap();
        stopper.await.unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4, "{text}");
        assert_eq!(lines[0], "QPS 0 FailPS 0 Conns 0 Waiting 0");
        assert_eq!(lines[3], "QPS 3 FailPS 0 Conns 0 Waiting 0");
    }

    /// Rejects its first write, then behaves like a `Vec<u8>`.
    struct FlakyWriter {
        failed_once: bool,
        buf: Vec<u8>,
    }

    impl Write for FlakyWriter {
        fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
            if !self.failed_once {
                self.failed_once = true;
                return Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"));
            }
            self.buf.extend_from_slice(data);
            Ok(data.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_error_does_not_stop_reporting() {
        let metrics = Arc::new(MetricsRegistry::new());
        let reporter = Reporter::new(Arc::clone(&metrics), &text_config());
        let cancel = CancellationToken::new();
        let mut out = FlakyWriter {
            failed_once: false,
            buf: Vec::new(),
        };

        let stopper = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(2_500)).await;
                cancel.cancel();
            })
        };

        reporter.run(&mut out, cancel).await.unwrap();
        stopper.await.unwrap();

        // first tick lost, second tick and the final line written
        let text = String::from_utf8(out.buf).unwrap();
        assert_eq!(text.lines().count(), 2, "{text}");
        assert!(text.lines().all(|l| l.starts_with("QPS ")));
    }
}
