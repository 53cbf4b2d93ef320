//! Load generator
//!
//! Wires the spawner, the simulators and the reporter around one shared
//! metrics registry.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backend::Backend;
use crate::config::StressConfig;
use crate::error::{Error, Result};
use crate::metrics::{MetricsRegistry, MetricsSnapshot};
use crate::reporter::Reporter;
use crate::spawner::Spawner;

pub struct LoadGenerator {
    config: StressConfig,
    backend: Arc<dyn Backend>,
    metrics: Arc<MetricsRegistry>,
    cancel: CancellationToken,
}

impl LoadGenerator {
    pub fn new(config: StressConfig, backend: Arc<dyn Backend>) -> Self {
        Self {
            config,
            backend,
            metrics: Arc::new(MetricsRegistry::new()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn metrics(&self) -> Arc<MetricsRegistry> {
        Arc::clone(&self.metrics)
    }

    /// Token that stops the spawner and wakes stalled connections. The run
    /// then waits for simulators to close their handles and writes a final
    /// report before returning.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until cancelled or, when given, until `duration` has elapsed.
    ///
    /// Report lines go to `out`. Returns a snapshot taken once the
    /// simulators have shut down and the reporter has written its last line.
    pub async fn run<W>(self, duration: Option<Duration>, out: W) -> Result<MetricsSnapshot>
    where
        W: Write + Send + 'static,
    {
        self.config.validate()?;

        let spawner = Spawner::new(
            Arc::clone(&self.backend),
            Arc::clone(&self.metrics),
            Arc::new(self.config.simulator.clone()),
            self.config.spawner.clone(),
            self.cancel.clone(),
        )?;
        let simulators = spawner.tasks();

        // Separate from `cancel` so the last line is written after the drain
        let stop_reporting = CancellationToken::new();
        let reporter = Reporter::new(Arc::clone(&self.metrics), &self.config.reporter);
        let reporter_task = tokio::spawn(reporter.run(out, stop_reporting.clone()));

        info!(
            backend = self.backend.name(),
            duration_secs = ?duration.map(|d| d.as_secs()),
            "Load generator started"
        );

        let deadline = async {
            match duration {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = spawner.run() => {}
            _ = deadline => info!("Run duration elapsed"),
        }
        self.cancel.cancel();

        info!(live = simulators.live(), "Waiting for connections to close");
        simulators.drain().await;

        stop_reporting.cancel();
        match reporter_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Reporter stopped with an error"),
            Err(e) => return Err(Error::Task(e.to_string())),
        }

        Ok(self.metrics.snapshot())
    }
}
