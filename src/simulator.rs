//! Connection simulator
//!
//! One simulator owns one connection for its whole life and loops over a
//! transaction cycle with randomized idle time, occasional injected errors,
//! rare long stalls and a very rare voluntary exit.
//!
//! ```text
//! OPENING -> RUNNING <-> STALLED
//!               |
//!               +-> TERMINATED (graceful: handle closed)
//!               +-> TERMINATED (abnormal: handle dropped)
//! ```

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{Backend, Connection};
use crate::config::SimulatorConfig;
use crate::error::Anomaly;
use crate::executor::execute;
use crate::metrics::MetricsRegistry;

/// Golden-ratio multiplier used to spread per-connection seeds
const SEED_MIX: u64 = 0x9e37_79b9_7f4a_7c15;

/// What the RUNNING loop does after an iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Terminate,
    Cancelled,
}

/// How a simulator ended
#[derive(Debug)]
pub enum Exit {
    /// Handle closed by the simulator itself
    Graceful,
    /// Handle abandoned after an anomaly
    Abnormal(Anomaly),
}

impl Exit {
    pub fn is_graceful(&self) -> bool {
        matches!(self, Exit::Graceful)
    }
}

/// One simulated client connection
pub struct ConnectionSimulator {
    seq: u64,
    backend: Arc<dyn Backend>,
    metrics: Arc<MetricsRegistry>,
    config: Arc<SimulatorConfig>,
    rng: StdRng,
    cancel: CancellationToken,
}

impl ConnectionSimulator {
    /// Build a simulator, rejecting probabilities outside `[0, 1]` or empty
    /// statements.
    pub fn new(
        seq: u64,
        backend: Arc<dyn Backend>,
        metrics: Arc<MetricsRegistry>,
        config: Arc<SimulatorConfig>,
        cancel: CancellationToken,
    ) -> crate::Result<Self> {
        config.validate()?;
        Ok(Self::from_validated(seq, backend, metrics, config, cancel))
    }

    /// `config` must already have passed [`SimulatorConfig::validate`].
    pub(crate) fn from_validated(
        seq: u64,
        backend: Arc<dyn Backend>,
        metrics: Arc<MetricsRegistry>,
        config: Arc<SimulatorConfig>,
        cancel: CancellationToken,
    ) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed ^ seq.wrapping_mul(SEED_MIX)),
            None => StdRng::from_entropy(),
        };

        Self {
            seq,
            backend,
            metrics,
            config,
            rng,
            cancel,
        }
    }

    /// Spawn sequence number
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Run until the simulator terminates.
    ///
    /// Exit accounting happens exactly once whichever way this ends,
    /// including a panic or the task being aborted.
    pub async fn run(mut self) -> Exit {
        let _exit = self.metrics.exit_guard();

        match self.drive().await {
            Ok(()) => Exit::Graceful,
            Err(anomaly) => {
                warn!(
                    connection = self.seq,
                    kind = anomaly.kind(),
                    error = %anomaly,
                    "Connection terminated abnormally"
                );
                Exit::Abnormal(anomaly)
            }
        }
    }

    async fn drive(&mut self) -> Result<(), Anomaly> {
        let mut conn = self
            .backend
            .open()
            .await
            .map_err(Anomaly::AcquisitionFailure)?;
        self.metrics.connection_opened();
        debug!(connection = self.seq, backend = self.backend.name(), "Connection opened");

        // `?` drops `conn` without closing it; the leak is intentional.
        loop {
            match self.iteration(conn.as_mut()).await? {
                Step::Continue => {}
                Step::Terminate => {
                    info!(connection = self.seq, "quit");
                    break;
                }
                Step::Cancelled => {
                    debug!(connection = self.seq, "Cancelled, closing connection");
                    break;
                }
            }
        }

        if let Err(e) = conn.close().await {
            debug!(connection = self.seq, error = %e, "Close failed");
        }
        Ok(())
    }

    /// One pass of the RUNNING state.
    pub async fn iteration(&mut self, conn: &mut dyn Connection) -> Result<Step, Anomaly> {
        if self.cancel.is_cancelled() {
            return Ok(Step::Cancelled);
        }

        self.transaction(conn).await?;

        // Shutdown does not wait out the idle pause
        let idle = Duration::from_millis(self.idle_pause_ms());
        tokio::select! {
            _ = sleep(idle) => {}
            _ = self.cancel.cancelled() => return Ok(Step::Cancelled),
        }

        if self.rng.gen_bool(self.config.error_probability) {
            self.error_cycle(conn).await?;
        }

        if self.rng.gen_bool(self.config.stall_probability) && !self.stall().await {
            return Ok(Step::Cancelled);
        }

        if self.rng.gen_bool(self.config.terminate_probability) {
            return Ok(Step::Terminate);
        }

        Ok(Step::Continue)
    }

    async fn transaction(&self, conn: &mut dyn Connection) -> Result<(), Anomaly> {
        let statements = &self.config.statements;

        execute(conn, &statements.begin, false).await?;
        sleep(self.config.pre_query_pause()).await;

        self.metrics.query_issued();
        execute(conn, &statements.query, false).await?;
        sleep(self.config.post_query_pause()).await;

        execute(conn, &statements.commit, false).await?;
        Ok(())
    }

    /// begin, failing statement, rollback. The failing statement must fail.
    async fn error_cycle(&self, conn: &mut dyn Connection) -> Result<(), Anomaly> {
        let statements = &self.config.statements;
        let pause = self.config.error_cycle_pause();

        execute(conn, &statements.begin, false).await?;
        sleep(pause).await;
        execute(conn, &statements.error, true).await?;
        sleep(pause).await;
        execute(conn, &statements.rollback, false).await?;
        Ok(())
    }

    /// Hold the connection idle. Returns false if cut short by cancellation.
    async fn stall(&mut self) -> bool {
        info!(connection = self.seq, "is waiting");
        self.metrics.stall_entered();

        let completed = tokio::select! {
            _ = sleep(self.config.stall_duration()) => true,
            _ = self.cancel.cancelled() => false,
        };

        self.metrics.stall_exited();
        info!(connection = self.seq, "go on");
        completed
    }

    fn idle_pause_ms(&mut self) -> u64 {
        match self.config.max_idle_ms {
            0 => 0,
            max => self.rng.gen_range(0..max),
        }
    }
}
