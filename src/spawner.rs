//! Spawner
//!
//! 一定間隔で新しいシミュレーターを生成する。既存の接続数には関与せず、
//! 上限 (max_live_connections) が設定されていない限り同時接続数は増え続ける。

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::config::{SimulatorConfig, SpawnerConfig};
use crate::error::Result;
use crate::metrics::MetricsRegistry;
use crate::simulator::{ConnectionSimulator, Exit};

/// Admission loop for simulated connections
pub struct Spawner {
    backend: Arc<dyn Backend>,
    metrics: Arc<MetricsRegistry>,
    simulator: Arc<SimulatorConfig>,
    config: SpawnerConfig,
    cancel: CancellationToken,
    /// Live-simulator slots when a cap is configured
    slots: Option<Arc<Semaphore>>,
    /// Every simulator task, so shutdown can wait for their handles to close
    tasks: TaskTracker,
    next_seq: u64,
}

impl Spawner {
    pub fn new(
        backend: Arc<dyn Backend>,
        metrics: Arc<MetricsRegistry>,
        simulator: Arc<SimulatorConfig>,
        config: SpawnerConfig,
        cancel: CancellationToken,
    ) -> Result<Self> {
        simulator.validate()?;
        config.validate()?;

        let slots = config
            .max_live_connections
            .map(|cap| Arc::new(Semaphore::new(cap)));

        Ok(Self {
            backend,
            metrics,
            simulator,
            config,
            cancel,
            slots,
            tasks: TaskTracker::new(),
            next_seq: 0,
        })
    }

    /// Number of simulators created so far
    pub fn spawned(&self) -> u64 {
        self.next_seq
    }

    /// Handle on the simulator tasks, usable after [`Spawner::run`] consumed
    /// the spawner.
    pub fn tasks(&self) -> SimulatorTasks {
        SimulatorTasks {
            tasks: self.tasks.clone(),
            grace: self.config.shutdown_grace(),
        }
    }

    /// Create the next simulator on its own task.
    ///
    /// With a cap configured this waits for a free slot first; the slot is
    /// released when the simulator exits.
    pub async fn spawn_next(&mut self) -> JoinHandle<Exit> {
        let permit = match &self.slots {
            Some(slots) => Arc::clone(slots).acquire_owned().await.ok(),
            None => None,
        };

        let seq = self.next_seq;
        self.next_seq += 1;

        let simulator = ConnectionSimulator::from_validated(
            seq,
            Arc::clone(&self.backend),
            Arc::clone(&self.metrics),
            Arc::clone(&self.simulator),
            self.cancel.child_token(),
        );

        self.tasks.spawn(async move {
            let exit = simulator.run().await;
            drop(permit);
            exit
        })
    }

    /// Admit simulators forever, one per admission interval, until cancelled.
    pub async fn run(mut self) {
        let interval = self.config.admission_interval();
        info!(
            backend = self.backend.name(),
            interval_ms = self.config.admission_interval_ms,
            max_live = ?self.config.max_live_connections,
            "Spawner started"
        );

        loop {
            let cancel = self.cancel.clone();
            tokio::select! {
                // handle dropped; the tracker still owns the task
                _ = self.spawn_next() => {}
                _ = cancel.cancelled() => break,
            }

            tokio::select! {
                _ = sleep(interval) => {}
                _ = cancel.cancelled() => break,
            }
        }

        debug!(spawned = self.next_seq, "Spawner stopped");
    }
}

/// The set of spawned simulator tasks
#[derive(Debug, Clone)]
pub struct SimulatorTasks {
    tasks: TaskTracker,
    grace: Duration,
}

impl SimulatorTasks {
    /// Simulators still running
    pub fn live(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for every simulator to finish, for at most the shutdown grace
    /// period. Call after cancelling; no new simulators are accepted
    /// afterwards. Returns false if some were still running at the deadline.
    pub async fn drain(&self) -> bool {
        self.tasks.close();
        match timeout(self.grace, self.tasks.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    remaining = self.tasks.len(),
                    grace_ms = self.grace.as_millis() as u64,
                    "Simulators still running after the shutdown grace period"
                );
                false
            }
        }
    }
}
