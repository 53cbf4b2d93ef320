//! # pool-stress
//!
//! Synthetic load generator for PostgreSQL connection poolers.
//!
//! Simulated clients are admitted at a fixed rate and never capped by
//! default. Each one holds a dedicated connection and loops through
//! short transactions, with occasional injected errors, hour-long stalls and
//! rare voluntary exits. A reporter prints per-second query and exit counts
//! alongside the live and stalled connection gauges.

pub mod backend;
pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod reporter;
pub mod runner;
pub mod simulator;
pub mod spawner;

pub use backend::{Backend, BackendError, Connection, MemoryBackend, PostgresBackend};
pub use config::{ConfigLoader, StressConfig};
pub use error::{Anomaly, Error, Result};
pub use metrics::{MetricsRegistry, MetricsSnapshot};
pub use reporter::{Report, Reporter};
pub use runner::LoadGenerator;
pub use simulator::{ConnectionSimulator, Exit, Step};
pub use spawner::{SimulatorTasks, Spawner};
