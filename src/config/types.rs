use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::error::{Error, Result};
use crate::logging::LogConfig;

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StressConfig {
    /// Target connection parameters
    pub connection: ConnectionConfig,

    /// Per-connection behaviour
    pub simulator: SimulatorConfig,

    /// Admission control
    pub spawner: SpawnerConfig,

    /// Periodic report
    pub reporter: ReporterConfig,

    /// Logging configuration
    pub logging: LogConfig,
}

impl StressConfig {
    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.connection.validate()?;
        self.simulator.validate()?;
        self.spawner.validate()?;
        self.reporter.validate()?;
        Ok(())
    }
}

/// Connection parameters for the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub host: String,
    /// Defaults to PgBouncer's port
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// libpq-style sslmode (disable, allow, prefer, require, verify-ca, verify-full)
    pub ssl_mode: String,
    pub application_name: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6432,
            database: "postgres".to_string(),
            username: None,
            password: None,
            ssl_mode: "disable".to_string(),
            application_name: "pool-stress".to_string(),
        }
    }
}

impl ConnectionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::InvalidConfiguration(
                "connection.host cannot be empty".to_string(),
            ));
        }
        if self.port == 0 {
            return Err(Error::InvalidConfiguration(
                "connection.port cannot be 0".to_string(),
            ));
        }
        if self.database.is_empty() {
            return Err(Error::InvalidConfiguration(
                "connection.database cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Statements issued by each simulated connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Statements {
    pub begin: String,
    pub query: String,
    pub commit: String,
    pub rollback: String,
    /// Must fail on the backend; used by the injected-error cycle
    pub error: String,
}

impl Default for Statements {
    fn default() -> Self {
        Self {
            begin: "begin;".to_string(),
            query: "select 1;".to_string(),
            commit: "commit;".to_string(),
            rollback: "rollback;".to_string(),
            error: "DO $$BEGIN RAISE EXCEPTION 'asdf'; END $$;".to_string(),
        }
    }
}

/// Behaviour of one simulated connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Chance per iteration of running the injected-error cycle
    pub error_probability: f64,
    /// Chance per iteration of stalling
    pub stall_probability: f64,
    /// Chance per iteration of closing and exiting
    pub terminate_probability: f64,

    pub pre_query_pause_ms: u64,
    pub post_query_pause_ms: u64,
    pub error_cycle_pause_ms: u64,
    /// Upper bound (exclusive) of the random idle pause after commit
    pub max_idle_ms: u64,
    pub stall_duration_secs: u64,

    /// Base RNG seed. Each connection mixes in its sequence number.
    pub seed: Option<u64>,

    pub statements: Statements,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            error_probability: 1.0 / 100.0,
            stall_probability: 1.0 / 1_000.0,
            terminate_probability: 1.0 / 50_000.0,
            pre_query_pause_ms: 1,
            post_query_pause_ms: 5,
            error_cycle_pause_ms: 1,
            max_idle_ms: 1_000,
            stall_duration_secs: 3_600,
            seed: None,
            statements: Statements::default(),
        }
    }
}

impl SimulatorConfig {
    pub fn pre_query_pause(&self) -> Duration {
        Duration::from_millis(self.pre_query_pause_ms)
    }

    pub fn post_query_pause(&self) -> Duration {
        Duration::from_millis(self.post_query_pause_ms)
    }

    pub fn error_cycle_pause(&self) -> Duration {
        Duration::from_millis(self.error_cycle_pause_ms)
    }

    pub fn stall_duration(&self) -> Duration {
        Duration::from_secs(self.stall_duration_secs)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, p) in [
            ("error_probability", self.error_probability),
            ("stall_probability", self.stall_probability),
            ("terminate_probability", self.terminate_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(Error::InvalidConfiguration(format!(
                    "simulator.{} must be within [0, 1], got {}",
                    name, p
                )));
            }
        }

        let statements = &self.statements;
        for (name, sql) in [
            ("begin", &statements.begin),
            ("query", &statements.query),
            ("commit", &statements.commit),
            ("rollback", &statements.rollback),
            ("error", &statements.error),
        ] {
            if sql.trim().is_empty() {
                return Err(Error::InvalidConfiguration(format!(
                    "simulator.statements.{} cannot be empty",
                    name
                )));
            }
        }

        Ok(())
    }
}

/// Admission control
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnerConfig {
    /// Pause between two admissions
    pub admission_interval_ms: u64,
    /// Optional cap on simultaneously live connections. Unset means unbounded.
    pub max_live_connections: Option<usize>,
    /// How long shutdown waits for simulators to close their connections
    pub shutdown_grace_ms: u64,
}

impl Default for SpawnerConfig {
    fn default() -> Self {
        Self {
            admission_interval_ms: 5,
            max_live_connections: None,
            shutdown_grace_ms: 5_000,
        }
    }
}

impl SpawnerConfig {
    pub fn admission_interval(&self) -> Duration {
        Duration::from_millis(self.admission_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.admission_interval_ms == 0 {
            return Err(Error::InvalidConfiguration(
                "spawner.admission_interval_ms must be > 0".to_string(),
            ));
        }
        match self.max_live_connections {
            Some(0) => {
                return Err(Error::InvalidConfiguration(
                    "spawner.max_live_connections must be > 0 when set".to_string(),
                ))
            }
            Some(cap) if cap > Semaphore::MAX_PERMITS => {
                return Err(Error::InvalidConfiguration(format!(
                    "spawner.max_live_connections must be <= {}",
                    Semaphore::MAX_PERMITS
                )))
            }
            _ => {}
        }
        Ok(())
    }
}

/// Output format of report lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    /// `QPS <n> FailPS <n> Conns <n> Waiting <n>`
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Periodic reporter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReporterConfig {
    pub interval_ms: u64,
    pub format: ReportFormat,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1_000,
            format: ReportFormat::Text,
        }
    }
}

impl ReporterConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval_ms == 0 {
            return Err(Error::InvalidConfiguration(
                "reporter.interval_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}
