use anyhow::{Context, Result};
use clap::Parser;
use pool_stress::config::ReportFormat;
use pool_stress::logging::init_logging;
use pool_stress::{
    Backend, ConfigLoader, LoadGenerator, MemoryBackend, PostgresBackend, StressConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Open ever more connections against a PostgreSQL pooler and report
/// throughput, exits and stalled connections once per second.
#[derive(Parser, Debug)]
#[command(name = "pool-stress", version, about)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<String>,

    #[arg(long, env = "PGHOST")]
    host: Option<String>,

    #[arg(long, env = "PGPORT")]
    port: Option<u16>,

    #[arg(long, env = "PGDATABASE")]
    database: Option<String>,

    #[arg(long, env = "PGUSER")]
    user: Option<String>,

    #[arg(long, env = "PGPASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// disable, allow, prefer, require, verify-ca or verify-full
    #[arg(long, env = "PGSSLMODE")]
    sslmode: Option<String>,

    /// Milliseconds between two new connections
    #[arg(long)]
    spawn_interval_ms: Option<u64>,

    /// Cap on simultaneously live connections (unbounded when omitted)
    #[arg(long)]
    max_live: Option<usize>,

    /// Milliseconds between report lines
    #[arg(long)]
    report_interval_ms: Option<u64>,

    #[arg(long, value_enum)]
    format: Option<ReportFormat>,

    /// Seed for reproducible connection behaviour
    #[arg(long)]
    seed: Option<u64>,

    /// Stop after this many seconds
    #[arg(long)]
    duration: Option<u64>,

    #[arg(long)]
    log_level: Option<String>,

    /// Use the in-process backend instead of PostgreSQL
    #[arg(long)]
    dry_run: bool,

    /// Print a sample configuration file and exit
    #[arg(long)]
    print_config: bool,
}

impl Cli {
    /// CLI 引数で設定を上書き
    fn apply(&self, config: &mut StressConfig) {
        let conn = &mut config.connection;
        if let Some(ref host) = self.host {
            conn.host = host.clone();
        }
        if let Some(port) = self.port {
            conn.port = port;
        }
        if let Some(ref database) = self.database {
            conn.database = database.clone();
        }
        if let Some(ref user) = self.user {
            conn.username = Some(user.clone());
        }
        if let Some(ref password) = self.password {
            conn.password = Some(password.clone());
        }
        if let Some(ref sslmode) = self.sslmode {
            conn.ssl_mode = sslmode.clone();
        }

        if let Some(ms) = self.spawn_interval_ms {
            config.spawner.admission_interval_ms = ms;
        }
        if self.max_live.is_some() {
            config.spawner.max_live_connections = self.max_live;
        }
        if let Some(ms) = self.report_interval_ms {
            config.reporter.interval_ms = ms;
        }
        if let Some(format) = self.format {
            config.reporter.format = format;
        }
        if self.seed.is_some() {
            config.simulator.seed = self.seed;
        }
        if let Some(ref level) = self.log_level {
            config.logging.level = level.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.print_config {
        print!("{}", StressConfig::sample_toml()?);
        return Ok(());
    }

    let mut config = ConfigLoader::new()
        .load_from_file(cli.config.as_deref())
        .load_from_env()
        .build()?;
    cli.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    init_logging(&config.logging)?;

    let backend: Arc<dyn Backend> = if cli.dry_run {
        let error_statement = config.simulator.statements.error.clone();
        info!("Dry run: using the in-process backend");
        Arc::new(MemoryBackend::new().with_failing_statement(error_statement))
    } else {
        let backend = PostgresBackend::new(&config.connection)
            .context("Failed to prepare PostgreSQL connection options")?;
        info!(endpoint = backend.endpoint(), "Targeting PostgreSQL");
        Arc::new(backend)
    };

    let generator = LoadGenerator::new(config, backend);
    let cancel = generator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            cancel.cancel();
        }
    });

    let final_snapshot = generator
        .run(cli.duration.map(Duration::from_secs), std::io::stdout())
        .await?;

    info!(
        queries = final_snapshot.queries_issued,
        exited = final_snapshot.exited_connections,
        active = final_snapshot.active_connections,
        waiting = final_snapshot.waiting_connections,
        "Load generator stopped"
    );

    Ok(())
}
