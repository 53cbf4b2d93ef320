//! Configuration for the load generator.
//!
//! 設定は「デフォルト値 → 設定ファイル → 環境変数 → CLI 引数」の順に上書きされる。

pub mod loader;
pub mod types;

pub use loader::ConfigLoader;
pub use types::{
    ConnectionConfig, ReportFormat, ReporterConfig, SimulatorConfig, SpawnerConfig, Statements,
    StressConfig,
};

/// Environment variable prefix (`POOL_STRESS_CONNECTION__HOST=...`)
pub const ENV_PREFIX: &str = "POOL_STRESS";

impl StressConfig {
    /// サンプル設定ファイル (TOML) を生成
    pub fn sample_toml() -> crate::Result<String> {
        let body = toml::to_string_pretty(&StressConfig::default())
            .map_err(|e| crate::Error::Config(e.to_string()))?;

        Ok(format!(
            r#"# pool-stress configuration
#
# Save as pool-stress.toml, or pass with --config.
# Every key can be overridden from the environment, e.g.
#   POOL_STRESS_CONNECTION__PORT=5432
#   POOL_STRESS_SPAWNER__MAX_LIVE_CONNECTIONS=500
#
# [simulator] probabilities are evaluated once per iteration, in order:
#   error -> stall -> terminate

{}"#,
            body
        ))
    }
}
