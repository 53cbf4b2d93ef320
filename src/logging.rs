use serde::{Deserialize, Serialize};
use tracing::{info, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::error::{Error, Result};

/// ログ設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// ログレベル (trace, debug, info, warn, error)。RUST_LOG が優先される
    pub level: String,
    /// 出力形式
    pub format: LogFormat,
    /// ANSI カラー出力
    pub ansi: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Human,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Human,
            ansi: true,
        }
    }
}

/// Build the filter from `RUST_LOG`, falling back to the configured level.
fn build_filter(config: &LogConfig) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| Error::Logging(format!("invalid log level '{}': {}", config.level, e)))
}

/// Formatting layer writing to `writer`
fn fmt_layer<S, W>(config: &LogConfig, writer: W) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a> + 'static,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match config.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_writer(writer)
            .boxed(),
        LogFormat::Human => fmt::layer()
            .with_target(false)
            .with_ansi(config.ansi)
            .with_writer(writer)
            .boxed(),
    }
}

/// ロギングシステムを初期化
///
/// Diagnostics go to stderr so that stdout carries nothing but report
/// lines. Calling this twice is an error rather than a panic.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let filter = build_filter(config)?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer(config, std::io::stderr))
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))?;

    info!(level = %config.level, format = ?config.format, "Logging system initialized");
    Ok(())
}
