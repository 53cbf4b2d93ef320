use super::types::StressConfig;
use super::ENV_PREFIX;
use anyhow::{Context, Result};
use config::{Config, Environment, File};

/// Configuration loader with builder pattern
pub struct ConfigLoader {
    config_file: Option<String>,
    load_env: bool,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            config_file: None,
            load_env: false,
        }
    }

    /// Load configuration from file
    pub fn load_from_file(mut self, path: Option<&str>) -> Self {
        self.config_file = path.map(String::from);
        self
    }

    /// Load configuration from environment variables
    pub fn load_from_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    /// Build the final configuration
    pub fn build(self) -> Result<StressConfig> {
        let mut builder =
            Config::builder().add_source(Config::try_from(&StressConfig::default())?);

        if let Some(config_path) = &self.config_file {
            // An explicitly named file has to exist
            builder = builder.add_source(File::with_name(config_path).required(true));
        } else {
            builder = builder
                .add_source(File::with_name("pool-stress").required(false))
                .add_source(File::with_name("config/pool-stress").required(false));
        }

        if self.load_env {
            builder = builder.add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let config: StressConfig = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate().context("Invalid configuration")?;

        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReportFormat;
    use std::io::Write;

    #[test]
    fn test_defaults_without_sources() {
        let config = ConfigLoader::new()
            .load_from_file(Some("/nonexistent/never-there.toml"))
            .build();
        assert!(config.is_err());

        let config = ConfigLoader::new().build().unwrap();
        assert_eq!(config, StressConfig::default());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[connection]
host = "pgbouncer.internal"
port = 6543

[spawner]
admission_interval_ms = 20
max_live_connections = 300

[reporter]
format = "json"
"#
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let config = ConfigLoader::new()
            .load_from_file(Some(&path))
            .build()
            .unwrap();

        assert_eq!(config.connection.host, "pgbouncer.internal");
        assert_eq!(config.connection.port, 6543);
        assert_eq!(config.spawner.admission_interval_ms, 20);
        assert_eq!(config.spawner.max_live_connections, Some(300));
        assert_eq!(config.reporter.format, ReportFormat::Json);
        assert_eq!(config.simulator.max_idle_ms, 1_000);
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[simulator]\nerror_probability = 2.0").unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let err = ConfigLoader::new()
            .load_from_file(Some(&path))
            .build()
            .unwrap_err();
        assert!(format!("{:#}", err).contains("error_probability"));
    }

    #[test]
    fn test_sample_toml_round_trips() {
        let sample = StressConfig::sample_toml().unwrap();
        assert!(sample.contains("[simulator.statements]"));
        let parsed: StressConfig = toml::from_str(&sample).unwrap();
        assert_eq!(parsed, StressConfig::default());
    }
}
