//! Agent configuration

use anyhow::{Context, Result};
use clap::ValueEnum;
use hostwatch_lib::MonitorConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line
    #[default]
    Json,
    /// Multi-line human-readable output
    Pretty,
}

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Name reported in every log line
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default)]
    pub log_format: LogFormat,

    /// Replay synthetic host data instead of reading the OS
    #[serde(default)]
    pub simulate: bool,

    /// Mount point whose usage is reported as disk usage
    #[serde(default = "default_disk_mount")]
    pub disk_mount: PathBuf,

    #[serde(default)]
    pub monitor: MonitorConfig,
}

fn default_node_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_disk_mount() -> PathBuf {
    PathBuf::from("/")
}

impl AgentConfig {
    /// Load configuration from an optional file, then `HOSTWATCH_*` environment variables
    ///
    /// Nested keys use a double underscore: `HOSTWATCH_MONITOR__INTERVAL_SECS=10`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix("HOSTWATCH")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("failed to read agent configuration")?;

        Self::from_settings(settings)
    }

    /// Deserialize and validate already-merged settings
    pub fn from_settings(settings: config::Config) -> Result<Self> {
        let config: AgentConfig = settings
            .try_deserialize()
            .context("failed to parse agent configuration")?;
        config
            .monitor
            .validate()
            .context("invalid monitor configuration")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{File, FileFormat};

    fn from_toml(toml: &str) -> Result<AgentConfig> {
        let settings = config::Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        AgentConfig::from_settings(settings)
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = from_toml("").unwrap();
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.log_format, LogFormat::Json);
        assert!(!config.simulate);
        assert_eq!(config.disk_mount, PathBuf::from("/"));
        assert_eq!(config.monitor, MonitorConfig::default());
    }

    #[test]
    fn test_nested_monitor_settings() {
        let config = from_toml(
            r#"
            node_name = "build-box"
            log_format = "pretty"
            simulate = true

            [monitor]
            interval_secs = 10

            [monitor.detector]
            warmup_count = 200
            seed = 42

            [monitor.thresholds]
            cpu = 70.0
            "#,
        )
        .unwrap();

        assert_eq!(config.node_name, "build-box");
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.simulate);
        assert_eq!(config.monitor.interval_secs, 10);
        assert_eq!(config.monitor.detector.warmup_count, 200);
        assert_eq!(config.monitor.detector.seed, Some(42));
        assert_eq!(config.monitor.thresholds.cpu, 70.0);
        assert_eq!(config.monitor.thresholds.memory, 85.0);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hostwatch.toml");
        std::fs::write(
            &path,
            "api_port = 9100\ndisk_mount = \"/data\"\n\n[monitor.anomaly_log]\nretention = 32\n",
        )
        .unwrap();

        let config = AgentConfig::load(Some(&path)).unwrap();
        assert_eq!(config.api_port, 9100);
        assert_eq!(config.disk_mount, PathBuf::from("/data"));
        assert_eq!(config.monitor.anomaly_log.retention, 32);
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(AgentConfig::load(Some(&dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn test_invalid_monitor_config_is_rejected() {
        let result = from_toml(
            r#"
            [monitor.detector]
            warmup_count = 10
            subsample_size = 64
            "#,
        );
        let err = result.unwrap_err();
        assert!(format!("{:#}", err).contains("subsample_size"));
    }
}
