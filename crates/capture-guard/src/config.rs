use std::path::{Path, PathBuf};

use body_capture::CaptureSettings;
use request_policy::{FilterRegistryConfig, PollerConfig};
use serde::Deserialize;
use tracing::{info, warn};

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub capture: CaptureSettings,
    #[serde(default)]
    pub policy: PollerConfig,
    #[serde(default)]
    pub filters: FilterRegistryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_span_log_path")]
    pub span_log_path: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            span_log_path: default_span_log_path(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_span_log_path() -> PathBuf {
    PathBuf::from("spans.jsonl")
}

/// Where the active configuration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    File,
    Defaults,
}

/// Load configuration from a YAML file, falling back to defaults when the
/// file does not exist.
///
/// Nothing is logged here: the subscriber is configured from the result, so
/// the caller reports the source with [`report`] once tracing is up.
pub fn load(path: &Path) -> anyhow::Result<(Config, ConfigSource)> {
    if !path.exists() {
        return Ok((Config::default(), ConfigSource::Defaults));
    }

    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

    let config: Config = serde_yml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {e}", path.display()))?;

    Ok((config, ConfigSource::File))
}

pub fn report(path: &Path, source: ConfigSource) {
    match source {
        ConfigSource::File => info!(path = %path.display(), "configuration loaded"),
        ConfigSource::Defaults => warn!(
            path = %path.display(),
            "configuration file not found; using defaults"
        ),
    }
}
