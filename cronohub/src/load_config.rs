/// `load_config` module: locates the cronohub config directory and loads the optional
/// `config.yaml` engine settings found there.
///
/// Credentials never live in this file: plugins read them from the environment
/// (optionally populated from `.env`). The YAML only tunes the run itself.
///
/// # Accepted YAML
/// ```yaml
/// staging_dir: ./target
/// concurrency: 5
/// timeout_secs: 300
/// retry:
///   max_attempts: 3
///   base_delay_ms: 500
///   max_delay_ms: 30000
/// ```
/// Every key is optional; a missing file means defaults.
///
/// # Precedence
/// command-line flag > `config.yaml` > built-in default.
use anyhow::{Context, Result};
use cronohub_core::fetch::FetchSettings;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};

pub const CONFIG_DIR_ENV: &str = "CRONOHUB_CONFIG_DIR";
pub const CONFIG_FILE_NAME: &str = "config.yaml";
pub const DEFAULT_STAGING_DIR: &str = "./target";

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CliConfig {
    pub staging_dir: Option<PathBuf>,
    pub concurrency: Option<usize>,
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub retry: RetrySection,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySection {
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
}

impl CliConfig {
    /// Fetch settings with file values applied over the defaults.
    pub fn fetch_settings(&self) -> FetchSettings {
        let mut settings = FetchSettings::default();
        if let Some(concurrency) = self.concurrency {
            settings.concurrency = concurrency;
        }
        if let Some(secs) = self.timeout_secs {
            settings.timeout = Duration::from_secs(secs);
        }
        if let Some(attempts) = self.retry.max_attempts {
            settings.retry.max_attempts = attempts;
        }
        if let Some(ms) = self.retry.base_delay_ms {
            settings.retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.retry.max_delay_ms {
            settings.retry.max_delay = Duration::from_millis(ms);
        }
        settings
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.staging_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STAGING_DIR))
    }
}

/// `$CRONOHUB_CONFIG_DIR`, or `cronohub` under the XDG config home (`~/.config/cronohub`).
pub fn default_config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    let base = xdg::BaseDirectories::new().context("Could not determine the XDG config home")?;
    Ok(base.get_config_home().join("cronohub"))
}

/// Loads `<config_dir>/config.yaml`. A missing file yields the defaults.
pub fn load_config<P: AsRef<Path>>(config_dir: P) -> Result<CliConfig> {
    let path = config_dir.as_ref().join(CONFIG_FILE_NAME);

    let config_content = match fs::read_to_string(&path) {
        Ok(content) => {
            info!(config_path = ?path, "Config file read successfully");
            content
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(config_path = ?path, "No config file, using defaults");
            return Ok(CliConfig::default());
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path,
                e
            ));
        }
    };

    // An empty document deserialises to `null`, not to an empty map.
    if config_content.trim().is_empty() {
        return Ok(CliConfig::default());
    }

    match serde_yaml::from_str::<CliConfig>(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path, ?conf, "Parsed config YAML successfully");
            Ok(conf)
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path, "Failed to parse config YAML");
            Err(anyhow::anyhow!("Failed to parse config YAML {:?}: {e}", path))
        }
    }
}
