//! ---
//! lbs_section: "01-core-functionality"
//! lbs_subsection: "module"
//! lbs_type: "source"
//! lbs_scope: "code"
//! lbs_description: "Shared primitives and utilities for the lb-sync runtime."
//! lbs_version: "v0.0.0-prealpha"
//! lbs_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_region() -> String {
    "us-west-2".to_owned()
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(150)
}

fn default_output_path() -> PathBuf {
    PathBuf::from("/etc/haproxy/haproxy.cfg")
}

fn default_template_path() -> PathBuf {
    PathBuf::from("haproxy.cfg.tmpl")
}

fn default_ssl_cert() -> PathBuf {
    PathBuf::from("/etc/letsencrypt/live/example.com.crt")
}

fn default_reload_service() -> String {
    "haproxy".to_owned()
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_metrics_listen() -> SocketAddr {
    "0.0.0.0:9464"
        .parse()
        .expect("valid default metrics address")
}

/// Primary configuration object for the lb-sync daemon.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Name of the Auto Scaling group whose membership is reconciled.
    pub group: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_poll_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub poll_interval: Duration,
    /// Destination configuration file, fully overwritten on each change.
    #[serde(default = "default_output_path")]
    pub output: PathBuf,
    /// Template file, read and parsed once at startup.
    #[serde(default = "default_template_path")]
    pub template: PathBuf,
    /// Certificate path substituted into the template verbatim.
    #[serde(default = "default_ssl_cert")]
    pub ssl_cert: PathBuf,
    #[serde(default)]
    pub reload: ReloadConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "LB_SYNC_CONFIG";

    /// Load configuration from disk, respecting the `LB_SYNC_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.group.trim().is_empty() {
            return Err(anyhow!("configuration must name a non-empty group"));
        }
        if self.poll_interval.is_zero() {
            return Err(anyhow!("poll_interval must be a positive number of seconds"));
        }
        if self.template.as_os_str().is_empty() {
            return Err(anyhow!("template path must not be empty"));
        }
        if self.output.as_os_str().is_empty() {
            return Err(anyhow!("output path must not be empty"));
        }
        self.reload.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Mechanism used to make the load balancer pick up a rewritten config.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReloadMode {
    /// `systemctl reload <service>`
    Systemd,
    /// `service <service> reload`
    #[default]
    Service,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReloadConfig {
    #[serde(default)]
    pub mode: ReloadMode,
    #[serde(default = "default_reload_service")]
    pub service: String,
}

impl ReloadConfig {
    pub fn validate(&self) -> Result<()> {
        if self.service.trim().is_empty() {
            return Err(anyhow!("reload service name must not be empty"));
        }
        Ok(())
    }
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            mode: ReloadMode::default(),
            service: default_reload_service(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}

impl std::str::FromStr for ReloadMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "systemd" => Ok(ReloadMode::Systemd),
            "service" => Ok(ReloadMode::Service),
            other => Err(format!("unknown reload mode: {}", other)),
        }
    }
}
