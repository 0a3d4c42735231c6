use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::control::{DEFAULT_CONTROL_PROGRAM, InstallOptions};
use crate::coordinator::CoordinatorOptions;
use crate::settings::ServiceObserverSettings;
use crate::tail::TailOptions;

pub const CONFIG_FILE_NAMES: [&str; 3] = ["observer.yaml", "observer.yml", ".observer.yaml"];
pub const CONFIG_ENV: &str = "OBSERVER_CONFIG";

/// Tunables shared by every settings set
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ObserverOptions {
    /// Wait after start/stop before re-querying the service
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Multi-service poll period
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Log tail poll period
    #[serde(default = "default_tail_poll_ms")]
    pub tail_poll_ms: u64,

    /// Bytes of existing log shown when tailing starts
    #[serde(default = "default_tail_backlog_bytes")]
    pub tail_backlog_bytes: u64,

    /// Service-control executable
    #[serde(default = "default_control_program")]
    pub control_program: PathBuf,

    /// Register installed services for automatic start
    #[serde(default)]
    pub auto_start: bool,
}

fn default_settle_delay_ms() -> u64 {
    3000
}
fn default_poll_interval_ms() -> u64 {
    5000
}
fn default_tail_poll_ms() -> u64 {
    1000
}
fn default_tail_backlog_bytes() -> u64 {
    2048
}
fn default_control_program() -> PathBuf {
    PathBuf::from(DEFAULT_CONTROL_PROGRAM)
}

impl Default for ObserverOptions {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            tail_poll_ms: default_tail_poll_ms(),
            tail_backlog_bytes: default_tail_backlog_bytes(),
            control_program: default_control_program(),
            auto_start: false,
        }
    }
}

impl ObserverOptions {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn coordinator_options(&self) -> CoordinatorOptions {
        CoordinatorOptions {
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            tail: TailOptions {
                poll_interval: Duration::from_millis(self.tail_poll_ms),
                backlog_bytes: self.tail_backlog_bytes,
            },
            install: InstallOptions {
                auto_start: self.auto_start,
            },
        }
    }
}

/// Root configuration file structure
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ObserverConfig {
    /// Settings sets, the first one is loaded at startup
    pub services: Vec<ServiceObserverSettings>,

    #[serde(default)]
    pub options: ObserverOptions,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid configuration: {message}")]
    Invalid { message: String },

    #[error("no config file found, searched: {searched:?}")]
    NotFound { searched: Vec<PathBuf> },
}

impl ObserverConfig {
    /// A config holding a single settings set, for flag-only startup
    pub fn single(settings: ServiceObserverSettings) -> Self {
        Self {
            services: vec![settings],
            options: ObserverOptions::default(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: ObserverConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Search for config file: `OBSERVER_CONFIG`, then the standard names in
    /// `start_dir` and its parents
    pub fn discover(start_dir: &Path) -> Result<(PathBuf, Self), ConfigError> {
        let mut searched = Vec::new();

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Ok((path.clone(), Self::load(&path)?));
            }
            searched.push(path);
        }

        let mut dir = Some(start_dir);
        while let Some(current) = dir {
            for name in &CONFIG_FILE_NAMES {
                let path = current.join(name);
                if path.exists() {
                    return Ok((path.clone(), Self::load(&path)?));
                }
                searched.push(path);
            }
            dir = current.parent();
        }

        Err(ConfigError::NotFound { searched })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.services.is_empty() {
            return Err(ConfigError::Invalid {
                message: "no services configured".into(),
            });
        }

        for (idx, svc) in self.services.iter().enumerate() {
            if !svc.is_meaningful() {
                return Err(ConfigError::Invalid {
                    message: format!("service #{} needs a name or a log path", idx + 1),
                });
            }
        }

        Ok(())
    }
}
