//! Configuration model.
//!
//! Files are deserialized into the `Raw*` types and then resolved into
//! [`Config`]. Defaults are applied once, during resolution, so nothing
//! downstream ever has to ask whether a value was present in the file.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/orc.toml";

/// Default interactive shell.
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// Delay before a failed continuous service is started again.
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(1);

/// Grace period between SIGTERM and SIGKILL when stopping a service.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// How a service is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceMode {
    /// Long-running, supervised in the background
    #[default]
    Continuous,
    /// Run once to completion during boot
    Oneshot,
}

impl std::fmt::Display for ServiceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceMode::Continuous => write!(f, "continuous"),
            ServiceMode::Oneshot => write!(f, "oneshot"),
        }
    }
}

/// A validated service descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceSpec {
    /// Service name, used for logging only
    pub name: String,
    /// Command line, program followed by whitespace separated arguments
    pub command: String,
    /// File receiving both stdout and stderr; inherit when unset
    pub log_file: Option<PathBuf>,
    /// Execution mode
    pub mode: ServiceMode,
    /// Restart after a nonzero exit (continuous mode only)
    pub restart_on_failure: bool,
}

impl ServiceSpec {
    /// Create a continuous service that restarts on failure.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            log_file: None,
            mode: ServiceMode::Continuous,
            restart_on_failure: true,
        }
    }

    /// Run the service once instead of supervising it.
    pub fn oneshot(mut self) -> Self {
        self.mode = ServiceMode::Oneshot;
        self
    }

    /// Set the restart-on-failure flag.
    pub fn with_restart(mut self, restart: bool) -> Self {
        self.restart_on_failure = restart;
        self
    }

    /// Redirect output to a log file.
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }
}

/// System-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemSettings {
    /// Interactive shell started after boot
    pub shell: PathBuf,
    /// Grace period before SIGKILL
    #[serde(with = "secs")]
    pub stop_timeout: Duration,
    /// Backoff between restarts
    #[serde(with = "secs")]
    pub restart_delay: Duration,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            shell: PathBuf::from(DEFAULT_SHELL),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            restart_delay: DEFAULT_RESTART_DELAY,
        }
    }
}

/// Fully resolved configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Config {
    /// System settings
    pub system: SystemSettings,
    /// Services in start order
    pub services: Vec<ServiceSpec>,
}

/// Configuration as it appears on disk.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfig {
    #[serde(default)]
    pub system: RawSystem,
    #[serde(default)]
    pub services: Vec<RawService>,
}

/// `[system]` table as it appears on disk.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSystem {
    pub shell: Option<PathBuf>,
    pub stop_timeout: Option<u64>,
    pub restart_delay: Option<u64>,
}

/// `[[services]]` entry as it appears on disk.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawService {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub command: String,
    pub log_file: Option<PathBuf>,
    #[serde(default)]
    pub mode: ServiceMode,
    pub restart_on_failure: Option<bool>,
}

impl RawService {
    /// Validate and apply defaults.
    pub fn resolve(self, index: usize) -> Result<ServiceSpec> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(Error::Config(format!("service #{} has no name", index + 1)));
        }
        if self.command.trim().is_empty() {
            return Err(Error::Config(format!("service {} has no command", name)));
        }

        Ok(ServiceSpec {
            name,
            command: self.command.trim().to_string(),
            log_file: self.log_file.filter(|p| !p.as_os_str().is_empty()),
            mode: self.mode,
            restart_on_failure: self.restart_on_failure.unwrap_or(true),
        })
    }
}

impl RawConfig {
    /// Validate and apply defaults.
    pub fn resolve(self) -> Result<Config> {
        for (key, value) in [
            ("stop_timeout", self.system.stop_timeout),
            ("restart_delay", self.system.restart_delay),
        ] {
            if value == Some(0) {
                return Err(Error::Config(format!(
                    "system.{} must be at least 1 second",
                    key
                )));
            }
        }

        let defaults = SystemSettings::default();
        let system = SystemSettings {
            shell: self
                .system
                .shell
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(defaults.shell),
            stop_timeout: self
                .system
                .stop_timeout
                .map(Duration::from_secs)
                .unwrap_or(defaults.stop_timeout),
            restart_delay: self
                .system
                .restart_delay
                .map(Duration::from_secs)
                .unwrap_or(defaults.restart_delay),
        };

        let services = self
            .services
            .into_iter()
            .enumerate()
            .map(|(i, raw)| raw.resolve(i))
            .collect::<Result<Vec<_>>>()?;

        let mut seen = HashSet::new();
        for spec in &services {
            if !seen.insert(spec.name.as_str()) {
                warn!(service = %spec.name, "Duplicate service name");
            }
        }

        Ok(Config { system, services })
    }
}

/// Durations are written as whole seconds.
mod secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }
}
