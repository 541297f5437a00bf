//! Error types for the orc init system.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for init system operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the init system.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failed to create a mount point
    #[error("Failed to create directory for mounting {}: {source}", .target.display())]
    CreateDir {
        target: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Mount error
    #[error("Failed to mount {source_path} to {}: {reason}", .target.display())]
    Mount {
        source_path: String,
        target: PathBuf,
        reason: String,
    },

    /// Unmount error
    #[error("Failed to unmount {}: {reason}", .target.display())]
    Unmount { target: PathBuf, reason: String },

    /// Process spawn error
    #[error("Failed to start service {name}: {reason}")]
    Spawn { name: String, reason: String },

    /// Service log file could not be opened
    #[error("Failed to open log file {} for service {name}: {source}", .path.display())]
    LogFile {
        name: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Signal delivery failed
    #[error("Failed to signal service {name}: {reason}")]
    Signal { name: String, reason: String },

    /// Waiting for a process failed
    #[error("Failed to wait for service {name} to stop: {reason}")]
    Wait { name: String, reason: String },

    /// Process survived SIGTERM and SIGKILL
    #[error("Service {name} did not exit within {timeout_ms}ms after SIGKILL")]
    StopTimeout { name: String, timeout_ms: u64 },

    /// Oneshot service exited unsuccessfully
    #[error("Oneshot service {name} exited with code {code}")]
    OneshotFailed { name: String, code: i32 },

    /// Power-off request failed
    #[error("Failed to power off: {0}")]
    PowerOff(#[source] nix::Error),

    /// Not running as PID 1
    #[error("Not running as PID 1 (current PID: {0})")]
    NotPid1(u32),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Nix error
    #[error("System error: {0}")]
    Nix(#[from] nix::Error),
}
