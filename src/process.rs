//! Process spawning and signaling.
//!
//! Every service runs as the leader of its own session, so signals are
//! delivered to the whole process group and a service's children go down
//! with it.

use crate::config::ServiceSpec;
use crate::error::{Error, Result};
use crate::reaper::ChildRegistry;
use chrono::{DateTime, Utc};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use serde::Serialize;
use std::fs::File;
use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::debug;

/// Live process of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessHandle {
    /// Process ID, also the process group ID
    pub pid: u32,
    /// When the process was spawned
    pub started_at: DateTime<Utc>,
}

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExitInfo {
    /// Exit code; `128 + signal` when killed by a signal
    pub code: i32,
    /// Signal that killed the process, if any
    pub signal: Option<i32>,
}

impl ExitInfo {
    /// Exit information is unavailable; treated as a clean exit.
    pub const UNKNOWN: ExitInfo = ExitInfo {
        code: 0,
        signal: None,
    };

    /// Convert a wait status.
    pub fn from_status(status: std::process::ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => Self { code, signal: None },
            (None, Some(sig)) => Self {
                code: 128 + sig,
                signal: Some(sig),
            },
            (None, None) => Self::UNKNOWN,
        }
    }

    /// Check if the process exited successfully.
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Split a command line into program and arguments.
pub fn split_command(command: &str) -> Option<(&str, Vec<&str>)> {
    let mut parts = command.split_whitespace();
    let program = parts.next()?;
    Some((program, parts.collect()))
}

/// Build the command for a service.
///
/// Output goes to the log file when one is configured (created or truncated),
/// otherwise it is inherited. Stdin is always `/dev/null`.
pub fn build_command(spec: &ServiceSpec) -> Result<Command> {
    let (program, args) = split_command(&spec.command).ok_or_else(|| Error::Spawn {
        name: spec.name.clone(),
        reason: "empty command".to_string(),
    })?;

    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.stdin(Stdio::null());

    if let Some(ref path) = spec.log_file {
        let log = File::create(path).map_err(|source| Error::LogFile {
            name: spec.name.clone(),
            path: path.clone(),
            source,
        })?;
        let log_err = log.try_clone().map_err(|source| Error::LogFile {
            name: spec.name.clone(),
            path: path.clone(),
            source,
        })?;
        cmd.stdout(Stdio::from(log));
        cmd.stderr(Stdio::from(log_err));
    } else {
        cmd.stdout(Stdio::inherit());
        cmd.stderr(Stdio::inherit());
    }

    // Create new session for the process
    unsafe {
        cmd.pre_exec(|| {
            nix::unistd::setsid().map_err(std::io::Error::from)?;
            Ok(())
        });
    }

    Ok(cmd)
}

/// Spawn a service process, registering it so the orphan reaper leaves it alone.
pub fn spawn(spec: &ServiceSpec, registry: &ChildRegistry) -> Result<(Child, ProcessHandle)> {
    let mut cmd = build_command(spec)?;

    let child = registry.spawn(&mut cmd).map_err(|e| Error::Spawn {
        name: spec.name.clone(),
        reason: format!("{}: {}", spec.command, e),
    })?;

    let pid = child.id().ok_or_else(|| Error::Spawn {
        name: spec.name.clone(),
        reason: "process exited before its PID was read".to_string(),
    })?;

    Ok((
        child,
        ProcessHandle {
            pid,
            started_at: Utc::now(),
        },
    ))
}

/// Send a signal to the process group led by `pid`.
pub fn signal_group(pid: u32, sig: Signal) -> nix::Result<()> {
    killpg(Pid::from_raw(pid as i32), sig)?;
    debug!(pid = pid, signal = ?sig, "Sent signal to process group");
    Ok(())
}
