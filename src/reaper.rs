//! Orphan reaping for PID 1.
//!
//! Processes re-parented to init must be waited on or they stay zombies
//! forever. Children spawned by orc itself are waited on by their owners, so
//! the reaper peeks at each exited child first and only collects those it
//! does not know about.

use crate::process::ExitInfo;
use nix::errno::Errno;
use nix::sys::wait::{waitid, waitpid, Id, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::collections::HashSet;
use std::io;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, error, info};

/// Fallback sweep interval, in case an orphan exited while a tracked child
/// was blocking the queue.
const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// PIDs of children owned by orc.
#[derive(Debug, Default)]
pub struct ChildRegistry {
    pids: Mutex<HashSet<u32>>,
}

impl ChildRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<u32>> {
        self.pids.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Spawn `cmd` and track the new child.
    ///
    /// The registry stays locked across the fork so the reaper cannot observe
    /// the child before it is tracked.
    pub fn spawn(&self, cmd: &mut Command) -> io::Result<Child> {
        let mut pids = self.lock();
        let child = cmd.spawn()?;
        if let Some(pid) = child.id() {
            pids.insert(pid);
        }
        Ok(child)
    }

    /// Stop tracking a child once its owner has waited on it.
    pub fn release(&self, pid: u32) {
        self.lock().remove(&pid);
    }

    /// Check whether `pid` is owned by orc.
    pub fn is_tracked(&self, pid: u32) -> bool {
        self.lock().contains(&pid)
    }

    /// Reap every exited child that is not tracked.
    ///
    /// Stops at the first exited child that is tracked; its owner will reap
    /// it and the next SIGCHLD or sweep continues from there.
    pub fn reap_orphans(&self) -> Vec<(u32, ExitInfo)> {
        let mut reaped = Vec::new();

        loop {
            let pids = self.lock();

            let pid = match peek_exited() {
                Ok(Some(pid)) => pid,
                Ok(None) => break,
                Err(Errno::ECHILD) => break,
                Err(e) => {
                    error!(error = %e, "Error reaping orphans");
                    break;
                }
            };

            if pids.contains(&pid) {
                break;
            }

            match waitpid(Pid::from_raw(pid as i32), None) {
                Ok(WaitStatus::Exited(_, code)) => {
                    debug!(pid = pid, code = code, "Reaped orphan process");
                    reaped.push((pid, ExitInfo { code, signal: None }));
                }
                Ok(WaitStatus::Signaled(_, sig, _)) => {
                    debug!(pid = pid, signal = ?sig, "Reaped signaled orphan process");
                    reaped.push((
                        pid,
                        ExitInfo {
                            code: 128 + sig as i32,
                            signal: Some(sig as i32),
                        },
                    ));
                }
                Ok(_) => continue,
                Err(e) => {
                    error!(pid = pid, error = %e, "Error reaping orphan");
                    break;
                }
            }
        }

        reaped
    }
}

/// PID of an exited child, without consuming its status.
fn peek_exited() -> nix::Result<Option<u32>> {
    let status = waitid(
        Id::All,
        WaitPidFlag::WEXITED | WaitPidFlag::WNOHANG | WaitPidFlag::WNOWAIT,
    )?;
    Ok(status.pid().map(|pid| pid.as_raw() as u32))
}

/// Reap orphans on every SIGCHLD until the runtime shuts down.
pub async fn run(registry: std::sync::Arc<ChildRegistry>) {
    let mut sigchld = match signal(SignalKind::child()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "Failed to install SIGCHLD handler, orphans will not be reaped");
            return;
        }
    };

    info!("Orphan reaper running");

    let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        tokio::select! {
            _ = sigchld.recv() => {}
            _ = sweep.tick() => {}
        }

        let reaped = registry.reap_orphans();
        if !reaped.is_empty() {
            debug!(count = reaped.len(), "Reaped orphans");
        }
    }
}
