//! Service instances and their supervision.
//!
//! A continuous service is watched by its own task:
//!
//! ```text
//! Stopped -> Starting -> Running -> exit 0                 -> Stopped
//!                                -> exit != 0, restart     -> Backoff -> Starting
//!                                -> exit != 0, no restart  -> Stopped
//!            (Running | Backoff) -> stop requested -> Stopping -> Stopped
//! ```
//!
//! A oneshot service runs `Starting -> Running -> Stopped` once, in the
//! caller's task.
//!
//! The process handle lives in a mutex shared by the supervision task and the
//! stop path. A stop request is recorded in the same slot, independently of
//! the exit code, so a process that dies from our SIGTERM is never restarted.

use crate::config::{ServiceMode, ServiceSpec, SystemSettings};
use crate::error::{Error, Result};
use crate::process::{self, ExitInfo, ProcessHandle};
use crate::reaper::ChildRegistry;
use chrono::{DateTime, Utc};
use nix::errno::Errno;
use nix::sys::signal::Signal;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Current state of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    /// No process and none coming
    #[default]
    Stopped,
    /// Process is being spawned
    Starting,
    /// Process is running
    Running,
    /// Waiting before a restart
    Backoff,
    /// Termination signal sent, waiting for exit
    Stopping,
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceState::Stopped => write!(f, "stopped"),
            ServiceState::Starting => write!(f, "starting"),
            ServiceState::Running => write!(f, "running"),
            ServiceState::Backoff => write!(f, "backoff"),
            ServiceState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Timing knobs for supervision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorOptions {
    /// Delay before restarting a failed service
    pub restart_delay: Duration,
    /// Grace period between SIGTERM and SIGKILL, and after SIGKILL
    pub stop_timeout: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        SupervisorOptions::from(&SystemSettings::default())
    }
}

impl From<&SystemSettings> for SupervisorOptions {
    fn from(settings: &SystemSettings) -> Self {
        Self {
            restart_delay: settings.restart_delay,
            stop_timeout: settings.stop_timeout,
        }
    }
}

/// Service status information for display.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    /// Unique instance ID
    pub id: Uuid,
    /// Service name
    pub name: String,
    /// Execution mode
    pub mode: ServiceMode,
    /// Current state
    pub state: ServiceState,
    /// Live process ID
    pub pid: Option<u32>,
    /// Number of restarts after failures
    pub restart_count: u32,
    /// When the current or last process was spawned
    pub started_at: Option<DateTime<Utc>>,
    /// When the last process was reaped
    pub stopped_at: Option<DateTime<Utc>>,
    /// How the last process ended
    pub last_exit: Option<ExitInfo>,
}

#[derive(Debug, Default)]
struct Slot {
    handle: Option<ProcessHandle>,
    stop_requested: bool,
    state: ServiceState,
    restart_count: u32,
    last_exit: Option<ExitInfo>,
    wait_error: Option<String>,
    started_at: Option<DateTime<Utc>>,
    stopped_at: Option<DateTime<Utc>>,
}

struct Shared {
    id: Uuid,
    spec: ServiceSpec,
    options: SupervisorOptions,
    registry: Arc<ChildRegistry>,
    slot: Mutex<Slot>,
    wake: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Spawn a process unless a stop was requested.
    ///
    /// The slot is held across the spawn so the stop path sees either no
    /// process or the new one, never something in between.
    fn launch(&self) -> Result<Option<Child>> {
        let mut slot = self.lock();
        if slot.stop_requested {
            slot.state = ServiceState::Stopped;
            return Ok(None);
        }

        slot.state = ServiceState::Starting;
        info!(service = %self.spec.name, command = %self.spec.command, "Starting service");

        match process::spawn(&self.spec, &self.registry) {
            Ok((child, handle)) => {
                info!(service = %self.spec.name, pid = handle.pid, "Spawned process");
                slot.handle = Some(handle);
                slot.state = ServiceState::Running;
                slot.started_at = Some(handle.started_at);
                slot.stopped_at = None;
                Ok(Some(child))
            }
            Err(e) => {
                slot.state = ServiceState::Stopped;
                Err(e)
            }
        }
    }

    /// Wait for the current process and clear the handle.
    ///
    /// Returns how it ended and whether a stop had been requested.
    async fn reap(&self, child: &mut Child) -> (ExitInfo, bool) {
        let result = child.wait().await;

        let mut slot = self.lock();
        let exit = match result {
            Ok(status) => {
                slot.wait_error = None;
                ExitInfo::from_status(status)
            }
            Err(e) => {
                warn!(service = %self.spec.name, error = %e, "Failed to wait for process, assuming clean exit");
                slot.wait_error = Some(e.to_string());
                ExitInfo::UNKNOWN
            }
        };

        if let Some(handle) = slot.handle.take() {
            self.registry.release(handle.pid);
        }
        slot.last_exit = Some(exit);
        slot.stopped_at = Some(Utc::now());
        slot.state = ServiceState::Stopped;

        (exit, slot.stop_requested)
    }

    /// Move to backoff unless a stop was requested meanwhile.
    fn enter_backoff(&self) -> bool {
        let mut slot = self.lock();
        if slot.stop_requested {
            return false;
        }
        slot.state = ServiceState::Backoff;
        true
    }

    /// Supervision loop for a continuous service.
    async fn supervise(self: Arc<Self>, mut child: Child) {
        let name = self.spec.name.as_str();

        loop {
            let (exit, stop_requested) = self.reap(&mut child).await;

            if stop_requested {
                info!(service = %name, code = exit.code, "Service stopped on request");
                return;
            }

            if exit.success() {
                info!(service = %name, "Service exited successfully");
                return;
            }

            warn!(
                service = %name,
                code = exit.code,
                signal = ?exit.signal,
                "Service exited with failure"
            );

            if !self.spec.restart_on_failure {
                info!(service = %name, "Restart on failure disabled, leaving service stopped");
                return;
            }

            if !self.enter_backoff() {
                return;
            }

            let delay = self.options.restart_delay;
            info!(service = %name, delay_ms = delay.as_millis() as u64, "Restarting service after backoff");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.wake.notified() => {}
            }

            child = match self.launch() {
                Ok(Some(child)) => {
                    self.lock().restart_count += 1;
                    child
                }
                Ok(None) => {
                    info!(service = %name, "Stop requested during backoff, not restarting");
                    return;
                }
                Err(e) => {
                    error!(service = %name, error = %e, "Failed to restart service, giving up");
                    return;
                }
            };
        }
    }
}

/// A started service.
pub struct ServiceInstance {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ServiceInstance {
    /// Create an instance in the stopped state.
    pub fn new(spec: ServiceSpec, options: SupervisorOptions, registry: Arc<ChildRegistry>) -> Self {
        Self {
            shared: Arc::new(Shared {
                id: Uuid::new_v4(),
                spec,
                options,
                registry,
                slot: Mutex::new(Slot::default()),
                wake: Notify::new(),
            }),
            task: Mutex::new(None),
        }
    }

    /// Service name.
    pub fn name(&self) -> &str {
        &self.shared.spec.name
    }

    /// Current state.
    pub fn state(&self) -> ServiceState {
        self.shared.lock().state
    }

    /// PID of the live process, if any.
    pub fn pid(&self) -> Option<u32> {
        self.shared.lock().handle.map(|h| h.pid)
    }

    /// Number of restarts after failures.
    pub fn restart_count(&self) -> u32 {
        self.shared.lock().restart_count
    }

    /// Snapshot of the instance.
    pub fn status(&self) -> ServiceStatus {
        let slot = self.shared.lock();
        ServiceStatus {
            id: self.shared.id,
            name: self.shared.spec.name.clone(),
            mode: self.shared.spec.mode,
            state: slot.state,
            pid: slot.handle.map(|h| h.pid),
            restart_count: slot.restart_count,
            started_at: slot.started_at,
            stopped_at: slot.stopped_at,
            last_exit: slot.last_exit,
        }
    }

    /// Start the service.
    ///
    /// Oneshot services run to completion before this returns. Continuous
    /// services return once the first process is spawned, supervision then
    /// continues in the background.
    pub async fn start(&self) -> Result<()> {
        match self.shared.spec.mode {
            ServiceMode::Oneshot => self.run_once().await,
            ServiceMode::Continuous => self.start_supervised(),
        }
    }

    fn start_supervised(&self) -> Result<()> {
        let child = match self.shared.launch()? {
            Some(child) => child,
            None => return Ok(()),
        };

        let task = tokio::spawn(Arc::clone(&self.shared).supervise(child));
        *self.lock_task() = Some(task);
        Ok(())
    }

    async fn run_once(&self) -> Result<()> {
        let mut child = match self.shared.launch()? {
            Some(child) => child,
            None => return Ok(()),
        };

        let (exit, _) = self.shared.reap(&mut child).await;
        if exit.success() {
            info!(service = %self.name(), "Oneshot service completed");
            Ok(())
        } else {
            Err(Error::OneshotFailed {
                name: self.name().to_string(),
                code: exit.code,
            })
        }
    }

    fn lock_task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Stop the service.
    ///
    /// Sends SIGTERM to the process group and waits for the supervision task
    /// to reap it. After `stop_timeout` the group gets SIGKILL and one more
    /// grace period. A service without a live process is a no-op.
    pub async fn stop(&self) -> Result<()> {
        let name = self.name();

        let handle = {
            let mut slot = self.shared.lock();
            slot.stop_requested = true;
            if slot.handle.is_some() {
                slot.state = ServiceState::Stopping;
            }
            slot.handle
        };
        self.shared.wake.notify_one();
        let task = self.lock_task().take();

        let handle = match handle {
            Some(handle) => handle,
            None => {
                info!(service = %name, "Service is not running");
                if let Some(task) = task {
                    // Leaving backoff or already finished; either way prompt.
                    let _ = tokio::time::timeout(self.shared.options.stop_timeout, task).await;
                }
                return Ok(());
            }
        };

        info!(service = %name, pid = handle.pid, "Stopping service");

        if let Err(e) = self.send(handle.pid, Signal::SIGTERM) {
            *self.lock_task() = task;
            return Err(e);
        }

        let mut task = match task {
            Some(task) => task,
            None => return Ok(()),
        };

        let timeout = self.shared.options.stop_timeout;
        let joined = match tokio::time::timeout(timeout, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(
                    service = %name,
                    pid = handle.pid,
                    timeout_ms = timeout.as_millis() as u64,
                    "Service didn't exit in time, sending SIGKILL"
                );
                if let Err(e) = self.send(handle.pid, Signal::SIGKILL) {
                    *self.lock_task() = Some(task);
                    return Err(e);
                }

                match tokio::time::timeout(timeout, &mut task).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        error!(service = %name, pid = handle.pid, "Service survived SIGKILL");
                        *self.lock_task() = Some(task);
                        return Err(Error::StopTimeout {
                            name: name.to_string(),
                            timeout_ms: timeout.as_millis() as u64,
                        });
                    }
                }
            }
        };

        if let Err(e) = joined {
            error!(service = %name, error = %e, "Supervision task failed");
            return Err(Error::Wait {
                name: name.to_string(),
                reason: e.to_string(),
            });
        }

        if let Some(reason) = self.shared.lock().wait_error.clone() {
            error!(service = %name, error = %reason, "Failed to wait for process to stop");
            return Err(Error::Wait {
                name: name.to_string(),
                reason,
            });
        }

        info!(service = %name, "Service stopped");
        Ok(())
    }

    /// Signal the process group; a group that is already gone is not an error.
    fn send(&self, pid: u32, sig: Signal) -> Result<()> {
        match process::signal_group(pid, sig) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => {
                debug!(service = %self.name(), pid = pid, "Process already exited");
                Ok(())
            }
            Err(e) => {
                error!(service = %self.name(), pid = pid, signal = ?sig, error = %e, "Failed to send signal");
                Err(Error::Signal {
                    name: self.name().to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }
}
