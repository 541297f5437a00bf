//! Init system core - PID 1 boot and shutdown sequencing.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::mount::{FilesystemController, Mounter, NoopMounter, SysMounter};
use crate::reaper::{self, ChildRegistry};
use crate::service::SupervisorOptions;
use crate::supervisor::ServiceSupervisor;
use async_trait::async_trait;
use nix::sys::reboot::{reboot, RebootMode};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

/// Init system configuration.
#[derive(Debug, Clone)]
pub struct InitConfig {
    /// Whether to mount virtual filesystems
    pub mount_filesystems: bool,
    /// Whether to enforce PID 1 requirement (and power off at the end)
    pub require_pid1: bool,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            mount_filesystems: true,
            require_pid1: true,
        }
    }
}

/// The interactive session run between boot and shutdown.
#[async_trait]
pub trait Session: Send + Sync {
    /// Run the session to completion.
    ///
    /// Only a failure to start the session is an error; how it exits is not.
    async fn run(&self) -> Result<()>;
}

/// Shell attached to init's standard streams.
pub struct ShellSession {
    shell: PathBuf,
    registry: Arc<ChildRegistry>,
}

impl ShellSession {
    /// Create a session running `shell`.
    pub fn new(shell: impl Into<PathBuf>, registry: Arc<ChildRegistry>) -> Self {
        Self {
            shell: shell.into(),
            registry,
        }
    }
}

#[async_trait]
impl Session for ShellSession {
    async fn run(&self) -> Result<()> {
        info!(shell = %self.shell.display(), "Starting shell");

        let mut cmd = Command::new(&self.shell);
        cmd.stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        let mut child = self.registry.spawn(&mut cmd)?;
        let pid = child.id();
        let status = child.wait().await;
        if let Some(pid) = pid {
            self.registry.release(pid);
        }

        match status {
            Ok(status) if status.success() => info!("Shell exited"),
            Ok(status) => warn!(status = %status, "Shell exited with error"),
            Err(e) => warn!(error = %e, "Failed to wait for shell"),
        }
        Ok(())
    }
}

/// Machine power control.
pub trait PowerControl: Send + Sync {
    /// Power the machine off. Only returns on failure.
    fn power_off(&self) -> nix::Result<()>;
}

/// Real power-off through the reboot syscall.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysPower;

impl PowerControl for SysPower {
    fn power_off(&self) -> nix::Result<()> {
        // Sync filesystems
        unsafe {
            libc::sync();
        }

        reboot(RebootMode::RB_POWER_OFF).map(|_| ())
    }
}

/// Power control for runs outside PID 1; leaves the machine alone.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPower;

impl PowerControl for NoPower {
    fn power_off(&self) -> nix::Result<()> {
        info!("Not running as PID 1, skipping power-off");
        Ok(())
    }
}

/// The orchestrator: filesystems, services, session, power-off.
pub struct System {
    filesystems: FilesystemController,
    services: ServiceSupervisor,
    session: Box<dyn Session>,
    power: Box<dyn PowerControl>,
    reaper: Option<Arc<ChildRegistry>>,
}

impl System {
    /// Build the system for real use.
    pub fn new(config: Config, init: InitConfig) -> Result<Self> {
        // Check if we're PID 1
        let pid = std::process::id();
        if init.require_pid1 && pid != 1 {
            return Err(Error::NotPid1(pid));
        }

        let registry = Arc::new(ChildRegistry::new());

        let mounter: Box<dyn Mounter> = if init.mount_filesystems {
            Box::new(SysMounter)
        } else {
            Box::new(NoopMounter)
        };
        let power: Box<dyn PowerControl> = if init.require_pid1 {
            Box::new(SysPower)
        } else {
            Box::new(NoPower)
        };

        let session = ShellSession::new(config.system.shell.clone(), Arc::clone(&registry));
        let services = ServiceSupervisor::new(
            config.services,
            SupervisorOptions::from(&config.system),
            Arc::clone(&registry),
        );

        let mut system = Self::from_parts(
            FilesystemController::new(mounter),
            services,
            Box::new(session),
            power,
        );
        if init.require_pid1 {
            system.reaper = Some(registry);
        }
        Ok(system)
    }

    /// Assemble a system from its parts.
    pub fn from_parts(
        filesystems: FilesystemController,
        services: ServiceSupervisor,
        session: Box<dyn Session>,
        power: Box<dyn PowerControl>,
    ) -> Self {
        Self {
            filesystems,
            services,
            session,
            power,
            reaper: None,
        }
    }

    /// Service supervisor.
    pub fn services(&self) -> &ServiceSupervisor {
        &self.services
    }

    /// Boot and hold the session.
    ///
    /// Mount failures abort before any service starts. Service failures are
    /// logged and the session still runs.
    pub async fn start(&mut self) -> Result<()> {
        info!("Orc init system starting");

        if let Some(ref registry) = self.reaper {
            tokio::spawn(reaper::run(Arc::clone(registry)));
        }

        self.filesystems.mount_all()?;

        if let Err(e) = self.services.start_all().await {
            warn!(error = %e, "Continuing boot with failed services");
        }

        if let Err(e) = self.session.run().await {
            error!(error = %e, "Failed to start shell");
        }

        Ok(())
    }

    /// Tear everything down and power off.
    ///
    /// Every stage runs regardless of earlier failures. Only a failed
    /// power-off is returned.
    pub async fn stop(&self) -> Result<()> {
        info!("Initiating shutdown");

        if let Err(e) = self.services.stop_all().await {
            error!(error = %e, "Errors occurred while stopping services");
        }

        let statuses = self.services.statuses();
        for status in &statuses {
            info!(
                service = %status.name,
                id = %status.id,
                state = %status.state,
                restarts = status.restart_count,
                exit_code = ?status.last_exit.map(|e| e.code),
                "Final service status"
            );
        }
        match serde_json::to_string(&statuses) {
            Ok(json) => debug!(statuses = %json, "Service status snapshot"),
            Err(e) => warn!(error = %e, "Failed to serialize service status"),
        }

        if let Err(e) = self.filesystems.unmount_all() {
            error!(error = %e, "Errors occurred while unmounting filesystems");
        }

        info!("Powering off");
        if let Err(e) = self.power.power_off() {
            error!(
                error = %e,
                "Failed to power off; init is about to exit and the kernel may panic"
            );
            return Err(Error::PowerOff(e));
        }

        Ok(())
    }

    /// Full lifecycle: start, then stop once the session ends.
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;
        self.stop().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mount::tests::{Op, RecordingMounter};
    use assert_matches::assert_matches;
    use nix::errno::Errno;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct CountingPower {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl PowerControl for CountingPower {
        fn power_off(&self) -> nix::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Errno::EPERM);
            }
            Ok(())
        }
    }

    struct InstantSession;

    #[async_trait]
    impl Session for InstantSession {
        async fn run(&self) -> Result<()> {
            Ok(())
        }
    }

    fn system(mounter: &RecordingMounter, power: &CountingPower) -> System {
        let services = ServiceSupervisor::new(
            vec![crate::config::ServiceSpec::new("svc", "/bin/sleep 100")],
            SupervisorOptions {
                restart_delay: Duration::from_millis(50),
                stop_timeout: Duration::from_secs(2),
            },
            Arc::new(ChildRegistry::new()),
        );
        System::from_parts(
            FilesystemController::new(Box::new(mounter.clone())),
            services,
            Box::new(InstantSession),
            Box::new(power.clone()),
        )
    }

    #[tokio::test]
    async fn test_mount_failure_prevents_services() {
        let mounter = RecordingMounter {
            fail_mount: Some("/proc"),
            ..Default::default()
        };
        let power = CountingPower::default();
        let mut sys = system(&mounter, &power);

        assert_matches!(sys.start().await, Err(Error::Mount { .. }));
        assert!(sys.services().instances().is_empty());
        assert_eq!(power.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stop_reaches_power_off_despite_failures() {
        let mounter = RecordingMounter {
            fail_unmount: vec!["/run", "/proc"],
            ..Default::default()
        };
        let power = CountingPower::default();
        let mut sys = system(&mounter, &power);

        sys.run().await.unwrap();

        assert_eq!(power.calls.load(Ordering::SeqCst), 1);
        assert!(mounter.ops().contains(&Op::Unmount("/proc".to_string())));
    }

    #[tokio::test]
    async fn test_power_off_failure_is_fatal() {
        let mounter = RecordingMounter::default();
        let power = CountingPower {
            fail: true,
            ..Default::default()
        };
        let mut sys = system(&mounter, &power);

        sys.start().await.unwrap();
        assert_matches!(sys.stop().await, Err(Error::PowerOff(Errno::EPERM)));
        assert_eq!(power.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_new_requires_pid1() {
        // The test harness is never PID 1.
        let err = System::new(Config::default(), InitConfig::default()).err();
        assert_matches!(err, Some(Error::NotPid1(_)));
    }

    #[tokio::test]
    async fn test_shell_session_runs_to_completion() {
        let registry = Arc::new(ChildRegistry::new());
        let session = ShellSession::new("/bin/true", Arc::clone(&registry));
        session.run().await.unwrap();

        let failing = ShellSession::new("/bin/false", registry);
        failing.run().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_shell_is_reported() {
        let session = ShellSession::new("/nonexistent/shell", Arc::new(ChildRegistry::new()));
        assert_matches!(session.run().await, Err(Error::Io(_)));
    }
}
