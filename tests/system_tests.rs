//! End-to-end tests for the boot and shutdown sequence.
//!
//! Mounts and power-off are faked; services are real processes.

use async_trait::async_trait;
use orc::mount::MountSpec;
use orc::{
    ChildRegistry, FilesystemController, Mounter, PowerControl, ServiceSpec, ServiceState,
    ServiceSupervisor, Session, SupervisorOptions, System,
};
use pretty_assertions::assert_eq;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

#[derive(Clone, Default)]
struct FakeMounter {
    ops: Arc<Mutex<Vec<String>>>,
}

impl FakeMounter {
    fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }
}

impl Mounter for FakeMounter {
    fn create_dir(&self, target: &Path) -> std::io::Result<()> {
        self.ops
            .lock()
            .unwrap()
            .push(format!("mkdir {}", target.display()));
        Ok(())
    }

    fn mount(&self, spec: &MountSpec) -> nix::Result<()> {
        self.ops
            .lock()
            .unwrap()
            .push(format!("mount {} {} {}", spec.source, spec.target, spec.fstype));
        Ok(())
    }

    fn unmount(&self, target: &Path) -> nix::Result<()> {
        self.ops
            .lock()
            .unwrap()
            .push(format!("umount {}", target.display()));
        Ok(())
    }
}

#[derive(Clone, Default)]
struct FakePower {
    calls: Arc<AtomicUsize>,
}

impl PowerControl for FakePower {
    fn power_off(&self) -> nix::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Session that just waits, like a user sitting at the prompt.
struct IdleSession(Duration);

#[async_trait]
impl Session for IdleSession {
    async fn run(&self) -> orc::Result<()> {
        tokio::time::sleep(self.0).await;
        Ok(())
    }
}

fn build(
    specs: Vec<ServiceSpec>,
    options: SupervisorOptions,
    session: Duration,
) -> (System, FakeMounter, FakePower) {
    let mounter = FakeMounter::default();
    let power = FakePower::default();
    let services = ServiceSupervisor::new(specs, options, Arc::new(ChildRegistry::new()));
    let system = System::from_parts(
        FilesystemController::new(Box::new(mounter.clone())),
        services,
        Box::new(IdleSession(session)),
        Box::new(power.clone()),
    );
    (system, mounter, power)
}

#[tokio::test]
async fn boot_and_shutdown_sequence() {
    let specs = vec![
        ServiceSpec::new("a", "/bin/true").oneshot(),
        ServiceSpec::new("b", "/bin/sleep 100").with_restart(false),
    ];
    let options = SupervisorOptions {
        restart_delay: Duration::from_secs(1),
        stop_timeout: Duration::from_secs(5),
    };
    let (mut system, mounter, power) = build(specs, options, Duration::from_millis(100));

    system.start().await.unwrap();

    assert_eq!(
        mounter.ops(),
        vec![
            "mkdir /proc",
            "mount proc /proc proc",
            "mkdir /sys",
            "mount sys /sys sysfs",
            "mkdir /run",
            "mount tmpfs /run tmpfs",
            "mkdir /dev",
            "mount udev /dev devtmpfs",
            "mkdir /dev/pts",
            "mount devpts /dev/pts devpts",
        ]
    );

    let statuses = system.services().statuses();
    assert_eq!(statuses[0].name, "a");
    assert_eq!(statuses[0].state, ServiceState::Stopped);
    assert_eq!(statuses[0].last_exit.map(|e| e.code), Some(0));
    assert_eq!(statuses[1].name, "b");
    assert_eq!(statuses[1].state, ServiceState::Running);
    assert!(statuses[1].pid.is_some());
    assert_eq!(power.calls.load(Ordering::SeqCst), 0);

    system.stop().await.unwrap();

    let statuses = system.services().statuses();
    assert_eq!(statuses[1].state, ServiceState::Stopped);
    assert_eq!(statuses[1].pid, None);
    assert_eq!(statuses[1].restart_count, 0);
    assert_eq!(
        statuses[1].last_exit.and_then(|e| e.signal),
        Some(libc::SIGTERM)
    );

    let unmounts: Vec<String> = mounter
        .ops()
        .into_iter()
        .filter(|op| op.starts_with("umount"))
        .collect();
    assert_eq!(
        unmounts,
        vec![
            "umount /dev/pts",
            "umount /run",
            "umount /sys",
            "umount /proc",
        ]
    );
    assert_eq!(power.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failing_service_restarts_at_backoff_pace() {
    let dir = TempDir::new().unwrap();
    let script = dir.path().join("fail.sh");
    std::fs::write(&script, "exit 2\n").unwrap();

    let specs = vec![ServiceSpec::new("fail", format!("/bin/sh {}", script.display()))];
    let (mut system, _mounter, power) = build(
        specs,
        SupervisorOptions::default(),
        Duration::from_millis(2600),
    );

    system.start().await.unwrap();

    let statuses = system.services().statuses();
    let status = &statuses[0];
    assert!(status.restart_count >= 2, "restarts: {}", status.restart_count);
    assert!(status.restart_count <= 3, "restarts: {}", status.restart_count);
    assert_eq!(status.last_exit.map(|e| e.code), Some(2));

    system.stop().await.unwrap();
    assert_eq!(power.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn service_failures_do_not_block_session_or_shutdown() {
    let specs = vec![
        ServiceSpec::new("broken", "/nonexistent/daemon"),
        ServiceSpec::new("setup", "/bin/false").oneshot(),
        ServiceSpec::new("daemon", "/bin/sleep 100"),
    ];
    let (mut system, mounter, power) = build(
        specs,
        SupervisorOptions::default(),
        Duration::from_millis(50),
    );

    system.run().await.unwrap();

    let statuses = system.services().statuses();
    assert_eq!(statuses.len(), 3);
    assert!(statuses.iter().all(|s| s.state == ServiceState::Stopped));
    assert_eq!(
        mounter
            .ops()
            .iter()
            .filter(|op| op.starts_with("umount"))
            .count(),
        4
    );
    assert_eq!(power.calls.load(Ordering::SeqCst), 1);
}
