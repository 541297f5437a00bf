//! Pseudo-filesystem mounting.
//!
//! The mount table is fixed. Mounting fails fast because a half-mounted tree
//! is not usable; unmounting is best effort because partial teardown beats
//! none at all during shutdown.

use crate::error::{Error, Result};
use crate::util::{in_reverse, LastError};
use nix::mount::{mount, umount2, MntFlags, MsFlags};
use std::os::unix::fs::DirBuilderExt;
use std::path::Path;
use tracing::{error, info};

/// A single entry of the mount table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountSpec {
    /// Mount source
    pub source: &'static str,
    /// Mount point
    pub target: &'static str,
    /// Filesystem type
    pub fstype: &'static str,
}

impl MountSpec {
    const fn new(source: &'static str, target: &'static str, fstype: &'static str) -> Self {
        Self {
            source,
            target,
            fstype,
        }
    }
}

/// Filesystems mounted at boot, in mount order.
pub const FILESYSTEMS: [MountSpec; 5] = [
    MountSpec::new("proc", "/proc", "proc"),
    MountSpec::new("sys", "/sys", "sysfs"),
    MountSpec::new("tmpfs", "/run", "tmpfs"),
    MountSpec::new("udev", "/dev", "devtmpfs"),
    MountSpec::new("devpts", "/dev/pts", "devpts"),
];

/// Mount point left in place at shutdown; later teardown still needs device nodes.
pub const KEEP_MOUNTED: &str = "/dev";

/// Low-level mount operations.
pub trait Mounter: Send + Sync {
    /// Create the mount point (and parents) with mode 0755 if missing.
    fn create_dir(&self, target: &Path) -> std::io::Result<()>;

    /// Mount `source` on `target` with no flags and no data.
    fn mount(&self, spec: &MountSpec) -> nix::Result<()>;

    /// Unmount `target`.
    fn unmount(&self, target: &Path) -> nix::Result<()>;
}

/// Mounter backed by the real syscalls.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysMounter;

impl Mounter for SysMounter {
    fn create_dir(&self, target: &Path) -> std::io::Result<()> {
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o755)
            .create(target)
    }

    fn mount(&self, spec: &MountSpec) -> nix::Result<()> {
        mount(
            Some(spec.source),
            spec.target,
            Some(spec.fstype),
            MsFlags::empty(),
            None::<&str>,
        )
    }

    fn unmount(&self, target: &Path) -> nix::Result<()> {
        umount2(target, MntFlags::empty())
    }
}

/// Mounter that does nothing, for running outside a fresh root.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMounter;

impl Mounter for NoopMounter {
    fn create_dir(&self, _target: &Path) -> std::io::Result<()> {
        Ok(())
    }

    fn mount(&self, _spec: &MountSpec) -> nix::Result<()> {
        Ok(())
    }

    fn unmount(&self, _target: &Path) -> nix::Result<()> {
        Ok(())
    }
}

/// Mounts and unmounts the fixed pseudo-filesystem set.
pub struct FilesystemController {
    mounter: Box<dyn Mounter>,
    filesystems: &'static [MountSpec],
}

impl FilesystemController {
    /// Create a controller for [`FILESYSTEMS`].
    pub fn new(mounter: Box<dyn Mounter>) -> Self {
        Self {
            mounter,
            filesystems: &FILESYSTEMS,
        }
    }

    /// Mount every filesystem in order, stopping at the first failure.
    pub fn mount_all(&self) -> Result<()> {
        info!("Mounting virtual filesystems");

        for spec in self.filesystems {
            self.mount_one(spec)?;
        }

        Ok(())
    }

    fn mount_one(&self, spec: &MountSpec) -> Result<()> {
        info!(
            source = spec.source,
            target = spec.target,
            fstype = spec.fstype,
            "Mounting filesystem"
        );

        let target = Path::new(spec.target);
        self.mounter
            .create_dir(target)
            .map_err(|source| Error::CreateDir {
                target: target.to_path_buf(),
                source,
            })?;

        self.mounter.mount(spec).map_err(|e| Error::Mount {
            source_path: spec.source.to_string(),
            target: target.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Unmount every filesystem except [`KEEP_MOUNTED`] in reverse mount order.
    ///
    /// Every entry is attempted; the last failure is returned.
    pub fn unmount_all(&self) -> Result<()> {
        info!("Unmounting virtual filesystems");

        let mut last = LastError::new();
        for spec in in_reverse(self.filesystems) {
            if spec.target == KEEP_MOUNTED {
                continue;
            }

            let result = self.unmount_one(spec.target);
            if let Err(ref e) = result {
                error!(target = spec.target, error = %e, "Failed to unmount");
            }
            last.record(result);
        }

        last.into_result()
    }

    fn unmount_one(&self, target: &str) -> Result<()> {
        info!(target = target, "Unmounting filesystem");

        self.mounter
            .unmount(Path::new(target))
            .map_err(|e| Error::Unmount {
                target: target.into(),
                reason: e.to_string(),
            })
    }
}
