//! Orc - a minimal init system for containers and VMs.
//!
//! Orc runs as PID 1. It mounts the kernel pseudo-filesystems, starts a fixed
//! list of services, hands the terminal to an interactive shell and, once the
//! shell exits, tears everything down and powers the machine off.
//!
//! # Architecture
//!
//! - **FilesystemController**: mounts and unmounts `/proc`, `/sys`, `/run`,
//!   `/dev` and `/dev/pts`
//! - **ServiceSupervisor**: starts services in order, supervises continuous
//!   ones with restart-on-failure, stops them in reverse order
//! - **System**: sequences the two around the shell and the power-off
//!
//! # Example
//!
//! ```no_run
//! use orc::{InitConfig, ProviderRegistry, System};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ProviderRegistry::new().load(Path::new("/etc/orc.toml"))?;
//!     let mut system = System::new(config, InitConfig::default())?;
//!     system.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod loaders;
pub mod mount;
pub mod process;
pub mod reaper;
pub mod service;
pub mod supervisor;
pub mod system;
pub mod util;

// Re-export main types
pub use config::{Config, ServiceMode, ServiceSpec, SystemSettings};
pub use error::{Error, Result};
pub use loaders::{ConfigProvider, ProviderRegistry};
pub use mount::{FilesystemController, MountSpec, Mounter, FILESYSTEMS};
pub use reaper::ChildRegistry;
pub use service::{ServiceInstance, ServiceState, ServiceStatus, SupervisorOptions};
pub use supervisor::ServiceSupervisor;
pub use system::{InitConfig, PowerControl, Session, ShellSession, System};
