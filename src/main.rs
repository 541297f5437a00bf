//! Orc init system binary.
//!
//! Runs as PID 1 by default; `--no-pid1` allows trying a configuration as an
//! ordinary process.

use anyhow::Context;
use clap::{Parser, Subcommand};
use orc::config::DEFAULT_CONFIG_PATH;
use orc::{InitConfig, ProviderRegistry, System};
use std::io::Write;
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "orc",
    about = "Orc - minimal PID 1 init for containers and VMs",
    version,
    author
)]
struct Cli {
    /// Configuration file (TOML or JSON)
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Shell to run once services are up (overrides the config file)
    #[arg(long)]
    shell: Option<PathBuf>,

    /// Don't require running as PID 1; skips orphan reaping and power-off
    #[arg(long)]
    no_pid1: bool,

    /// Don't mount virtual filesystems
    #[arg(long)]
    no_mount: bool,

    /// Don't clear the screen at startup
    #[arg(long)]
    no_clear: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run as init system (default)
    Init,

    /// Validate the configuration and print it resolved
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Check) => {
            init_logging();
            check(&cli)
        }
        Some(Commands::Init) | None => {
            if !cli.no_clear {
                clear_screen();
            }
            init_logging();
            run_init(cli).await
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn clear_screen() {
    let mut stdout = std::io::stdout();
    let _ = stdout.write_all(b"\x1bc");
    let _ = stdout.flush();
}

/// Load, resolve and print the configuration.
fn check(cli: &Cli) -> anyhow::Result<()> {
    let config = ProviderRegistry::new()
        .load(&cli.config)
        .with_context(|| format!("invalid configuration {}", cli.config.display()))?;

    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

/// Run as the init system.
async fn run_init(cli: Cli) -> anyhow::Result<()> {
    let mut config = match ProviderRegistry::new().load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!(path = %cli.config.display(), error = %e, "Failed to read config");
            std::process::exit(1);
        }
    };

    if let Some(shell) = cli.shell {
        config.system.shell = shell;
    }

    let init = InitConfig {
        mount_filesystems: !cli.no_mount,
        require_pid1: !cli.no_pid1,
    };

    let mut system = System::new(config, init)?;

    if let Err(e) = system.start().await {
        error!(error = %e, "Failed to start system");
        std::process::exit(1);
    }

    if system.stop().await.is_err() {
        std::process::exit(1);
    }

    Ok(())
}
