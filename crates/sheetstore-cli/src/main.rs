//! Sheetstore CLI - Administrative access to a sheetstore tree
//!
//! Usage:
//!   sheetstore --root /var/lib/sheetstore ls home/alice
//!   sheetstore --root /var/lib/sheetstore cat home/alice/budget
//!   sheetstore --root /var/lib/sheetstore put home/alice/notes 'hello'
//!   sheetstore --config sheetstore.toml reconcile

mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use sheetstore::{BackendKind, Config};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use commands::Command;

/// Sheetstore - path-addressed document storage
#[derive(Parser, Debug)]
#[command(name = "sheetstore")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Backend to open (overrides config and environment)
    #[arg(long, global = true)]
    backend: Option<BackendKind>,

    /// Store directory for the disk backend; implies --backend disk
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Args {
    /// File, then environment, then flags.
    fn resolve_config(&self) -> Result<Config> {
        let config = match &self.config {
            Some(path) => Config::load(path)
                .with_context(|| format!("Failed to load config: {}", path.display()))?,
            None => Config::default(),
        };
        let mut config = config
            .apply_env(|key| std::env::var(key).ok())
            .context("Invalid environment override")?;

        if let Some(root) = &self.root {
            config.storage.root = Some(root.clone());
            config.storage.backend = BackendKind::Disk;
        }
        if let Some(backend) = self.backend {
            config.storage.backend = backend;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = args.resolve_config()?;
    let storage = config.open_storage().context("Failed to open storage")?;

    let mut stdout = std::io::stdout().lock();
    commands::run(&storage, args.command, &mut stdout).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_global_flags_after_command() {
        let args = Args::try_parse_from(["sheetstore", "ls", "home", "--backend", "memory"]).unwrap();
        assert_eq!(args.backend, Some(BackendKind::Memory));
        assert!(matches!(args.command, Command::Ls { .. }));
    }

    #[test]
    fn test_root_implies_disk() {
        let args = Args::try_parse_from(["sheetstore", "--root", "/tmp/store", "usage"]).unwrap();
        let config = args.resolve_config().unwrap();
        assert_eq!(config.storage.backend, BackendKind::Disk);
        assert_eq!(config.storage.root, Some(PathBuf::from("/tmp/store")));
    }

    #[test]
    fn test_unknown_backend_rejected() {
        assert!(Args::try_parse_from(["sheetstore", "--backend", "s3", "usage"]).is_err());
    }
}
