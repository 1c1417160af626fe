//! Subcommands executed against an opened storage service.

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use sheetstore::{PathKey, Storage, StorageItem};
use std::io::Write;
use std::path::PathBuf;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List a directory's children in insertion order
    Ls {
        #[arg(default_value = "/")]
        path: PathKey,
    },
    /// Print a file's payload
    Cat { path: PathKey },
    /// Create or replace a file
    Put {
        path: PathKey,
        /// Payload given inline
        #[arg(required_unless_present = "file", conflicts_with = "file")]
        value: Option<String>,
        /// Read the payload from a local file
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Create a directory
    Mkdir {
        /// Create missing parents; an existing directory is not an error
        #[arg(short = 'p', long)]
        parents: bool,
        path: PathKey,
    },
    /// Delete a file or an empty directory
    Rm { path: PathKey },
    /// Rebuild directory listings from a full scan
    Reconcile,
    /// Show backend usage counters
    Usage,
}

pub async fn run(storage: &Storage, command: Command, out: &mut impl Write) -> Result<()> {
    match command {
        Command::Ls { path } => match storage.get_file(&path).await? {
            StorageItem::Directory(names) => {
                for name in names {
                    writeln!(out, "{name}")?;
                }
            }
            StorageItem::File(_) => bail!("{path} is a file"),
        },
        Command::Cat { path } => {
            let payload = storage.read_file(&path).await?;
            out.write_all(&payload)?;
        }
        Command::Put { path, value, file } => {
            let payload = match (value, file) {
                (Some(value), _) => value.into_bytes(),
                (None, Some(file)) => std::fs::read(&file)
                    .with_context(|| format!("Failed to read {}", file.display()))?,
                (None, None) => bail!("put needs a VALUE or --file"),
            };
            let outcome = storage.put(&path, &payload).await?;
            tracing::info!(path = %path, ?outcome, "put");
        }
        Command::Mkdir { parents, path } => {
            if parents {
                storage.ensure_dir_all(&path).await?;
            } else {
                storage.create_dir(&path).await?;
            }
        }
        Command::Rm { path } => storage.delete_file(&path).await?,
        Command::Reconcile => {
            let report = storage.reconcile().await?;
            writeln!(out, "{}", serde_json::to_string_pretty(&report_json(&report))?)?;
        }
        Command::Usage => {
            let limits = storage.limits();
            let mut json = serde_json::json!({
                "backend": storage.backend_name(),
                "tracked": false,
                "max_entry_count": limits.max_entry_count,
                "max_payload_size": limits.max_payload_size,
            });
            // Counters are only printed when the backend keeps them.
            if let Some(usage) = storage.usage() {
                json["tracked"] = true.into();
                json["files"] = usage.file_count.into();
                json["directories"] = usage.dir_count.into();
                json["payload_bytes"] = usage.payload_bytes.into();
            }
            writeln!(out, "{}", serde_json::to_string_pretty(&json)?)?;
        }
    }
    Ok(())
}

fn report_json(report: &sheetstore::ReconcileReport) -> serde_json::Value {
    serde_json::json!({
        "clean": report.is_clean(),
        "directories_scanned": report.directories_scanned,
        "entries_adopted": report.entries_adopted,
        "entries_dropped": report.entries_dropped,
        "indexes_rebuilt": report.indexes_rebuilt,
        "temp_files_removed": report.temp_files_removed,
    })
}
