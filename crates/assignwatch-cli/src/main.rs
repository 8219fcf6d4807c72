use std::path::PathBuf;

use anyhow::{Context, Result};
use assignwatch_storage::{parse_legacy_report, render_legacy_report, write_atomically, SnapshotStore};
use assignwatch_sync::{prepare_records, workspace_path, WatchConfig, WatchPipeline};
use clap::{Parser, Subcommand};

mod logging;

#[derive(Debug, Parser)]
#[command(name = "assignwatch")]
#[command(about = "Watches the interpreter assignment listing and reports what changed")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch the listing once, diff against the snapshot, persist and notify.
    Check,
    /// Print what the snapshot currently holds.
    Show,
    /// Write the snapshot as a legacy flat-file report.
    ExportLegacy {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Diff a legacy flat-file report against the snapshot.
    ImportLegacy {
        path: PathBuf,
        /// Persist the imported records as the new snapshot.
        #[arg(long)]
        save: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = logging::init_logging();
    let cli = Cli::parse();
    let config = WatchConfig::from_env()?;
    tracing::debug!(workspace = %config.workspace_root.display(), "configuration loaded");

    match cli.command.unwrap_or(Commands::Check) {
        Commands::Check => {
            let summary = WatchPipeline::from_config(config)?.run_once().await?;
            println!("{}", summary.one_line());
        }
        Commands::Show => {
            let store = SnapshotStore::new(config.snapshot_path.clone());
            let snapshot = store.load().await;
            let last_updated = snapshot
                .last_updated
                .map(|ts| ts.to_rfc3339())
                .unwrap_or_else(|| "never".to_string());
            println!(
                "snapshot={} last_updated={} assignments={} history_entries={}",
                store.path().display(),
                last_updated,
                snapshot.assignments.len(),
                store.history().await.len()
            );
            for record in &snapshot.assignments {
                println!("- {}", assignwatch_core::describe_record(record));
            }
        }
        Commands::ExportLegacy { out } => {
            let store = SnapshotStore::new(config.snapshot_path.clone());
            let target = out
                .map(|p| workspace_path(&config, p))
                .unwrap_or_else(|| config.legacy_report_path.clone());
            let records = store.records().await;
            write_atomically(&target, render_legacy_report(&records).as_bytes())
                .await
                .with_context(|| format!("writing {}", target.display()))?;
            println!("exported {} assignments to {}", records.len(), target.display());
        }
        Commands::ImportLegacy { path, save } => {
            let store = SnapshotStore::new(config.snapshot_path.clone());
            let path = workspace_path(&config, path);
            let content = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let records = prepare_records(&parse_legacy_report(&content));
            let outcome = store.compare_and_swap(&records).await;
            for line in &outcome.change_log {
                println!("{line}");
            }
            println!(
                "imported={} added={} removed={} changed={}",
                records.len(),
                outcome.newly_added.len(),
                outcome.removed.len(),
                outcome.changed.len()
            );
            if save {
                if !store.save(&records).await {
                    anyhow::bail!("saving snapshot {} failed", store.path().display());
                }
                println!("snapshot saved to {}", store.path().display());
            }
        }
    }

    Ok(())
}
