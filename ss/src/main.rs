//! snapstore binary

use std::collections::HashMap;
use std::path::PathBuf;

use clap::Parser;
use eyre::{Context, Result};

use snapstore::cli::{Cli, Command};
use snapstore::{CHECKPOINT_DIR, CheckpointKind, RollbackStrategy, SnapStore};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let work_dir = cli.work_dir.unwrap_or_else(|| PathBuf::from("."));
    let mut store =
        SnapStore::open(&work_dir, work_dir.join(CHECKPOINT_DIR)).context("Failed to open snapshot store")?;

    match cli.command {
        Command::Create { description, paths } => {
            let id = store.create(CheckpointKind::Manual, description, &paths, HashMap::new())?;
            println!("{}", id);
        }
        Command::List => {
            for manifest in store.list()? {
                println!(
                    "{}  {:<9} {:>4} files  {}",
                    manifest.checkpoint_id,
                    manifest.kind,
                    manifest.entries.len(),
                    manifest.description
                );
            }
        }
        Command::Show { id } => {
            let manifest = store.get(&id)?;
            println!("{}", serde_json::to_string_pretty(&manifest)?);
        }
        Command::Rollback { id, path } => {
            let strategy = if path.is_empty() {
                RollbackStrategy::Full
            } else {
                RollbackStrategy::Selective(path)
            };
            let report = store.rollback(&id, strategy)?;
            println!(
                "restored: {} deleted, {} overwritten, {} created",
                report.deleted, report.overwritten, report.created
            );
        }
        Command::Delete { id } => {
            store.delete(&id)?;
            println!("deleted {}", id);
        }
    }

    Ok(())
}
