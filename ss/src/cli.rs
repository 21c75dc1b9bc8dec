//! CLI argument parsing for snapstore

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ss")]
#[command(author, version, about = "Content-addressed working-tree checkpoints", long_about = None)]
pub struct Cli {
    /// Working tree root (default: current directory)
    #[arg(short, long)]
    pub work_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a checkpoint
    Create {
        /// Checkpoint description
        #[arg(short, long, default_value = "manual checkpoint")]
        description: String,

        /// Glob patterns to include (default: everything)
        paths: Vec<String>,
    },

    /// List checkpoints, oldest first
    List,

    /// Show one checkpoint's manifest
    Show {
        /// Checkpoint ID
        #[arg(required = true)]
        id: String,
    },

    /// Restore the working tree to a checkpoint
    Rollback {
        /// Checkpoint ID
        #[arg(required = true)]
        id: String,

        /// Restore only these exact paths
        #[arg(short, long)]
        path: Vec<String>,
    },

    /// Delete a checkpoint
    Delete {
        /// Checkpoint ID
        #[arg(required = true)]
        id: String,
    },
}
