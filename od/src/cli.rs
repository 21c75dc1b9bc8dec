//! CLI command definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// orchd - task orchestrator for a fleet of LLM workers
#[derive(Parser)]
#[command(
    name = "od",
    about = "Task orchestrator for a fleet of LLM worker processes",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Working directory (default: current directory)
    #[arg(short, long, global = true)]
    pub work_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Parse a task document (YAML or JSON) and submit it
    Submit {
        /// Task document path
        file: PathBuf,
    },

    /// Validate a task document without persisting anything
    Validate {
        /// Task document path
        file: PathBuf,
    },

    /// Run the main loop until no runnable work remains
    Run {
        /// Number of simulated workers to start with
        #[arg(long, default_value = "2")]
        workers: usize,
    },

    /// Show task status and lifecycle
    Status {
        /// Task ID (all tasks when omitted)
        id: Option<String>,
    },

    /// Restore the working tree to a checkpoint
    Rollback {
        /// Checkpoint ID
        checkpoint: String,
    },
}
