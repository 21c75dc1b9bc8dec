//! CLI argument parsing for graphstore

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "gs")]
#[command(author, version, about = "Task graph and worker-result store", long_about = None)]
pub struct Cli {
    /// Store directory (default: .orchd)
    #[arg(short, long)]
    pub store: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List all tasks
    List {
        /// Filter by status (pending, in-progress, review, done, failed, deferred, cancelled)
        #[arg(short = 's', long)]
        status: Option<String>,
    },

    /// Show one task (supports subtask refs like 3.1)
    Show {
        /// Task ID
        #[arg(required = true)]
        id: String,
    },

    /// Print the next runnable task
    Next,

    /// Check the dependency graph for missing or self-referential deps
    Validate,

    /// Show the latest worker result for a task
    Result {
        /// Task ID
        #[arg(required = true)]
        id: String,

        /// Show the full result history
        #[arg(long)]
        history: bool,
    },
}
