//! graphstore inspection binary

use clap::Parser;
use eyre::{Context, Result, eyre};
use std::path::PathBuf;

use graphstore::cli::{Cli, Command};
use graphstore::{RESULTS_FILE, ResultStore, STORE_DIR, TASKS_FILE, TaskStatus, TaskStore};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let store_dir = cli.store.unwrap_or_else(|| PathBuf::from(STORE_DIR));

    match cli.command {
        Command::List { status } => {
            let store = open_tasks(&store_dir)?;
            let tasks = match status.as_deref() {
                Some(s) => {
                    let status = TaskStatus::parse(s).ok_or_else(|| eyre!("unknown status: {}", s))?;
                    store.by_status(status)
                }
                None => store.all(),
            };
            for task in tasks {
                println!("{:>4}  {:<12} {:<8} {}", task.id, task.status, task.priority, task.title);
            }
        }
        Command::Show { id } => {
            let store = open_tasks(&store_dir)?;
            match store.get(&id) {
                Some(task) => println!("{}", serde_json::to_string_pretty(&task)?),
                None => return Err(eyre!("task {} not found", id)),
            }
        }
        Command::Next => {
            let store = open_tasks(&store_dir)?;
            match store.next_runnable() {
                Some(task) => println!("{:>4}  {:<8} {}", task.id, task.priority, task.title),
                None => println!("no runnable task"),
            }
        }
        Command::Validate => {
            let store = open_tasks(&store_dir)?;
            let issues = store.validate_dependencies();
            if issues.is_empty() {
                println!("dependency graph ok");
            } else {
                for issue in &issues {
                    eprintln!("task {}: {}", issue.task_id, issue.detail);
                }
                std::process::exit(2);
            }
        }
        Command::Result { id, history } => {
            let results = ResultStore::open(store_dir.join(RESULTS_FILE))
                .context("Failed to open result store")?;
            if history {
                for result in results.history(&id)? {
                    println!("{}", serde_json::to_string(&result)?);
                }
            } else {
                match results.latest(&id)? {
                    Some(result) => println!("{}", serde_json::to_string_pretty(&result)?),
                    None => println!("no result for task {}", id),
                }
            }
        }
    }

    Ok(())
}

fn open_tasks(store_dir: &std::path::Path) -> Result<TaskStore> {
    TaskStore::open(store_dir.join(TASKS_FILE), "orchd").context("Failed to open task store")
}
