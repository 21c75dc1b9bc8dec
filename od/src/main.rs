//! orchd CLI entry point

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use eyre::{Context, Result};
use tracing::info;

use orchd::cli::{Cli, Command};
use orchd::config::Config;
use orchd::orchestrator::{Orchestrator, TaskSpec};
use orchd::worker::{Capability, Complexity, ScriptedWorker, WorkerProfile, capabilities};

/// Exit code for a rejected plan
const EXIT_REJECTED: i32 = 2;
/// Exit code for an unparseable task document
const EXIT_PARSE_ERROR: i32 = 3;
/// Exit code for user interruption
const EXIT_INTERRUPTED: i32 = 130;

fn setup_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    // RUST_LOG wins; LOG_LEVEL is the plainer knob for operators
    let filter = std::env::var("RUST_LOG")
        .or_else(|_| std::env::var("LOG_LEVEL"))
        .unwrap_or_else(|_| default_level.to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();
}

fn load_specs(path: &PathBuf) -> Result<Vec<TaskSpec>> {
    let content = std::fs::read_to_string(path).context("Failed to read task document")?;
    if path.extension().map(|e| e == "json").unwrap_or(false) {
        serde_json::from_str(&content).context("Failed to parse task document")
    } else {
        serde_yaml::from_str(&content).context("Failed to parse task document")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    let work_dir = cli.work_dir.clone().unwrap_or_else(|| PathBuf::from("."));

    match cli.command {
        Command::Submit { file } => {
            let specs = match load_specs(&file) {
                Ok(specs) => specs,
                Err(e) => {
                    eprintln!("parse error: {:#}", e);
                    std::process::exit(EXIT_PARSE_ERROR);
                }
            };

            let orchestrator = Orchestrator::new(&work_dir, config)?;
            let outcome = orchestrator.submit(specs).await?;
            if outcome.report.can_execute() {
                println!(
                    "plan {}: {} task(s) submitted",
                    outcome.report.outcome,
                    outcome.task_ids.len()
                );
            } else {
                eprintln!("{}", serde_json::to_string_pretty(&outcome.report)?);
                std::process::exit(EXIT_REJECTED);
            }
        }

        Command::Validate { file } => {
            let specs = match load_specs(&file) {
                Ok(specs) => specs,
                Err(e) => {
                    eprintln!("parse error: {:#}", e);
                    std::process::exit(EXIT_PARSE_ERROR);
                }
            };

            let validator = orchd::validate::PlanValidator::new(config.pool.max_workers, config.validation.max_memory_gb);
            let tasks: Vec<graphstore::Task> = specs
                .iter()
                .enumerate()
                .map(|(i, spec)| {
                    let mut task = graphstore::Task::new(i as u64 + 1, spec.title.clone(), spec.description.clone());
                    task.dependencies = spec.dependencies.clone();
                    task
                })
                .collect();
            let report = validator.validate("dry-run", &tasks);
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.can_execute() {
                std::process::exit(EXIT_REJECTED);
            }
        }

        Command::Run { workers } => {
            let orchestrator = Orchestrator::new(&work_dir, config)?;

            for i in 1..=workers {
                let profile = WorkerProfile::new(
                    format!("local-worker-{}", i),
                    "scripted-model",
                    capabilities(&[
                        Capability::Code,
                        Capability::Documentation,
                        Capability::Testing,
                        Capability::Debugging,
                        Capability::Research,
                    ]),
                    Complexity::Critical,
                    1,
                );
                orchestrator
                    .add_worker(profile, Some(Arc::new(ScriptedWorker::echo())))
                    .await;
            }

            let runner = orchestrator.clone();
            let run = tokio::spawn(async move { runner.run().await });

            tokio::select! {
                result = run => {
                    result??;
                    info!("Run loop quiescent");
                }
                _ = tokio::signal::ctrl_c() => {
                    orchestrator.shutdown().await;
                    std::process::exit(EXIT_INTERRUPTED);
                }
            }
        }

        Command::Status { id } => {
            let orchestrator = Orchestrator::new(&work_dir, config)?;
            match id {
                Some(id) => {
                    let view = orchestrator.status(&id).await;
                    println!("{}", serde_json::to_string_pretty(&view)?);
                }
                None => {
                    let stats = orchestrator.pool().stats().await;
                    println!("{:#?}", stats);
                }
            }
        }

        Command::Rollback { checkpoint } => {
            let orchestrator = Orchestrator::new(&work_dir, config)?;
            orchestrator.rollback(&checkpoint).await?;
            println!("restored {}", checkpoint);
        }
    }

    Ok(())
}
