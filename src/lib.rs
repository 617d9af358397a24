// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod lanes;
pub mod logging;
pub mod state;
pub mod types;
pub mod units;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::cli::{CliArgs, Command, RunArgs, StatusArgs};
use crate::config::OrchestratorConfig;
use crate::config::loader::load_and_validate;
use crate::dag::{AdmissionController, RunProgress};
use crate::engine::{RunEvent, RunPlan, RunReport, Runtime, RuntimeOptions, UnitProcessor};
use crate::errors::{Result, WpflowError};
use crate::exec::CommandAgentBackend;
use crate::fs::{FileSystem, RealFileSystem};
use crate::lanes::FileLaneStore;
use crate::state::{StateStore, UnitStatus};
use crate::units::{ManifestUnitSource, feature_slug_for};

/// Capacity of the channel carrying unit transitions to the runtime.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// High-level entry point used by `main.rs`.
///
/// A `run` that ends with any unit not COMPLETED is reported as
/// [`WpflowError::RunIncomplete`] after the report is printed.
pub async fn run(args: CliArgs) -> Result<()> {
    match &args.command {
        Command::Run(run_args) => {
            let Some(report) = run_feature(&args.config, run_args).await? else {
                return Ok(());
            };
            if report.all_completed() {
                Ok(())
            } else {
                let completed = report
                    .units
                    .iter()
                    .filter(|u| u.status == UnitStatus::Completed)
                    .count();
                Err(WpflowError::RunIncomplete(format!(
                    "{} with {} of {} units completed",
                    report.outcome,
                    completed,
                    report.units.len()
                )))
            }
        }
        Command::Status(status_args) => print_status(&args.config, status_args),
    }
}

/// Orchestrate one feature. Returns `None` for a dry run.
///
/// This wires together:
/// - config loading and start-up validation
/// - the persisted run (resumed unless `--fresh`)
/// - the process-backed agent backend and the lane files
/// - scheduler / admission / runtime
/// - Ctrl-C handling
pub async fn run_feature(config_path: &Path, args: &RunArgs) -> Result<Option<RunReport>> {
    let cfg = load_and_validate(config_path)?;
    if cfg.max_retries > 0 {
        warn!(
            max_retries = cfg.max_retries,
            "max_retries is not applied; a unit fails on its first error"
        );
    }

    let root = config_root_dir(config_path);
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);

    let source = ManifestUnitSource::new(fs.clone(), &args.feature_dir);
    let plan = RunPlan::build(&source, &cfg)?;

    if args.dry_run {
        print_dry_run(&plan, &cfg);
        return Ok(None);
    }

    let control_dir = root.join(&cfg.control_dir);
    let store = StateStore::new(fs.clone(), &control_dir);
    let run = plan.prepare_run(&store, args.fresh)?;

    let backend = CommandAgentBackend::new(&cfg, &root);
    backend.check_agents(plan.assignments.values().map(String::as_str))?;
    let lanes = FileLaneStore::new(fs.clone(), &control_dir);

    // Runtime event channel.
    let (event_tx, event_rx) = mpsc::channel::<RunEvent>(EVENT_CHANNEL_CAPACITY);

    let processor = UnitProcessor::new(
        Arc::new(backend),
        Arc::new(lanes),
        cfg.max_review_cycles,
        event_tx.clone(),
    );

    // Ctrl-C → graceful shutdown.
    {
        let tx = event_tx;
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            let _ = tx.send(RunEvent::ShutdownRequested).await;
        });
    }

    let admission = Arc::new(AdmissionController::new(&cfg.agents));
    let scheduler = plan.into_scheduler(run)?;
    info!(state_file = ?store.path(), "state file");

    let options = RuntimeOptions {
        global_timeout: cfg.global_timeout,
    };
    let runtime = Runtime::new(scheduler, admission, processor, store, event_rx, options)
        .with_progress(Box::new(|p: &RunProgress| {
            debug!(
                completed = p.completed,
                failed = p.failed,
                running = p.running,
                waiting = p.waiting,
                total = p.total,
                "progress"
            );
        }));

    let report = runtime.run().await?;
    print!("{report}");
    Ok(Some(report))
}

/// Print the persisted run, if any.
fn print_status(config_path: &Path, args: &StatusArgs) -> Result<()> {
    let cfg = load_and_validate(config_path)?;
    let control_dir = config_root_dir(config_path).join(&cfg.control_dir);
    let store = StateStore::new(Arc::new(RealFileSystem), &control_dir);

    match store.load()? {
        None => println!("no persisted run in {}", control_dir.display()),
        Some(run) => {
            let wanted = args.feature_dir.as_deref().map(feature_slug_for);
            match wanted {
                Some(slug) if slug != run.feature_slug => {
                    println!(
                        "no persisted run for {slug} (state belongs to {})",
                        run.feature_slug
                    );
                }
                _ => print!("{run}"),
            }
        }
    }
    Ok(())
}

/// Figure out the project root.
///
/// - If the config path has a non-empty parent (e.g. "configs/Wpflow.toml"),
///   we use that directory.
/// - If it's just a bare filename like "Wpflow.toml" (parent = ""),
///   we fall back to the current working directory "."
fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

/// Simple dry-run output: units in execution order with agents and deps.
fn print_dry_run(plan: &RunPlan, cfg: &OrchestratorConfig) {
    println!("wpflow dry-run");
    println!("  feature = {}", plan.feature_slug);
    println!("  global_timeout = {:?}", cfg.global_timeout);
    println!("  max_review_cycles = {}", cfg.max_review_cycles);
    println!();

    println!("agents ({}):", cfg.agents.len());
    for (name, agent) in cfg.agents.iter() {
        let state = if agent.enabled { "enabled" } else { "disabled" };
        println!("  - {name} ({state}, max_concurrent = {})", agent.max_concurrent);
    }
    println!();

    println!("units ({}) in execution order:", plan.order.len());
    for (idx, id) in plan.order.iter().enumerate() {
        let agent = plan.assignments.get(id).map(String::as_str).unwrap_or("?");
        println!("  {}. {id} [{agent}]", idx + 1);
        if let Some(title) = plan.unit(id).and_then(|u| u.title.as_deref()) {
            println!("      title: {title}");
        }
        let deps = plan.graph.dependencies_of(id);
        if !deps.is_empty() {
            println!("      after: {:?}", deps);
        }
    }

    debug!("dry-run complete (no execution)");
}
