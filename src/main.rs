use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast::error::RecvError;

mod cli;

use cli::Cli;
use cli::commands::{Commands, project_for};
use speclooper::config::Config;
use speclooper::context::LoopContext;
use speclooper::domain::{LoopEvent, LoopOutcome, LoopState, LoopStatus};
use speclooper::limit::calculate_loop_limit;
use speclooper::liveness::is_process_alive;
use speclooper::manager::StartOptions;
use speclooper::storage::{JsonlStatusStore, StatusStore};

fn setup_logging(verbose: bool, level: Option<&str>) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("speclooper")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("speclooper.log");

    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    let mut builder = env_logger::Builder::from_default_env();
    if verbose {
        builder.filter_level(log::LevelFilter::Debug);
    } else if std::env::var_os("RUST_LOG").is_none()
        && let Some(level) = level
    {
        builder.parse_filters(level);
    }
    builder.target(env_logger::Target::Pipe(target)).init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

async fn run_application(cli: Cli, config: Config) -> Result<()> {
    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match cli.command {
        Commands::Run {
            project_dir,
            id,
            max_iterations,
        } => handle_run_command(&project_dir, id.as_deref(), max_iterations, config).await,
        Commands::Status { project_dir, id } => handle_status_command(&project_dir, id.as_deref(), &config),
        Commands::Limit { incomplete, added } => handle_limit_command(incomplete, added),
    }
}

async fn handle_run_command(
    project_dir: &Path,
    id: Option<&str>,
    max_iterations: Option<u32>,
    config: Config,
) -> Result<()> {
    let project = project_for(project_dir, id);
    info!("Running loop for {} at {}", project.id, project.root.display());

    let ctx = LoopContext::interactive(config).context("Failed to initialize loop context")?;
    let mut events = ctx.controller.subscribe();

    let (response, task) = ctx
        .controller
        .spawn(
            &project,
            StartOptions {
                max_iterations,
                newly_added: 0,
            },
        )
        .context(format!("Failed to start loop for {}", project.id))?;
    println!(
        "{} {} (budget: {} iterations)",
        "Started:".green(),
        project.id,
        response.status.max_iterations
    );

    let controller = ctx.controller.clone();
    let stop_id = project.id.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("{}", "Stopping after the current iteration...".yellow());
            controller.stop(&stop_id);
        }
    });

    loop {
        match events.recv().await {
            Ok(event) if event.project_id() == &project.id => {
                print_event(&event);
                if event.is_finished() {
                    break;
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => log::warn!("Event stream lagged, skipped {} events", skipped),
            Err(RecvError::Closed) => break,
        }
    }

    let outcome = task.await.context("Loop task failed")?;
    let view = ctx.controller.status(&project.id)?;
    print_status(&view.status);

    match outcome {
        LoopOutcome::Failed(reason) => eyre::bail!("Loop for {} failed: {}", project.id, reason),
        _ => Ok(()),
    }
}

fn print_event(event: &LoopEvent) {
    match event {
        LoopEvent::Started { .. } => {}
        LoopEvent::IterationStarted { iteration, .. } => {
            println!("{} {}", "Iteration".cyan(), iteration);
        }
        LoopEvent::IterationFinished { iteration, report, .. } => {
            let story = report.story_attempted.as_deref().unwrap_or("-");
            let result = if report.story_completed {
                "completed".green()
            } else {
                "not completed".yellow()
            };
            println!("{} {}: {} {}", "Finished iteration".cyan(), iteration, story, result);
        }
        LoopEvent::BudgetUpdated { max_iterations, .. } => {
            println!("{} {}", "Budget now".cyan(), max_iterations);
        }
        LoopEvent::StopRequested { .. } => println!("{}", "Stop requested".yellow()),
        LoopEvent::Finished { outcome, iterations, .. } => {
            let label = match outcome {
                LoopOutcome::Completed => "All work complete".green(),
                LoopOutcome::BudgetExhausted => "Iteration budget exhausted".yellow(),
                LoopOutcome::Aborted => "Stopped".yellow(),
                LoopOutcome::Failed(_) => "Failed".red(),
            };
            println!("{} after {} iteration(s)", label, iterations);
        }
    }
}

fn print_status(status: &LoopStatus) {
    let state = match status.state {
        LoopState::Idle => "idle".normal(),
        LoopState::Running => "running".green(),
        LoopState::Completed => "completed".green(),
        LoopState::Error => "error".red(),
    };
    println!("{} {}", "Project:".bold(), status.project_id);
    println!("  state:      {}", state);
    println!("  iterations: {}/{}", status.current_iteration, status.max_iterations);
    if let Some(started_at) = status.started_at {
        println!("  started:    {}", started_at.to_rfc3339());
    }
    if let Some(pid) = status.owner_process_id {
        println!("  owner pid:  {}", pid);
    }
    if let Some(error) = &status.last_error {
        println!("  error:      {}", error.red());
    }
}

// Read-only: this process does not own the registry, so it must not heal.
fn handle_status_command(project_dir: &Path, id: Option<&str>, config: &Config) -> Result<()> {
    let project = project_for(project_dir, id);
    let store = JsonlStatusStore::new(&config.storage.data_dir).context("Failed to open status store")?;
    let status = store.load(&project.id)?;

    print_status(&status);
    if status.is_running()
        && let Some(pid) = status.owner_process_id
        && !is_process_alive(pid)
    {
        println!(
            "  {}",
            format!("owner process {} is gone; status will reset on next start", pid).yellow()
        );
    }
    Ok(())
}

fn handle_limit_command(incomplete: u32, added: u32) -> Result<()> {
    println!("{}", calculate_loop_limit(incomplete, added));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    setup_logging(cli.is_verbose(), config.log_level.as_deref()).context("Failed to setup logging")?;

    config.validate().context("Invalid configuration")?;

    info!("Starting with config from: {:?}", cli.config);

    run_application(cli, config).await.context("Application failed")?;

    Ok(())
}
