use chrono::Local;
use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

mod cli;
mod config;

use cli::Cli;
use cli::commands::Commands;
use config::Config;

use tasky::domain::Task;
use tasky::notify::{NotificationManager, StepOutcome};
use tasky::scheduler::{PollLoop, Scheduler, StopOutcome};
use tasky::source::{SqliteTaskSource, TaskSource};

/// How long `status` lets the first poll run before sampling.
const STATUS_SAMPLE_DELAY: Duration = Duration::from_millis(250);

fn setup_logging(default_level: &str) -> Result<PathBuf> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tasky")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("tasky.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(log_file)
}

fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Watch { db } => handle_watch_command(&config.database(db.as_ref()), config),
        Commands::Check { db } => handle_check_command(&config.database(db.as_ref()), config),
        Commands::List { db, due } => handle_list_command(&config.database(db.as_ref()), *due),
        Commands::Alert { title, description } => handle_alert_command(title, description.as_deref(), config),
        Commands::Status { db } => handle_status_command(&config.database(db.as_ref()), config),
    }
}

fn open_source(path: &Path) -> Result<Arc<SqliteTaskSource>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).context(format!("Failed to create {}", parent.display()))?;
    }
    let source = SqliteTaskSource::open(path).context(format!("Failed to open task database {}", path.display()))?;
    Ok(Arc::new(source))
}

fn build_manager(config: &Config) -> Arc<NotificationManager> {
    Arc::new(NotificationManager::platform(config.delivery.clone(), config.ring.clone()))
}

fn build_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")
}

fn handle_watch_command(db: &Path, config: &Config) -> Result<()> {
    info!("Watching task database: {}", db.display());
    let source = open_source(db)?;
    let scheduler = Scheduler::new(build_manager(config), config.scheduler.to_scheduler_config());

    scheduler.start(source).context("Failed to start scheduler")?;
    println!(
        "{} {} (polling every {}s, Ctrl-C to stop)",
        "Watching".green().bold(),
        db.display(),
        config.scheduler.poll_interval_secs
    );

    let runtime = build_runtime()?;
    runtime
        .block_on(tokio::signal::ctrl_c())
        .context("Failed to wait for Ctrl-C")?;

    println!("{}", "Stopping scheduler...".cyan());
    match scheduler.stop() {
        StopOutcome::TimedOut => {
            warn!("Scheduler did not stop within its timeout");
            println!("{}", "Scheduler did not stop in time; exiting anyway".yellow());
        }
        outcome => info!("Scheduler stopped: {:?}", outcome),
    }
    Ok(())
}

fn handle_check_command(db: &Path, config: &Config) -> Result<()> {
    info!("Checking for due tasks in: {}", db.display());
    let source = open_source(db)?;
    let manager = build_manager(config);
    let poll = PollLoop::new(source, manager, config.scheduler.to_scheduler_config().poll);

    let runtime = build_runtime()?;
    let outcome = runtime.block_on(async {
        let outcome = poll.poll_once().await?;
        if outcome.delivered > 0 {
            tokio::time::sleep(config.delivery.ring_duration()).await;
        }
        Ok::<_, tasky::TaskyError>(outcome)
    });
    let outcome = outcome.context("Poll failed")?;

    println!(
        "{} {} due, {} delivered",
        "Checked:".green(),
        outcome.due,
        outcome.delivered
    );
    Ok(())
}

fn handle_list_command(db: &Path, due_only: bool) -> Result<()> {
    info!("Listing tasks from: {} (due only: {})", db.display(), due_only);
    let source = open_source(db)?;
    let tasks = if due_only {
        source.list_due_tasks()
    } else {
        source.list_all_tasks()
    }
    .context("Failed to list tasks")?;

    if tasks.is_empty() {
        println!("{}", "No tasks".dimmed());
        return Ok(());
    }

    let now = Local::now().naive_local();
    for task in &tasks {
        let label = task.time_until_due(now);
        let label = if task.completed {
            label.dimmed()
        } else if task.is_overdue(now) {
            label.red()
        } else {
            label.green()
        };
        println!(
            "{:>4}  {}  {}  {}",
            task.id.to_string().cyan(),
            task.formatted_due(),
            task.title.bold(),
            label
        );
        if let Some(desc) = task.description() {
            println!("      {}", desc.dimmed());
        }
    }
    Ok(())
}

fn handle_alert_command(title: &str, description: Option<&str>, config: &Config) -> Result<()> {
    info!("Sending test alert: {}", title);
    let mut task = Task::new(0, title, Local::now().naive_local());
    if let Some(desc) = description {
        task = task.with_description(desc);
    }
    let manager = build_manager(config);

    let runtime = build_runtime()?;
    let report = runtime.block_on(async {
        let report = manager.deliver_with_report(&task).await;
        tokio::time::sleep(config.delivery.ring_duration()).await;
        report
    });

    for (kind, outcome) in &report.steps {
        let line = format!("{:?}", outcome);
        let line = match outcome {
            StepOutcome::Delivered | StepOutcome::Fallback(_) => line.green(),
            StepOutcome::Skipped(_) | StepOutcome::Disabled => line.dimmed(),
            StepOutcome::Failed(_) => line.red(),
        };
        println!("{:>8}: {}", format!("{:?}", kind), line);
    }
    if !report.delivered() {
        eyre::bail!("No alert channel succeeded");
    }
    Ok(())
}

fn handle_status_command(db: &Path, config: &Config) -> Result<()> {
    info!("Sampling scheduler status for: {}", db.display());
    let source = open_source(db)?;
    let scheduler = Scheduler::new(build_manager(config), config.scheduler.to_scheduler_config());

    scheduler.start(source).context("Failed to start scheduler")?;
    std::thread::sleep(STATUS_SAMPLE_DELAY);
    let status = scheduler.status();
    scheduler.stop();

    let json = serde_json::to_string_pretty(&status).context("Failed to serialize status")?;
    println!("{}", json);
    Ok(())
}

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    // Setup logging
    let level = if cli.is_verbose() {
        "debug".to_string()
    } else {
        config.log_level.clone().unwrap_or_else(|| "info".to_string())
    };
    setup_logging(&level).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).context("Application failed")?;

    Ok(())
}
