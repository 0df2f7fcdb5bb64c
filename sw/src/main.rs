//! Stepwise - resumable plan execution for coding workers
//!
//! CLI entry point for importing and inspecting plans.

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tracing::{debug, info};

use stepwise::cli::{Cli, Command, OutputFormat, PlanCommand, get_log_path};
use stepwise::config::Config;
use stepwise::domain::{PlanDefinition, PlanStatus, StepStatus};
use stepwise::failure::{ErrorClass, FailurePolicy};
use stepwise::r#loop::IterationBudget;
use stepwise::state::{CheckpointStore, StateManager};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_path = get_log_path();
    let log_dir = log_path.parent().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Priority: CLI --log-level > config file > INFO
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Plan { command } => cmd_plan(&config, command).await,
        Command::Reflections { project, task, format } => cmd_reflections(&config, &project, &task, format).await,
        Command::Intervention { project, task, ack } => cmd_intervention(&config, &project, &task, ack).await,
        Command::Budget { total, steps, cap } => cmd_budget(total, steps, cap),
        Command::Classify { message } => cmd_classify(&config, &message),
    }
}

fn open_store(config: &Config) -> Result<StateManager> {
    let dir = &config.storage.checkpoint_dir;
    debug!(dir = %dir.display(), "open_store: called");
    StateManager::spawn(dir).context(format!("Failed to open checkpoint store at {}", dir.display()))
}

async fn cmd_plan(config: &Config, command: PlanCommand) -> Result<()> {
    let state = open_store(config)?;
    match command {
        PlanCommand::Import { file, project } => {
            debug!(file = %file.display(), %project, "cmd_plan: import");
            let content =
                fs::read_to_string(&file).context(format!("Failed to read plan definition {}", file.display()))?;
            let plan = PlanDefinition::from_yaml(&content)?.into_plan(&project, config.engine.default_max_retries)?;
            state.save_plan(&plan).await?;
            info!(task_id = %plan.task_id, %project, steps = plan.steps.len(), "Imported plan");
            println!("Imported plan {} ({} steps)", plan.task_id.bold(), plan.steps.len());
        }
        PlanCommand::List { project, format } => {
            let plans = state.list_plans(project).await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&plans)?),
                OutputFormat::Text => {
                    if plans.is_empty() {
                        println!("No plans found");
                    }
                    for plan in &plans {
                        println!(
                            "{:<12} {:<32} {:<12} {}/{}  {}",
                            plan.project_id,
                            plan.task_id,
                            paint_plan_status(plan.status),
                            plan.completed_through(),
                            plan.steps.len(),
                            plan.description
                        );
                    }
                }
            }
        }
        PlanCommand::Show { project, task, format } => {
            let plan = state.get_plan(&project, &task).await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&plan)?),
                OutputFormat::Text => {
                    println!("{} {}", "Plan".bold(), plan.task_id);
                    println!("Project: {}", plan.project_id);
                    println!("Status:  {}", paint_plan_status(plan.status));
                    println!("Task:    {}", plan.description);
                    if let Some(error) = &plan.error_message {
                        println!("Error:   {}", error.red());
                    }
                    println!();
                    for step in &plan.steps {
                        let marker = if step.index == plan.current_step().map_or(0, |s| s.index) {
                            ">"
                        } else {
                            " "
                        };
                        let mut line = format!(
                            "{} {:>2}. [{}] {}",
                            marker,
                            step.index,
                            paint_step_status(step.status),
                            step.title
                        );
                        if step.metrics.auto_completed {
                            line.push_str(" (auto)");
                        }
                        if step.retry_count > 0 {
                            line.push_str(&format!(" (retries {}/{})", step.retry_count, step.max_retries));
                        }
                        println!("{}", line);
                        if let Some(reason) = step.skip_reason.as_ref().or(step.last_error.as_ref()) {
                            println!("       {}", reason.dimmed());
                        }
                    }
                    if !plan.log.is_empty() {
                        println!();
                        println!("{}", "Log".bold());
                        for entry in &plan.log {
                            println!("  {}  {}", format_timestamp(entry.timestamp), entry.message);
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

async fn cmd_reflections(config: &Config, project: &str, task: &str, format: OutputFormat) -> Result<()> {
    let state = open_store(config)?;
    let plan = state.get_plan(project, task).await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&plan.reflections)?),
        OutputFormat::Text => {
            if plan.reflections.is_empty() {
                println!("No reflections recorded");
            }
            for r in &plan.reflections {
                let trigger = match r.reason {
                    Some(reason) => format!("  -> {}", reason).red().to_string(),
                    None => String::new(),
                };
                println!(
                    "{}  step {:>2}  iter {:>3}  progress {:>3}%  confidence {:>3}%  blockers {}  {}{}",
                    format_timestamp(r.recorded_at),
                    r.step_index,
                    r.iteration,
                    r.progress,
                    r.confidence,
                    r.blockers.len(),
                    r.decision,
                    trigger
                );
            }
        }
    }
    Ok(())
}

async fn cmd_intervention(config: &Config, project: &str, task: &str, ack: bool) -> Result<()> {
    let state = open_store(config)?;
    let signal = if ack {
        state.acknowledge_intervention(project, task).await?
    } else {
        state.get_plan(project, task).await?.latest_intervention()
    };

    let Some(signal) = signal else {
        println!("No intervention raised");
        return Ok(());
    };

    println!("{} {}", "Intervention:".red().bold(), signal.reason);
    println!("Worker:     {}", signal.worker_id);
    println!("Step:       {}", signal.step_index);
    println!("Confidence: {}%", signal.confidence);
    if !signal.blockers.is_empty() {
        println!("Blockers:");
        for blocker in &signal.blockers {
            println!("  - {}", blocker);
        }
    }
    println!("Raised:     {}", format_timestamp(signal.raised_at));
    match signal.acknowledged_at {
        Some(at) if signal.acknowledged => println!("Acknowledged: {}", format_timestamp(at)),
        _ => println!("Acknowledged: no"),
    }
    Ok(())
}

fn cmd_budget(total: u32, steps: usize, cap: u32) -> Result<()> {
    let budget = IterationBudget::compute(total, steps, cap);
    println!("Per-step budget: {}", budget.per_step);
    println!("Effective budget: {}", budget.effective);
    Ok(())
}

fn cmd_classify(config: &Config, message: &str) -> Result<()> {
    let class = FailurePolicy::from_config(&config.failure).classify(message);
    let label = match class {
        ErrorClass::Transient => class.to_string().yellow(),
        ErrorClass::Permanent => class.to_string().red(),
    };
    println!("{}", label);
    Ok(())
}

fn paint_plan_status(status: PlanStatus) -> colored::ColoredString {
    let text = status.to_string();
    match status {
        PlanStatus::Completed => text.green(),
        PlanStatus::Failed => text.red(),
        PlanStatus::InProgress => text.yellow(),
        PlanStatus::Planning | PlanStatus::Ready => text.normal(),
    }
}

fn paint_step_status(status: StepStatus) -> colored::ColoredString {
    let text = status.to_string();
    match status {
        StepStatus::Completed => text.green(),
        StepStatus::Failed => text.red(),
        StepStatus::Skipped => text.dimmed(),
        StepStatus::InProgress => text.yellow(),
        StepStatus::Pending => text.normal(),
    }
}

fn format_timestamp(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}
