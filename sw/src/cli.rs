//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

/// Stepwise - resumable plan execution for coding workers
#[derive(Parser)]
#[command(
    name = "sw",
    about = "Inspect and manage resumable plan executions",
    version = env!("CARGO_PKG_VERSION"),
    after_help = after_help()
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage stored plans
    Plan {
        #[command(subcommand)]
        command: PlanCommand,
    },

    /// List the reflection signals recorded on a plan
    Reflections {
        /// Project ID
        project: String,

        /// Task ID
        task: String,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show the latest intervention on a plan
    Intervention {
        /// Project ID
        project: String,

        /// Task ID
        task: String,

        /// Acknowledge it
        #[arg(long)]
        ack: bool,
    },

    /// Compute iteration budgets
    Budget {
        /// Total iteration budget
        #[arg(long, default_value = "100")]
        total: u32,

        /// Number of steps in the plan
        #[arg(long)]
        steps: usize,

        /// Per-step cap
        #[arg(long, default_value = "25")]
        cap: u32,
    },

    /// Classify an error message as transient or permanent
    Classify {
        /// Error message
        message: String,
    },
}

/// Plan subcommands
#[derive(Debug, Subcommand)]
pub enum PlanCommand {
    /// Import a plan definition (YAML) as a Ready plan
    Import {
        /// Definition file
        file: PathBuf,

        /// Project the plan belongs to
        #[arg(short, long)]
        project: String,
    },

    /// List plans, newest first
    List {
        /// Only this project
        #[arg(short, long)]
        project: Option<String>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show a plan with its steps and log
    Show {
        /// Project ID
        project: String,

        /// Task ID
        task: String,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

/// Output format for listing commands
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use text or json", s)),
        }
    }
}

/// Location of the log file
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stepwise")
        .join("logs")
        .join("stepwise.log")
}

fn after_help() -> String {
    format!("Logs are written to: {}", get_log_path().display())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_budget() {
        let cli = Cli::try_parse_from(["sw", "budget", "--total", "30", "--steps", "5", "--cap", "10"]).unwrap();
        match cli.command {
            Command::Budget { total, steps, cap } => {
                assert_eq!((total, steps, cap), (30, 5, 10));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_plan_show_json() {
        let cli = Cli::try_parse_from(["sw", "plan", "show", "proj", "task-1", "--format", "json"]).unwrap();
        match cli.command {
            Command::Plan {
                command: PlanCommand::Show { project, task, format },
            } => {
                assert_eq!(project, "proj");
                assert_eq!(task, "task-1");
                assert_eq!(format, OutputFormat::Json);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_output_format_rejects_unknown() {
        assert!("yaml".parse::<OutputFormat>().is_err());
        assert_eq!("TEXT".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from(["sw", "classify", "timeout", "-l", "debug", "-c", "/tmp/x.yml"]).unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/x.yml")));
    }
}
