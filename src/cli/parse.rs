//! CLI parse: clap types for Praxis. No behavior; definitions only.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Praxis CLI - asynchronous plan generation pipeline
#[derive(Parser)]
#[command(name = "praxis")]
#[command(about = "Turn goals into step-by-step plans with background generation workers")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory (for config/ lookup)
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging (default: off)
    #[arg(long, default_value = "false")]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output includes "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run all worker pools until Ctrl-C
    Run {
        /// Exit once every queue is drained instead of waiting for Ctrl-C
        #[arg(long)]
        until_idle: bool,
    },
    /// Submit a goal for plan generation
    Submit {
        /// Owning user id
        #[arg(long)]
        user: String,
        /// Free-text goal
        prompt: String,
        /// Process the job in this process and print the finished plan
        #[arg(long)]
        wait: bool,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Plan queries
    Plan {
        #[command(subcommand)]
        command: PlanCommands,
    },
    /// Task operations
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },
    /// Experience totals
    Xp {
        #[command(subcommand)]
        command: XpCommands,
    },
    /// Queue inspection
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Provider operations
    Provider {
        #[command(subcommand)]
        command: ProviderCommands,
    },
    /// Configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum PlanCommands {
    /// Show one plan with its tasks
    Show {
        plan_id: String,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// List a user's plans, newest first
    List {
        #[arg(long)]
        user: String,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
}

#[derive(Subcommand)]
pub enum TaskCommands {
    /// Show one task
    Show {
        task_id: String,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Mark a task completed
    Complete { task_id: String },
    /// Regenerate a task's details from extra context
    Regenerate {
        task_id: String,
        #[arg(long)]
        context: String,
        /// Process the job in this process and print the task
        #[arg(long)]
        wait: bool,
    },
}

#[derive(Subcommand)]
pub enum XpCommands {
    /// Enqueue an XP recalculation for a user
    Recalc {
        #[arg(long)]
        user: String,
        /// Process the job in this process and print the total
        #[arg(long)]
        wait: bool,
    },
    /// Show the last recalculated total
    Show {
        #[arg(long)]
        user: String,
    },
}

#[derive(Subcommand)]
pub enum QueueCommands {
    /// Job counts per queue
    Stats {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Jobs that exhausted their attempts
    DeadLetters {
        /// Queue name (plan-generation, xp-recalculation, task-regeneration)
        queue: String,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
}

#[derive(Subcommand)]
pub enum ProviderCommands {
    /// Check connectivity and model availability
    Check,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the resolved configuration as TOML
    Show,
}
