//! CLI command-name contract for logging.

use crate::cli::parse::{
    Commands, ConfigCommands, PlanCommands, ProviderCommands, QueueCommands, TaskCommands,
    XpCommands,
};

/// Command name string for log fields (e.g. "plan.show", "queue.dead_letters").
pub fn command_name(command: &Commands) -> String {
    match command {
        Commands::Run { .. } => "run".to_string(),
        Commands::Submit { .. } => "submit".to_string(),
        Commands::Plan { command } => format!("plan.{}", plan_command_name(command)),
        Commands::Task { command } => format!("task.{}", task_command_name(command)),
        Commands::Xp { command } => format!("xp.{}", xp_command_name(command)),
        Commands::Queue { command } => format!("queue.{}", queue_command_name(command)),
        Commands::Provider { command } => match command {
            ProviderCommands::Check => "provider.check".to_string(),
        },
        Commands::Config { command } => match command {
            ConfigCommands::Show => "config.show".to_string(),
        },
    }
}

pub fn plan_command_name(command: &PlanCommands) -> &'static str {
    match command {
        PlanCommands::Show { .. } => "show",
        PlanCommands::List { .. } => "list",
    }
}

pub fn task_command_name(command: &TaskCommands) -> &'static str {
    match command {
        TaskCommands::Show { .. } => "show",
        TaskCommands::Complete { .. } => "complete",
        TaskCommands::Regenerate { .. } => "regenerate",
    }
}

pub fn xp_command_name(command: &XpCommands) -> &'static str {
    match command {
        XpCommands::Recalc { .. } => "recalc",
        XpCommands::Show { .. } => "show",
    }
}

pub fn queue_command_name(command: &QueueCommands) -> &'static str {
    match command {
        QueueCommands::Stats { .. } => "stats",
        QueueCommands::DeadLetters { .. } => "dead_letters",
    }
}
