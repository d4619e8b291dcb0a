//! CLI domain: parse, route, help, output, and presentation only.
//! No domain orchestration; single route table dispatches to the pipeline runtime.

mod help;
mod output;
mod parse;
mod presentation;
mod route;

pub use help::command_name;
pub use output::map_error;
pub use parse::{
    Cli, Commands, ConfigCommands, PlanCommands, ProviderCommands, QueueCommands, TaskCommands,
    XpCommands,
};
pub use route::RunContext;
