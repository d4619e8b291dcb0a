//! CLI route: single route table and run context. Dispatches to the pipeline
//! runtime and presentation.

use crate::cli::help::command_name;
use crate::cli::output::to_json;
use crate::cli::parse::{
    Commands, ConfigCommands, PlanCommands, ProviderCommands, QueueCommands, TaskCommands,
    XpCommands,
};
use crate::cli::presentation::{
    format_dead_letters_text, format_plan_json, format_plan_list_json, format_plan_list_text,
    format_plan_text, format_provider_check_result, format_queue_stats_json,
    format_queue_stats_text, format_resolved_config, format_task_text, format_xp_text,
};
use crate::config::ConfigLoader;
use crate::error::ApiError;
use crate::queue::QueueName;
use crate::runtime::PipelineRuntime;
use crate::types::{PlanId, TaskId, UserId};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Upper bound for `--wait` and `run --until-idle`
const WAIT_TIMEOUT: Duration = Duration::from_secs(600);

/// Runtime context for CLI execution: resolved config and the pipeline built from it.
pub struct RunContext {
    runtime: PipelineRuntime,
}

impl RunContext {
    /// Load and validate config (explicit file or layered sources), then open the pipeline.
    pub fn new(workspace_root: PathBuf, config_path: Option<PathBuf>) -> Result<Self, ApiError> {
        let config = ConfigLoader::load_validated(&workspace_root, config_path.as_deref())?;
        Ok(Self::from_runtime(PipelineRuntime::from_config(config)?))
    }

    pub fn from_runtime(runtime: PipelineRuntime) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &PipelineRuntime {
        &self.runtime
    }

    /// Execute a CLI command via the single route table.
    pub async fn execute(&self, command: &Commands) -> Result<String, ApiError> {
        let started = Instant::now();
        let name = command_name(command);
        let result = self.execute_inner(command).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => info!(command = %name, duration_ms, "Command completed"),
            Err(e) => warn!(command = %name, duration_ms, error = %e, code = e.code(), "Command failed"),
        }
        result
    }

    async fn execute_inner(&self, command: &Commands) -> Result<String, ApiError> {
        match command {
            Commands::Run { until_idle } => self.handle_run(*until_idle).await,
            Commands::Submit {
                user,
                prompt,
                wait,
                format,
            } => {
                let plan_id = self
                    .runtime
                    .submission()
                    .submit_plan(&UserId::from(user.as_str()), prompt)?;
                if !*wait {
                    return Ok(match format.as_str() {
                        "json" => to_json(&serde_json::json!({ "planId": plan_id }))?,
                        _ => format!(
                            "Submitted plan {}\n\nRun 'praxis run' to process it, then 'praxis plan show {}'.",
                            plan_id, plan_id
                        ),
                    });
                }
                self.drain().await?;
                self.show_plan(&plan_id, format)
            }
            Commands::Plan { command } => self.handle_plan_command(command),
            Commands::Task { command } => self.handle_task_command(command).await,
            Commands::Xp { command } => self.handle_xp_command(command).await,
            Commands::Queue { command } => self.handle_queue_command(command),
            Commands::Provider { command } => match command {
                ProviderCommands::Check => {
                    let result = self.runtime.generation().check().await;
                    if result.connectivity_ok && result.model_available {
                        Ok(format_provider_check_result(&result))
                    } else {
                        Err(ApiError::ProviderError(
                            format_provider_check_result(&result).trim_end().to_string(),
                        ))
                    }
                }
            },
            Commands::Config { command } => match command {
                ConfigCommands::Show => format_resolved_config(self.runtime.config()),
            },
        }
    }

    async fn handle_run(&self, until_idle: bool) -> Result<String, ApiError> {
        self.runtime.start()?;
        let outcome = if until_idle {
            tokio::select! {
                result = self.runtime.wait_for_idle(WAIT_TIMEOUT) => result,
                _ = tokio::signal::ctrl_c() => Ok(()),
            }
        } else {
            info!("Workers running; press Ctrl-C to stop");
            tokio::signal::ctrl_c()
                .await
                .map_err(|e| ApiError::QueueError(format!("Failed to listen for Ctrl-C: {}", e)))
        };
        self.runtime.shutdown().await?;
        outcome?;

        let mut lines = Vec::new();
        for queue in QueueName::ALL {
            if let Some(stats) = self.runtime.pool_stats(queue) {
                lines.push(format!(
                    "{}: {} completed, {} retried, {} deferred, {} dead-lettered, {} returned to queue",
                    queue,
                    stats.completed,
                    stats.retried,
                    stats.deferred,
                    stats.dead_lettered,
                    stats.released
                ));
            }
        }
        Ok(lines.join("\n"))
    }

    /// Run the pools in-process until every queue is empty
    async fn drain(&self) -> Result<(), ApiError> {
        self.runtime.start()?;
        let result = self.runtime.wait_for_idle(WAIT_TIMEOUT).await;
        self.runtime.shutdown().await?;
        result
    }

    fn show_plan(&self, plan_id: &PlanId, format: &str) -> Result<String, ApiError> {
        let entry = self.runtime.submission().plan(plan_id)?;
        match format {
            "json" => format_plan_json(&entry),
            _ => Ok(format_plan_text(&entry)),
        }
    }

    fn handle_plan_command(&self, command: &PlanCommands) -> Result<String, ApiError> {
        match command {
            PlanCommands::Show { plan_id, format } => {
                self.show_plan(&PlanId::from(plan_id.as_str()), format)
            }
            PlanCommands::List { user, format } => {
                let user_id = UserId::from(user.as_str());
                let entries = self.runtime.submission().plans_for_user(&user_id)?;
                match format.as_str() {
                    "json" => format_plan_list_json(&entries),
                    _ => Ok(format_plan_list_text(&user_id, &entries)),
                }
            }
        }
    }

    async fn handle_task_command(&self, command: &TaskCommands) -> Result<String, ApiError> {
        let submission = self.runtime.submission();
        match command {
            TaskCommands::Show { task_id, format } => {
                let task = submission.task(&TaskId::from(task_id.as_str()))?;
                match format.as_str() {
                    "json" => to_json(&task),
                    _ => Ok(format_task_text(&task)),
                }
            }
            TaskCommands::Complete { task_id } => {
                let task = submission.complete_task(&TaskId::from(task_id.as_str()))?;
                Ok(format!(
                    "Task {} completed (+{} XP once recalculated)",
                    task.id, task.xp_value
                ))
            }
            TaskCommands::Regenerate {
                task_id,
                context,
                wait,
            } => {
                let task_id = TaskId::from(task_id.as_str());
                let job_id = submission.request_task_regeneration(&task_id, context)?;
                if !*wait {
                    return Ok(format!("Queued task regeneration (job {})", job_id));
                }
                self.drain().await?;
                Ok(format_task_text(&submission.task(&task_id)?))
            }
        }
    }

    async fn handle_xp_command(&self, command: &XpCommands) -> Result<String, ApiError> {
        let submission = self.runtime.submission();
        match command {
            XpCommands::Recalc { user, wait } => {
                let user_id = UserId::from(user.as_str());
                let job_id = submission.request_xp_recalculation(&user_id)?;
                if !*wait {
                    return Ok(format!("Queued XP recalculation (job {})", job_id));
                }
                self.drain().await?;
                Ok(format_xp_text(&user_id, submission.user_xp(&user_id)?.as_ref()))
            }
            XpCommands::Show { user } => {
                let user_id = UserId::from(user.as_str());
                Ok(format_xp_text(&user_id, submission.user_xp(&user_id)?.as_ref()))
            }
        }
    }

    fn handle_queue_command(&self, command: &QueueCommands) -> Result<String, ApiError> {
        let queue = self.runtime.queue();
        match command {
            QueueCommands::Stats { format } => {
                let rows = QueueName::ALL
                    .into_iter()
                    .map(|name| queue.counts(name).map(|counts| (name, counts)))
                    .collect::<Result<Vec<_>, _>>()?;
                match format.as_str() {
                    "json" => format_queue_stats_json(&rows),
                    _ => Ok(format_queue_stats_text(&rows)),
                }
            }
            QueueCommands::DeadLetters { queue: name, format } => {
                let name: QueueName = name.parse()?;
                let jobs = queue.dead_letters(name)?;
                match format.as_str() {
                    "json" => to_json(&jobs),
                    _ => Ok(format_dead_letters_text(name, &jobs)),
                }
            }
        }
    }
}
