use super::{JobHandler, LeaseGuard, WorkerContext};
use crate::error::ApiError;
use crate::provider::{ChatMessage, GenerateOptions};
use crate::queue::{Job, QueueName, TaskRegenerationJob};
use crate::store::{task_lease_key, Status, Task, TaskUpdate};
use crate::types::TaskId;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

pub const REGENERATION_SYSTEM_PROMPT: &str =
    "You are a helpful assistant that generates task details.";

fn regeneration_prompt(context: &str) -> String {
    format!("Regenerate task with context: {}", context)
}

/// Rewrites a task's details from user-supplied context
pub struct TaskRegenerationHandler {
    ctx: WorkerContext,
}

impl TaskRegenerationHandler {
    pub fn new(ctx: WorkerContext) -> Self {
        Self { ctx }
    }

    async fn regenerate(&self, task: Task, context: &str) -> Result<Task, ApiError> {
        let task = self
            .ctx
            .store
            .update_task(&task.id, task.version, TaskUpdate::status(Status::Processing))?;

        let response = self
            .ctx
            .generation
            .chat(
                vec![
                    ChatMessage::system(REGENERATION_SYSTEM_PROMPT),
                    ChatMessage::user(regeneration_prompt(context)),
                ],
                GenerateOptions::default(),
            )
            .await?;

        let task = self.ctx.store.update_task(
            &task.id,
            task.version,
            TaskUpdate {
                content: Some(json!({ "regenerated": response.content })),
                status: Some(Status::Pending),
                ..TaskUpdate::default()
            },
        )?;
        Ok(task)
    }

    fn mark_failed(&self, task_id: &TaskId, err: &ApiError) {
        let result = self.ctx.store.require_task(task_id).and_then(|task| {
            self.ctx
                .store
                .update_task(task_id, task.version, TaskUpdate::status(Status::Failed))
        });
        match result {
            Ok(_) => warn!(task_id = %task_id, error = %err, "Task regeneration failed"),
            Err(e) => warn!(
                task_id = %task_id,
                error = %err,
                write_error = %e,
                "Failed to record task failure"
            ),
        }
    }
}

#[async_trait]
impl JobHandler for TaskRegenerationHandler {
    fn queue(&self) -> QueueName {
        QueueName::TaskRegeneration
    }

    async fn handle(&self, job: &Job) -> Result<Value, ApiError> {
        let payload: TaskRegenerationJob = job.payload_as()?;
        self.ctx.store.require_task(&payload.task_id)?;

        let _lease = LeaseGuard::acquire(
            &self.ctx.store,
            task_lease_key(&payload.task_id),
            job.owner(),
            self.ctx.lease_ttl,
        )?;
        let task = self.ctx.store.require_task(&payload.task_id)?;

        match self.regenerate(task, &payload.context).await {
            Ok(task) => {
                info!(task_id = %task.id, plan_id = %task.plan_id, "Task regenerated");
                Ok(json!({ "taskId": task.id, "regenerated": true }))
            }
            Err(err) => {
                self.mark_failed(&payload.task_id, &err);
                Err(err)
            }
        }
    }
}
