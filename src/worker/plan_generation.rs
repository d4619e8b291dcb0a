use super::plan_output::{PlanOutput, PLAN_SYSTEM_PROMPT};
use super::{JobHandler, LeaseGuard, WorkerContext};
use crate::error::ApiError;
use crate::provider::{ChatMessage, GenerateOptions};
use crate::queue::{Job, PlanGenerationJob, QueueName};
use crate::store::{plan_lease_key, Plan, PlanUpdate, Status};
use crate::types::PlanId;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

const PLAN_TEMPERATURE: f32 = 0.7;

/// Turns a free-text goal into a completed Plan with ordered Tasks
pub struct PlanGenerationHandler {
    ctx: WorkerContext,
}

impl PlanGenerationHandler {
    pub fn new(ctx: WorkerContext) -> Self {
        Self { ctx }
    }

    /// PROCESSING, provider call, strict parse and the atomic completion write
    async fn generate(&self, plan: Plan, prompt: &str) -> Result<Value, ApiError> {
        let plan = self
            .ctx
            .store
            .update_plan(&plan.id, plan.version, PlanUpdate::status(Status::Processing))?;
        debug!(plan_id = %plan.id, "Plan marked processing");

        let messages = vec![
            ChatMessage::system(PLAN_SYSTEM_PROMPT),
            ChatMessage::user(prompt),
        ];
        let response = self
            .ctx
            .generation
            .chat(
                messages,
                GenerateOptions::default().with_temperature(PLAN_TEMPERATURE),
            )
            .await?;

        let completion = PlanOutput::parse(&response.content)?.into_completion()?;
        let (plan, tasks) =
            self.ctx
                .store
                .complete_plan_generation(&plan.id, plan.version, completion)?;

        info!(
            plan_id = %plan.id,
            task_count = tasks.len(),
            model = %response.model,
            "Plan generated"
        );
        Ok(json!({ "planId": plan.id, "taskCount": tasks.len() }))
    }

    /// Record the failure on the Plan so the user sees it
    fn mark_failed(&self, plan_id: &PlanId, err: &ApiError) {
        let result = self.ctx.store.require_plan(plan_id).and_then(|plan| {
            if matches!(plan.status, Status::Completed) {
                return Ok(None);
            }
            self.ctx
                .store
                .update_plan(plan_id, plan.version, PlanUpdate::failed(&err.to_string()))
                .map(Some)
        });
        match result {
            Ok(Some(_)) => warn!(plan_id = %plan_id, error = %err, "Plan generation failed"),
            Ok(None) => {}
            Err(e) => warn!(
                plan_id = %plan_id,
                error = %err,
                write_error = %e,
                "Failed to record plan failure"
            ),
        }
    }
}

fn skipped(plan_id: &PlanId) -> Value {
    json!({ "planId": plan_id, "skipped": true })
}

#[async_trait]
impl JobHandler for PlanGenerationHandler {
    fn queue(&self) -> QueueName {
        QueueName::PlanGeneration
    }

    async fn handle(&self, job: &Job) -> Result<Value, ApiError> {
        let payload: PlanGenerationJob = job.payload_as()?;
        let plan = self.ctx.store.require_plan(&payload.plan_id)?;
        if plan.status == Status::Completed {
            debug!(plan_id = %plan.id, job_id = %job.id, "Plan already completed; skipping");
            return Ok(skipped(&plan.id));
        }

        let _lease = LeaseGuard::acquire(
            &self.ctx.store,
            plan_lease_key(&plan.id),
            job.owner(),
            self.ctx.lease_ttl,
        )?;

        // Re-read under the lease
        let plan = self.ctx.store.require_plan(&payload.plan_id)?;
        if plan.status == Status::Completed {
            return Ok(skipped(&plan.id));
        }

        match self.generate(plan, &payload.prompt).await {
            Ok(result) => Ok(result),
            Err(err) => {
                self.mark_failed(&payload.plan_id, &err);
                Err(err)
            }
        }
    }
}
