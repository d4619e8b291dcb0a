//! Submission Service
//!
//! Producer side of the pipeline. Requests are validated, the durable record is
//! written first and the job enqueued second; callers get identifiers back
//! immediately and observe completion by reading the record.

use crate::error::ApiError;
use crate::queue::{
    JobPayload, JobSink, PlanGenerationJob, TaskRegenerationJob, XpRecalculationJob,
};
use crate::store::{NewPlan, Plan, PlanStore, PlanUpdate, Status, Task, TaskUpdate, UserXp};
use crate::types::{JobId, PlanId, TaskId, UserId};
use std::sync::Arc;
use tracing::{error, info};

/// Upper bound on prompt and context length, in characters
pub const MAX_PROMPT_CHARS: usize = 2000;

/// Title a Plan carries until generation completes
pub const PLACEHOLDER_TITLE: &str = "Generating...";

/// A plan together with its ordered tasks
#[derive(Debug, Clone)]
pub struct PlanWithTasks {
    pub plan: Plan,
    pub tasks: Vec<Task>,
}

fn validate_text(field: &str, value: &str) -> Result<(), ApiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::Validation(format!("{} must not be empty", field)));
    }
    let chars = trimmed.chars().count();
    if chars > MAX_PROMPT_CHARS {
        return Err(ApiError::Validation(format!(
            "{} must be at most {} characters (got {})",
            field, MAX_PROMPT_CHARS, chars
        )));
    }
    Ok(())
}

pub struct SubmissionService {
    store: Arc<dyn PlanStore>,
    queue: Arc<dyn JobSink>,
}

impl SubmissionService {
    pub fn new(store: Arc<dyn PlanStore>, queue: Arc<dyn JobSink>) -> Self {
        Self { store, queue }
    }

    fn enqueue<P: JobPayload>(&self, payload: &P) -> Result<JobId, ApiError> {
        let payload = serde_json::to_value(payload)
            .map_err(|e| ApiError::QueueError(format!("Failed to encode payload: {}", e)))?;
        self.queue.push(P::QUEUE, payload)
    }

    /// Create a PENDING plan for `prompt` and enqueue its generation job
    pub fn submit_plan(&self, user_id: &UserId, prompt: &str) -> Result<PlanId, ApiError> {
        validate_text("prompt", prompt)?;

        let plan = self.store.create_plan(NewPlan {
            user_id: user_id.clone(),
            title: PLACEHOLDER_TITLE.to_string(),
            description: prompt.to_string(),
        })?;

        let job = PlanGenerationJob {
            plan_id: plan.id.clone(),
            prompt: prompt.trim().to_string(),
            user_id: user_id.clone(),
        };
        match self.enqueue(&job) {
            Ok(job_id) => {
                info!(plan_id = %plan.id, user_id = %user_id, job_id = %job_id, "Plan submitted");
                Ok(plan.id)
            }
            Err(err) => {
                // The plan row exists but no job will ever pick it up
                let message = format!("Failed to enqueue plan generation: {}", err);
                if let Err(e) = self
                    .store
                    .update_plan(&plan.id, plan.version, PlanUpdate::failed(&message))
                {
                    error!(plan_id = %plan.id, error = %e, "Failed to mark unqueued plan as failed");
                }
                Err(err)
            }
        }
    }

    pub fn request_xp_recalculation(&self, user_id: &UserId) -> Result<JobId, ApiError> {
        let job_id = self.enqueue(&XpRecalculationJob {
            user_id: user_id.clone(),
        })?;
        info!(user_id = %user_id, job_id = %job_id, "XP recalculation requested");
        Ok(job_id)
    }

    pub fn request_task_regeneration(
        &self,
        task_id: &TaskId,
        context: &str,
    ) -> Result<JobId, ApiError> {
        validate_text("context", context)?;
        self.store.require_task(task_id)?;

        let job_id = self.enqueue(&TaskRegenerationJob {
            task_id: task_id.clone(),
            context: context.trim().to_string(),
        })?;
        info!(task_id = %task_id, job_id = %job_id, "Task regeneration requested");
        Ok(job_id)
    }

    /// Mark a task done; XP totals pick it up on the next recalculation
    pub fn complete_task(&self, task_id: &TaskId) -> Result<Task, ApiError> {
        let task = self.store.require_task(task_id)?;
        if task.status == Status::Completed {
            return Ok(task);
        }
        if task.status == Status::Processing {
            return Err(ApiError::Conflict(format!(
                "Task {} is being regenerated",
                task_id
            )));
        }
        let task =
            self.store
                .update_task(task_id, task.version, TaskUpdate::status(Status::Completed))?;
        info!(task_id = %task_id, plan_id = %task.plan_id, xp_value = task.xp_value, "Task completed");
        Ok(task)
    }

    pub fn plan(&self, plan_id: &PlanId) -> Result<PlanWithTasks, ApiError> {
        let plan = self.store.require_plan(plan_id)?;
        let tasks = self.store.list_tasks(plan_id)?;
        Ok(PlanWithTasks { plan, tasks })
    }

    /// The user's plans, newest first
    pub fn plans_for_user(&self, user_id: &UserId) -> Result<Vec<PlanWithTasks>, ApiError> {
        self.store
            .list_plans_for_user(user_id)?
            .into_iter()
            .map(|plan| -> Result<PlanWithTasks, ApiError> {
                let tasks = self.store.list_tasks(&plan.id)?;
                Ok(PlanWithTasks { plan, tasks })
            })
            .collect()
    }

    pub fn task(&self, task_id: &TaskId) -> Result<Task, ApiError> {
        Ok(self.store.require_task(task_id)?)
    }

    pub fn user_xp(&self, user_id: &UserId) -> Result<Option<UserXp>, ApiError> {
        Ok(self.store.get_user_xp(user_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueuesConfig;
    use crate::queue::{JobQueue, QueueName};
    use crate::store::{NewTask, SledPlanStore};

    /// Queue that rejects every job
    struct UnavailableQueue;

    impl JobSink for UnavailableQueue {
        fn push(&self, _queue: QueueName, _payload: serde_json::Value) -> Result<JobId, ApiError> {
            Err(ApiError::QueueError("queue unavailable".to_string()))
        }
    }

    fn service() -> (SubmissionService, Arc<dyn PlanStore>, Arc<JobQueue>) {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let store: Arc<dyn PlanStore> = Arc::new(SledPlanStore::from_db(db.clone()).unwrap());
        let queue = Arc::new(JobQueue::open(db, &QueuesConfig::default()).unwrap());
        (
            SubmissionService::new(Arc::clone(&store), queue.clone()),
            store,
            queue,
        )
    }

    #[test]
    fn test_submit_creates_pending_plan_and_job() {
        let (service, store, queue) = service();
        let plan_id = service
            .submit_plan(&UserId::from("u1"), "  Learn Python  ")
            .unwrap();

        let plan = store.require_plan(&plan_id).unwrap();
        assert_eq!(plan.status, Status::Pending);
        assert_eq!(plan.title, PLACEHOLDER_TITLE);
        assert_eq!(plan.description, "  Learn Python  ");

        let job = queue.claim(QueueName::PlanGeneration).unwrap().unwrap();
        let payload: PlanGenerationJob = job.payload_as().unwrap();
        assert_eq!(payload.plan_id, plan_id);
        assert_eq!(payload.prompt, "Learn Python");
        assert_eq!(payload.user_id, UserId::from("u1"));
    }

    #[test]
    fn test_failed_enqueue_marks_plan_failed() {
        let store: Arc<dyn PlanStore> = Arc::new(SledPlanStore::temporary().unwrap());
        let service = SubmissionService::new(Arc::clone(&store), Arc::new(UnavailableQueue));
        let user = UserId::from("u1");

        let err = service.submit_plan(&user, "Learn Python").unwrap_err();
        assert!(matches!(err, ApiError::QueueError(_)));

        // The plan row was written before the enqueue and is not left PENDING
        let plans = store.list_plans_for_user(&user).unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].status, Status::Failed);
        let message = plans[0].content.as_ref().unwrap()["error"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(message.contains("queue unavailable"));
    }

    #[test]
    fn test_submit_rejects_empty_and_oversized_prompts() {
        let (service, store, _queue) = service();
        let user = UserId::from("u1");

        assert!(matches!(
            service.submit_plan(&user, "   "),
            Err(ApiError::Validation(_))
        ));
        let long = "x".repeat(MAX_PROMPT_CHARS + 1);
        assert!(matches!(
            service.submit_plan(&user, &long),
            Err(ApiError::Validation(_))
        ));
        assert!(service
            .submit_plan(&user, &"x".repeat(MAX_PROMPT_CHARS))
            .is_ok());
        assert_eq!(store.list_plans_for_user(&user).unwrap().len(), 1);
    }

    #[test]
    fn test_regeneration_requires_existing_task() {
        let (service, store, queue) = service();
        assert!(matches!(
            service.request_task_regeneration(&TaskId::from("nope"), "shorter"),
            Err(ApiError::TaskNotFound(_))
        ));

        let plan_id = service.submit_plan(&UserId::from("u1"), "goal").unwrap();
        let task = store
            .create_tasks(
                &plan_id,
                vec![NewTask {
                    title: "t".to_string(),
                    description: "d".to_string(),
                    xp_value: 5,
                }],
            )
            .unwrap()
            .remove(0);
        assert!(matches!(
            service.request_task_regeneration(&task.id, ""),
            Err(ApiError::Validation(_))
        ));
        service
            .request_task_regeneration(&task.id, "shorter")
            .unwrap();
        assert_eq!(queue.counts(QueueName::TaskRegeneration).unwrap().waiting, 1);
    }

    #[test]
    fn test_complete_task_is_idempotent() {
        let (service, store, _queue) = service();
        let plan_id = service.submit_plan(&UserId::from("u1"), "goal").unwrap();
        let task = store
            .create_tasks(
                &plan_id,
                vec![NewTask {
                    title: "t".to_string(),
                    description: "d".to_string(),
                    xp_value: 5,
                }],
            )
            .unwrap()
            .remove(0);

        let first = service.complete_task(&task.id).unwrap();
        assert_eq!(first.status, Status::Completed);
        assert!(first.completed_at.is_some());
        let second = service.complete_task(&task.id).unwrap();
        assert_eq!(first.version, second.version);
    }
}
