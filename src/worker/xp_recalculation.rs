use super::{JobHandler, WorkerContext};
use crate::error::{ApiError, StorageError};
use crate::queue::{Job, QueueName, XpRecalculationJob};
use crate::store::{PlanUpdate, Status};
use crate::types::UserId;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

/// Recompute rounds before a write conflict is handed to the queue
const MAX_RECALCULATION_ROUNDS: u32 = 3;

/// Recomputes a user's experience total from completed work
pub struct XpRecalculationHandler {
    ctx: WorkerContext,
}

impl XpRecalculationHandler {
    pub fn new(ctx: WorkerContext) -> Self {
        Self { ctx }
    }

    /// Sum of completed task XP across the user's completed plans.
    /// Writes back each plan's `xp_earned` only when it changed. A concurrent
    /// recalculation that writes first forces a recompute.
    pub fn recalculate(&self, user_id: &UserId) -> Result<u64, ApiError> {
        let mut attempt = 1;
        loop {
            match self.try_recalculate(user_id) {
                Err(StorageError::VersionConflict { entity, .. })
                    if attempt < MAX_RECALCULATION_ROUNDS =>
                {
                    debug!(user_id = %user_id, entity = %entity, attempt, "Concurrent XP write; recomputing");
                    attempt += 1;
                }
                result => return result.map_err(ApiError::from),
            }
        }
    }

    fn try_recalculate(&self, user_id: &UserId) -> Result<u64, StorageError> {
        let store = &self.ctx.store;
        // Read before summing so a newer total written meanwhile is detected
        let expected_version = store.get_user_xp(user_id)?.map_or(0, |xp| xp.version);
        let mut total = 0u64;

        for plan in store.list_plans_for_user(user_id)? {
            if plan.status != Status::Completed {
                continue;
            }
            let earned: u64 = store
                .list_tasks(&plan.id)?
                .iter()
                .filter(|task| task.status == Status::Completed)
                .map(|task| u64::from(task.xp_value))
                .sum();
            total += earned;

            if plan.xp_earned != earned {
                store.update_plan(
                    &plan.id,
                    plan.version,
                    PlanUpdate {
                        xp_earned: Some(earned),
                        ..PlanUpdate::default()
                    },
                )?;
                debug!(plan_id = %plan.id, xp_earned = earned, "Plan XP updated");
            }
        }

        store.put_user_xp(user_id, expected_version, total)?;
        Ok(total)
    }
}

#[async_trait]
impl JobHandler for XpRecalculationHandler {
    fn queue(&self) -> QueueName {
        QueueName::XpRecalculation
    }

    async fn handle(&self, job: &Job) -> Result<Value, ApiError> {
        let payload: XpRecalculationJob = job.payload_as()?;
        let total = self.recalculate(&payload.user_id)?;
        info!(user_id = %payload.user_id, total_xp = total, "XP recalculated");
        Ok(json!({ "userId": payload.user_id, "totalXP": total }))
    }
}
