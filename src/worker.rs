//! Workers
//!
//! One [`WorkerPool`] per queue runs that queue's [`JobHandler`] with bounded
//! concurrency. Handlers own the Plan/Task state machine for their job and report
//! the outcome back to the pool, which acknowledges, retries or dead-letters it.

use crate::error::ApiError;
use crate::provider::GenerationService;
use crate::queue::{Job, QueueName};
use crate::store::PlanStore;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

mod plan_generation;
mod plan_output;
mod pool;
mod task_regeneration;
mod xp_recalculation;

pub use plan_generation::PlanGenerationHandler;
pub use plan_output::{PlanOutput, PlanTaskOutput, PLAN_SYSTEM_PROMPT};
pub use pool::{PoolStats, WorkerPool};
pub use task_regeneration::{TaskRegenerationHandler, REGENERATION_SYSTEM_PROMPT};
pub use xp_recalculation::XpRecalculationHandler;

/// Executes one job of a queue to a terminal outcome
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn queue(&self) -> QueueName;

    /// `Ok` acknowledges the job with a result payload; `Err` goes to the retry policy
    async fn handle(&self, job: &Job) -> Result<Value, ApiError>;
}

/// Dependencies injected into every handler
#[derive(Clone)]
pub struct WorkerContext {
    pub store: Arc<dyn PlanStore>,
    pub generation: Arc<GenerationService>,
    pub lease_ttl: Duration,
}

/// Entity lease held for the duration of a job; released on drop, including
/// when the handler future is cancelled
pub(crate) struct LeaseGuard {
    store: Arc<dyn PlanStore>,
    key: String,
    owner: String,
}

impl LeaseGuard {
    pub(crate) fn acquire(
        store: &Arc<dyn PlanStore>,
        key: String,
        owner: String,
        ttl: Duration,
    ) -> Result<Self, ApiError> {
        store.acquire_lease(&key, &owner, ttl)?;
        debug!(lease = %key, owner = %owner, "Lease acquired");
        Ok(Self {
            store: Arc::clone(store),
            key,
            owner,
        })
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if let Err(e) = self.store.release_lease(&self.key, &self.owner) {
            warn!(lease = %self.key, owner = %self.owner, error = %e, "Failed to release lease");
        }
    }
}
