//! Job Queue
//!
//! Durable, named, at-least-once job broker on sled. Each queue keeps four trees
//! keyed by big-endian job id, so iteration order is enqueue order:
//! `waiting`, `active`, `completed` and `dead`. Moving a job between trees is a
//! single sled transaction.

use crate::config::QueuesConfig;
use crate::error::{ApiError, StorageError};
use crate::types::JobId;
use chrono::Utc;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, TransactionError, Transactional};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

mod job;
mod retry;

pub use job::{
    Job, JobPayload, JobState, PlanGenerationJob, QueueName, TaskRegenerationJob,
    XpRecalculationJob,
};
pub use retry::{BackoffStrategy, FailureOutcome, RetryPolicy};

/// Snapshot of one queue's job counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    /// Waiting and claimable now
    pub waiting: usize,
    /// Waiting for a backoff delay to elapse
    pub delayed: usize,
    pub active: usize,
    pub completed: usize,
    pub dead_lettered: usize,
}

struct Lane {
    waiting: sled::Tree,
    active: sled::Tree,
    completed: sled::Tree,
    dead: sled::Tree,
    notify: Arc<Notify>,
    policy: RetryPolicy,
    completed_limit: usize,
    dead_letter_limit: usize,
}

impl Lane {
    fn open(
        db: &sled::Db,
        queue: QueueName,
        config: &crate::config::QueueConfig,
    ) -> Result<Self, StorageError> {
        let tree = |suffix: &str| db.open_tree(format!("queue:{}:{}", queue, suffix));
        Ok(Self {
            waiting: tree("waiting")?,
            active: tree("active")?,
            completed: tree("completed")?,
            dead: tree("dead")?,
            notify: Arc::new(Notify::new()),
            policy: RetryPolicy::from_config(config),
            completed_limit: config.completed_limit,
            dead_letter_limit: config.dead_letter_limit,
        })
    }
}

/// Producer side of the queues
pub trait JobSink: Send + Sync {
    /// Append an encoded payload to `queue`
    fn push(&self, queue: QueueName, payload: serde_json::Value) -> Result<JobId, ApiError>;
}

/// Durable job queue shared by producers and worker pools
pub struct JobQueue {
    db: sled::Db,
    plan_generation: Lane,
    xp_recalculation: Lane,
    task_regeneration: Lane,
}

type TxResult<T> = Result<T, ConflictableTransactionError<StorageError>>;

fn from_tx(err: TransactionError<StorageError>) -> ApiError {
    match err {
        TransactionError::Abort(e) => e.into(),
        TransactionError::Storage(e) => StorageError::Database(e).into(),
    }
}

fn encode(job: &Job) -> Result<Vec<u8>, ApiError> {
    serde_json::to_vec(job).map_err(|e| ApiError::QueueError(format!("Failed to encode job: {}", e)))
}

fn decode(bytes: &[u8]) -> Result<Job, ApiError> {
    serde_json::from_slice(bytes)
        .map_err(|e| ApiError::QueueError(format!("Failed to decode job: {}", e)))
}

fn storage(err: sled::Error) -> ApiError {
    StorageError::Database(err).into()
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Wake one consumer of `lane` once `delay` has elapsed
fn wake_after(lane: &Lane, delay: Duration) {
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        let notify = Arc::clone(&lane.notify);
        handle.spawn(async move {
            tokio::time::sleep(delay).await;
            notify.notify_one();
        });
    }
}

/// Drop the oldest entries until `tree` holds at most `limit`
fn prune(tree: &sled::Tree, limit: usize) -> Result<usize, ApiError> {
    let mut removed = 0;
    while tree.len() > limit {
        if tree.pop_min().map_err(storage)?.is_none() {
            break;
        }
        removed += 1;
    }
    Ok(removed)
}

impl JobQueue {
    /// Open the queue trees on a shared database
    pub fn open(db: sled::Db, config: &QueuesConfig) -> Result<Self, ApiError> {
        Ok(Self {
            plan_generation: Lane::open(&db, QueueName::PlanGeneration, &config.plan_generation)?,
            xp_recalculation: Lane::open(
                &db,
                QueueName::XpRecalculation,
                &config.xp_recalculation,
            )?,
            task_regeneration: Lane::open(
                &db,
                QueueName::TaskRegeneration,
                &config.task_regeneration,
            )?,
            db,
        })
    }

    fn lane(&self, queue: QueueName) -> &Lane {
        match queue {
            QueueName::PlanGeneration => &self.plan_generation,
            QueueName::XpRecalculation => &self.xp_recalculation,
            QueueName::TaskRegeneration => &self.task_regeneration,
        }
    }

    /// Wakes consumers of `queue` when a job becomes claimable
    pub fn notifier(&self, queue: QueueName) -> Arc<Notify> {
        Arc::clone(&self.lane(queue).notify)
    }

    pub fn retry_policy(&self, queue: QueueName) -> RetryPolicy {
        self.lane(queue).policy
    }

    /// Enqueue a typed payload on its queue
    pub fn enqueue<P: JobPayload>(&self, payload: &P) -> Result<JobId, ApiError> {
        let payload = serde_json::to_value(payload)
            .map_err(|e| ApiError::QueueError(format!("Failed to encode payload: {}", e)))?;
        self.enqueue_raw(P::QUEUE, payload)
    }

    /// Enqueue an already-encoded payload
    pub fn enqueue_raw(
        &self,
        queue: QueueName,
        payload: serde_json::Value,
    ) -> Result<JobId, ApiError> {
        let lane = self.lane(queue);
        let id = JobId::new(self.db.generate_id().map_err(storage)?);
        let job = Job {
            id,
            queue,
            payload,
            attempts: 0,
            state: JobState::Waiting,
            enqueued_at: Utc::now(),
            available_at_ms: now_ms(),
            last_error: None,
            result: None,
            finished_at: None,
        };
        lane.waiting.insert(id.to_key(), encode(&job)?).map_err(storage)?;
        lane.notify.notify_one();
        debug!(queue = %queue, job_id = %id, "Job enqueued");
        Ok(id)
    }

    /// Claim the oldest claimable job, marking it active and starting an attempt
    pub fn claim(&self, queue: QueueName) -> Result<Option<Job>, ApiError> {
        let lane = self.lane(queue);
        let now = now_ms();

        for item in lane.waiting.iter() {
            let (key, bytes) = item.map_err(storage)?;
            let mut job = decode(&bytes)?;
            if job.available_at_ms > now {
                continue;
            }
            job.attempts += 1;
            job.state = JobState::Active;
            let active_bytes = encode(&job)?;

            let claimed = (&lane.waiting, &lane.active)
                .transaction(|(waiting, active)| -> TxResult<bool> {
                    // Another consumer got here first, or the record changed under us
                    if waiting.get(&key)?.as_deref() != Some(&*bytes) {
                        return Ok(false);
                    }
                    waiting.remove(key.clone())?;
                    active.insert(key.clone(), active_bytes.clone())?;
                    Ok(true)
                })
                .map_err(from_tx)?;

            if claimed {
                return Ok(Some(job));
            }
        }
        Ok(None)
    }

    /// Acknowledge a successful job
    pub fn complete(&self, job: &Job, result: serde_json::Value) -> Result<(), ApiError> {
        let lane = self.lane(job.queue);
        let mut done = job.clone();
        done.state = JobState::Completed;
        done.result = Some(result);
        done.last_error = None;
        done.finished_at = Some(Utc::now());
        self.move_active(lane, job, &lane.completed, &done)?;
        prune(&lane.completed, lane.completed_limit)?;
        Ok(())
    }

    /// Record a failed attempt: schedule a retry with backoff, or dead-letter
    pub fn fail(&self, job: &Job, error: &ApiError) -> Result<FailureOutcome, ApiError> {
        let lane = self.lane(job.queue);
        let outcome = lane.policy.on_failure(job.attempts, error.is_retryable());
        let mut next = job.clone();
        next.last_error = Some(error.to_string());

        match outcome {
            FailureOutcome::Retrying { delay, .. } => {
                next.state = JobState::Waiting;
                next.available_at_ms = now_ms() + delay.as_millis() as i64;
                self.move_active(lane, job, &lane.waiting, &next)?;
                wake_after(lane, delay);
            }
            FailureOutcome::DeadLettered { attempts } => {
                next.state = JobState::DeadLettered;
                next.finished_at = Some(Utc::now());
                self.move_active(lane, job, &lane.dead, &next)?;
                let pruned = prune(&lane.dead, lane.dead_letter_limit)?;
                warn!(
                    queue = %job.queue,
                    job_id = %job.id,
                    attempts,
                    pruned,
                    error = %error,
                    "Job dead-lettered"
                );
            }
        }
        Ok(outcome)
    }

    /// Return an interrupted job to waiting without consuming its attempt
    pub fn release(&self, job: &Job) -> Result<(), ApiError> {
        let lane = self.lane(job.queue);
        let mut next = job.clone();
        next.attempts = job.attempts.saturating_sub(1);
        next.state = JobState::Waiting;
        next.available_at_ms = now_ms();
        self.move_active(lane, job, &lane.waiting, &next)?;
        lane.notify.notify_one();
        Ok(())
    }

    /// Put a job whose entity is leased by another job back to waiting after `delay`.
    /// The attempt is not consumed.
    pub fn defer(&self, job: &Job, delay: Duration, reason: &ApiError) -> Result<(), ApiError> {
        let lane = self.lane(job.queue);
        let mut next = job.clone();
        next.attempts = job.attempts.saturating_sub(1);
        next.state = JobState::Waiting;
        next.available_at_ms = now_ms() + delay.as_millis() as i64;
        next.last_error = Some(reason.to_string());
        self.move_active(lane, job, &lane.waiting, &next)?;
        wake_after(lane, delay);
        Ok(())
    }

    /// Return every active job of `queue` to waiting (jobs left by a crashed process)
    pub fn recover_stalled(&self, queue: QueueName) -> Result<usize, ApiError> {
        let lane = self.lane(queue);
        let mut recovered = 0;
        for item in lane.active.iter() {
            let (_, bytes) = item.map_err(storage)?;
            let job = decode(&bytes)?;
            let mut next = job.clone();
            next.state = JobState::Waiting;
            next.available_at_ms = now_ms();
            self.move_active(lane, &job, &lane.waiting, &next)?;
            recovered += 1;
        }
        if recovered > 0 {
            info!(queue = %queue, recovered, "Recovered stalled jobs");
            lane.notify.notify_waiters();
        }
        Ok(recovered)
    }

    pub fn counts(&self, queue: QueueName) -> Result<QueueCounts, ApiError> {
        let lane = self.lane(queue);
        let now = now_ms();
        let mut counts = QueueCounts {
            active: lane.active.len(),
            completed: lane.completed.len(),
            dead_lettered: lane.dead.len(),
            ..QueueCounts::default()
        };
        for item in lane.waiting.iter() {
            let (_, bytes) = item.map_err(storage)?;
            if decode(&bytes)?.available_at_ms > now {
                counts.delayed += 1;
            } else {
                counts.waiting += 1;
            }
        }
        Ok(counts)
    }

    /// Retained dead-lettered jobs, oldest first
    pub fn dead_letters(&self, queue: QueueName) -> Result<Vec<Job>, ApiError> {
        self.lane(queue)
            .dead
            .iter()
            .map(|item| {
                let (_, bytes) = item.map_err(storage)?;
                decode(&bytes)
            })
            .collect()
    }

    /// Look a job up in any state
    pub fn get(&self, queue: QueueName, id: JobId) -> Result<Option<Job>, ApiError> {
        let lane = self.lane(queue);
        for tree in [&lane.waiting, &lane.active, &lane.completed, &lane.dead] {
            if let Some(bytes) = tree.get(id.to_key()).map_err(storage)? {
                return Ok(Some(decode(&bytes)?));
            }
        }
        Ok(None)
    }

    /// Move `job` out of the active tree into `target`, stored as `next`
    fn move_active(
        &self,
        lane: &Lane,
        job: &Job,
        target: &sled::Tree,
        next: &Job,
    ) -> Result<(), ApiError> {
        let key = job.id.to_key();
        let bytes = encode(next)?;
        let moved = (&lane.active, target)
            .transaction(|(active, target)| -> TxResult<bool> {
                if active.remove(&key[..])?.is_none() {
                    return Ok(false);
                }
                target.insert(&key[..], bytes.clone())?;
                Ok(true)
            })
            .map_err(from_tx)?;
        if !moved {
            return Err(ApiError::QueueError(format!(
                "Job {} on {} is not active",
                job.id, job.queue
            )));
        }
        Ok(())
    }
}

impl JobSink for JobQueue {
    fn push(&self, queue: QueueName, payload: serde_json::Value) -> Result<JobId, ApiError> {
        self.enqueue_raw(queue, payload)
    }
}
