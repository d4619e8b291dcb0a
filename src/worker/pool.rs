//! Bounded-concurrency consumer pool for one queue.

use super::JobHandler;
use crate::error::ApiError;
use crate::queue::{FailureOutcome, Job, JobQueue, QueueName};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Pool statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Jobs currently executing
    pub processing: usize,
    /// Highest `processing` value observed
    pub peak_in_flight: usize,
    pub completed: usize,
    /// Failed attempts scheduled for another try
    pub retried: usize,
    pub dead_lettered: usize,
    /// Jobs returned to the queue by shutdown
    pub released: usize,
    /// Claims put back because another job held the entity's lease
    pub deferred: usize,
}

/// N consumer loops over one queue; never more than N jobs in flight
pub struct WorkerPool {
    queue: Arc<JobQueue>,
    handler: Arc<dyn JobHandler>,
    concurrency: usize,
    poll_interval: Duration,
    shutdown_tx: watch::Sender<bool>,
    workers: RwLock<Vec<JoinHandle<()>>>,
    stats: Arc<RwLock<PoolStats>>,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<JobQueue>,
        handler: Arc<dyn JobHandler>,
        concurrency: usize,
        poll_interval: Duration,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            queue,
            handler,
            concurrency: concurrency.max(1),
            poll_interval,
            shutdown_tx,
            workers: RwLock::new(Vec::new()),
            stats: Arc::new(RwLock::new(PoolStats::default())),
        }
    }

    pub fn queue_name(&self) -> QueueName {
        self.handler.queue()
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Spawn the consumer loops
    pub fn start(&self) -> Result<(), ApiError> {
        let mut workers = self.workers.write();
        if !workers.is_empty() {
            return Ok(());
        }
        self.shutdown_tx.send_replace(false);

        for worker_id in 0..self.concurrency {
            let queue = Arc::clone(&self.queue);
            let handler = Arc::clone(&self.handler);
            let stats = Arc::clone(&self.stats);
            let shutdown = self.shutdown_tx.subscribe();
            let poll_interval = self.poll_interval;

            workers.push(tokio::spawn(async move {
                Self::worker_loop(worker_id, queue, handler, poll_interval, shutdown, stats).await;
            }));
        }

        info!(
            queue = %self.queue_name(),
            worker_count = workers.len(),
            "Started worker pool"
        );
        Ok(())
    }

    /// Stop consumers; in-flight jobs are cancelled and returned to the queue
    pub async fn stop(&self) -> Result<(), ApiError> {
        let workers = std::mem::take(&mut *self.workers.write());
        if workers.is_empty() {
            return Ok(());
        }
        self.shutdown_tx.send_replace(true);

        for handle in workers {
            if let Err(e) = handle.await {
                error!(queue = %self.queue_name(), error = %e, "Worker task panicked");
            }
        }

        info!(queue = %self.queue_name(), "Stopped worker pool");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        !self.workers.read().is_empty()
    }

    pub fn stats(&self) -> PoolStats {
        self.stats.read().clone()
    }

    /// Wait until the queue has no waiting or active jobs
    pub async fn wait_for_idle(&self, timeout: Duration) -> Result<(), ApiError> {
        let start = Instant::now();
        let queue_name = self.queue_name();
        loop {
            let counts = self.queue.counts(queue_name)?;
            if counts.waiting == 0 && counts.delayed == 0 && counts.active == 0 {
                return Ok(());
            }
            if start.elapsed() >= timeout {
                return Err(ApiError::QueueError(format!(
                    "Timeout waiting for {} to drain",
                    queue_name
                )));
            }
            sleep(Duration::from_millis(20)).await;
        }
    }

    async fn worker_loop(
        worker_id: usize,
        queue: Arc<JobQueue>,
        handler: Arc<dyn JobHandler>,
        poll_interval: Duration,
        mut shutdown: watch::Receiver<bool>,
        stats: Arc<RwLock<PoolStats>>,
    ) {
        let queue_name = handler.queue();
        let notify = queue.notifier(queue_name);
        debug!(queue = %queue_name, worker_id, "Worker started");

        loop {
            if *shutdown.borrow() || shutdown.has_changed().is_err() {
                break;
            }

            let job = match queue.claim(queue_name) {
                Ok(job) => job,
                Err(e) => {
                    error!(queue = %queue_name, worker_id, error = %e, "Failed to claim job");
                    sleep(poll_interval).await;
                    continue;
                }
            };

            let Some(job) = job else {
                tokio::select! {
                    _ = notify.notified() => {}
                    _ = sleep(poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
                continue;
            };

            Self::run_job(worker_id, &queue, handler.as_ref(), &mut shutdown, &stats, job).await;
        }

        debug!(queue = %queue_name, worker_id, "Worker stopped");
    }

    async fn run_job(
        worker_id: usize,
        queue: &JobQueue,
        handler: &dyn JobHandler,
        shutdown: &mut watch::Receiver<bool>,
        stats: &RwLock<PoolStats>,
        job: Job,
    ) {
        {
            let mut stats = stats.write();
            stats.processing += 1;
            stats.peak_in_flight = stats.peak_in_flight.max(stats.processing);
        }
        let started = Instant::now();
        debug!(
            queue = %job.queue,
            job_id = %job.id,
            worker_id,
            attempt = job.attempts,
            "Job started"
        );

        let outcome = tokio::select! {
            result = handler.handle(&job) => Some(result),
            _ = shutdown.changed() => None,
        };
        let duration_ms = started.elapsed().as_millis() as u64;
        stats.write().processing -= 1;

        match outcome {
            None => {
                if let Err(e) = queue.release(&job) {
                    error!(queue = %job.queue, job_id = %job.id, error = %e, "Failed to release job");
                    return;
                }
                stats.write().released += 1;
                info!(
                    queue = %job.queue,
                    job_id = %job.id,
                    "Job interrupted by shutdown and returned to the queue"
                );
            }
            Some(Ok(result)) => {
                if let Err(e) = queue.complete(&job, result) {
                    error!(queue = %job.queue, job_id = %job.id, error = %e, "Failed to acknowledge job");
                    return;
                }
                stats.write().completed += 1;
                info!(
                    queue = %job.queue,
                    job_id = %job.id,
                    attempt = job.attempts,
                    duration_ms,
                    "Job completed"
                );
            }
            Some(Err(err @ ApiError::LeaseHeld(_))) => {
                let wait = queue.retry_policy(job.queue).lease_wait();
                if let Err(e) = queue.defer(&job, wait, &err) {
                    error!(queue = %job.queue, job_id = %job.id, error = %e, "Failed to defer job");
                    return;
                }
                stats.write().deferred += 1;
                debug!(
                    queue = %job.queue,
                    job_id = %job.id,
                    retry_in_ms = wait.as_millis() as u64,
                    reason = %err,
                    "Entity busy; job deferred"
                );
            }
            Some(Err(err)) => match queue.fail(&job, &err) {
                Ok(FailureOutcome::Retrying { attempt, delay }) => {
                    stats.write().retried += 1;
                    warn!(
                        queue = %job.queue,
                        job_id = %job.id,
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        duration_ms,
                        error = %err,
                        "Job attempt failed; retrying"
                    );
                }
                Ok(FailureOutcome::DeadLettered { attempts }) => {
                    stats.write().dead_lettered += 1;
                    error!(
                        queue = %job.queue,
                        job_id = %job.id,
                        attempts,
                        duration_ms,
                        error = %err,
                        "Job failed permanently"
                    );
                }
                Err(e) => {
                    error!(
                        queue = %job.queue,
                        job_id = %job.id,
                        error = %e,
                        job_error = %err,
                        "Failed to record job failure"
                    );
                }
            },
        }
    }
}
