//! Pipeline runtime: builds the store, queue, provider and worker pools from one
//! loaded configuration and owns their lifecycle.

use crate::config::PraxisConfig;
use crate::error::{ApiError, StorageError};
use crate::provider::{GenerationProvider, GenerationService, ProviderFactory};
use crate::queue::{JobQueue, QueueName};
use crate::service::SubmissionService;
use crate::store::{PlanStore, SledPlanStore};
use crate::worker::{
    JobHandler, PlanGenerationHandler, PoolStats, TaskRegenerationHandler, WorkerContext,
    WorkerPool, XpRecalculationHandler,
};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct PipelineRuntime {
    config: PraxisConfig,
    store: Arc<SledPlanStore>,
    queue: Arc<JobQueue>,
    generation: Arc<GenerationService>,
    submission: SubmissionService,
    pools: Vec<WorkerPool>,
}

impl PipelineRuntime {
    /// Open the database at `storage.path` and build the configured provider
    pub fn from_config(config: PraxisConfig) -> Result<Self, ApiError> {
        std::fs::create_dir_all(&config.storage.path).map_err(StorageError::IoError)?;
        let db = sled::open(&config.storage.path).map_err(StorageError::Database)?;
        let provider = ProviderFactory::from_config(&config.provider)?;
        Self::with_provider(config, db, provider)
    }

    /// Build on an open database with an explicit provider
    pub fn with_provider(
        config: PraxisConfig,
        db: sled::Db,
        provider: Arc<dyn GenerationProvider>,
    ) -> Result<Self, ApiError> {
        let store = Arc::new(SledPlanStore::from_db(db.clone())?);
        let queue = Arc::new(JobQueue::open(db, &config.queues)?);
        let generation = Arc::new(
            GenerationService::new(provider, config.provider.request_timeout())
                .with_default_options(config.provider.default_options.clone()),
        );

        let plan_store: Arc<dyn PlanStore> = store.clone();
        let ctx = WorkerContext {
            store: Arc::clone(&plan_store),
            generation: Arc::clone(&generation),
            lease_ttl: config.storage.lease_ttl(),
        };
        let handlers: Vec<Arc<dyn JobHandler>> = vec![
            Arc::new(PlanGenerationHandler::new(ctx.clone())),
            Arc::new(XpRecalculationHandler::new(ctx.clone())),
            Arc::new(TaskRegenerationHandler::new(ctx)),
        ];
        let pools = handlers
            .into_iter()
            .map(|handler| {
                let queue_config = config.queue(handler.queue());
                WorkerPool::new(
                    Arc::clone(&queue),
                    handler,
                    queue_config.concurrency,
                    queue_config.poll_interval(),
                )
            })
            .collect();

        Ok(Self {
            submission: SubmissionService::new(plan_store, queue.clone()),
            config,
            store,
            queue,
            generation,
            pools,
        })
    }

    /// Recover jobs stalled by a previous process, then start every pool
    pub fn start(&self) -> Result<(), ApiError> {
        for queue in QueueName::ALL {
            let recovered = self.queue.recover_stalled(queue)?;
            if recovered > 0 {
                info!(queue = %queue, recovered, "Recovered stalled jobs");
            }
        }
        for pool in &self.pools {
            pool.start()?;
        }
        info!(provider = self.generation.provider().provider_name(), "Pipeline started");
        Ok(())
    }

    /// Stop every pool and flush the database
    pub async fn shutdown(&self) -> Result<(), ApiError> {
        let stopped = join_all(self.pools.iter().map(|pool| pool.stop())).await;
        for result in stopped {
            result?;
        }
        self.store.flush()?;
        info!("Pipeline stopped");
        Ok(())
    }

    /// Wait until every queue has drained
    pub async fn wait_for_idle(&self, timeout: Duration) -> Result<(), ApiError> {
        for pool in &self.pools {
            pool.wait_for_idle(timeout).await?;
        }
        Ok(())
    }

    pub fn config(&self) -> &PraxisConfig {
        &self.config
    }

    pub fn submission(&self) -> &SubmissionService {
        &self.submission
    }

    pub fn store(&self) -> Arc<dyn PlanStore> {
        self.store.clone()
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn generation(&self) -> &Arc<GenerationService> {
        &self.generation
    }

    pub fn pool_stats(&self, queue: QueueName) -> Option<PoolStats> {
        self.pools
            .iter()
            .find(|pool| pool.queue_name() == queue)
            .map(WorkerPool::stats)
    }
}
