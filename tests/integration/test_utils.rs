//! Shared test utilities for integration tests
//!
//! A scripted in-process provider and a pipeline harness on a temporary sled
//! database, so pipeline tests never touch the network or the user's data dir.

use async_trait::async_trait;
use parking_lot::Mutex;
use praxis::config::{BackoffKind, PraxisConfig};
use praxis::error::ApiError;
use praxis::provider::{ChatMessage, GenerateOptions, GenerationProvider, GenerationResponse};
use praxis::runtime::PipelineRuntime;
use praxis::store::Status;
use praxis::types::PlanId;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

pub const LEARN_PYTHON_REPLY: &str = r#"{"title":"Learn Python","description":"A gentle start","tasks":[{"title":"Install Python","description":"Download and install Python 3","xpValue":10}]}"#;

pub const PLAIN_TEXT_REPLY: &str =
    "Sure! First, install Python. Then work through a beginner tutorial.";

/// Reply JSON with `count` tasks worth 10, 20, ... XP
pub fn plan_reply(count: usize) -> String {
    let tasks: Vec<_> = (1..=count)
        .map(|i| {
            serde_json::json!({
                "title": format!("Step {}", i),
                "description": format!("Do step {}", i),
                "xpValue": i * 10,
            })
        })
        .collect();
    serde_json::json!({ "title": "Plan", "description": "Generated", "tasks": tasks }).to_string()
}

/// Provider whose replies are scripted per call
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<String, ApiError>>>,
    fallback: Result<String, ApiError>,
    delay: Duration,
    stalled: AtomicBool,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    messages: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedProvider {
    /// Always reply with `reply`
    pub fn replying(reply: impl Into<String>) -> Self {
        Self::with_fallback(Ok(reply.into()))
    }

    /// Always fail with `error`
    pub fn failing(error: ApiError) -> Self {
        Self::with_fallback(Err(error))
    }

    fn with_fallback(fallback: Result<String, ApiError>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            delay: Duration::ZERO,
            stalled: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            messages: Mutex::new(Vec::new()),
        }
    }

    /// Replies served before the fallback, in order
    pub fn then(self, reply: Result<String, ApiError>) -> Self {
        self.script.lock().push_back(reply);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// While stalled, calls block until cancelled
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn messages(&self) -> Vec<Vec<ChatMessage>> {
        self.messages.lock().clone()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl GenerationProvider for ScriptedProvider {
    async fn generate(
        &self,
        prompt: &str,
        options: GenerateOptions,
    ) -> Result<GenerationResponse, ApiError> {
        self.chat(vec![ChatMessage::user(prompt)], options).await
    }

    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        _options: GenerateOptions,
    ) -> Result<GenerationResponse, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.messages.lock().push(messages);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        while self.stalled.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
            .map(|content| GenerationResponse {
                content,
                model: "scripted".to_string(),
                done: true,
            })
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }

    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn list_models(&self) -> Result<Vec<String>, ApiError> {
        Ok(vec!["scripted".to_string()])
    }
}

/// Config with millisecond backoff and polling for fast tests
pub fn fast_config() -> PraxisConfig {
    let mut config = PraxisConfig::default();
    for queue in [
        &mut config.queues.plan_generation,
        &mut config.queues.xp_recalculation,
        &mut config.queues.task_regeneration,
    ] {
        queue.backoff.strategy = BackoffKind::Fixed;
        queue.backoff.delay_ms = 5;
        queue.backoff.max_delay_ms = 5;
        queue.poll_interval_ms = 10;
    }
    config
}

/// A pipeline on a temporary database driven by a scripted provider
pub struct Harness {
    pub runtime: PipelineRuntime,
    pub provider: Arc<ScriptedProvider>,
    _dir: TempDir,
}

impl Harness {
    pub fn new(provider: ScriptedProvider) -> Self {
        Self::with_config(provider, fast_config())
    }

    pub fn with_config(provider: ScriptedProvider, mut config: PraxisConfig) -> Self {
        let dir = TempDir::new().unwrap();
        config.storage.path = dir.path().join("db");
        let db = sled::open(&config.storage.path).unwrap();
        let provider = Arc::new(provider);
        let runtime = PipelineRuntime::with_provider(config, db, provider.clone()).unwrap();
        Self {
            runtime,
            provider,
            _dir: dir,
        }
    }

    /// Start the pools, wait for every queue to drain, stop the pools
    pub async fn drain(&self) {
        self.runtime.start().unwrap();
        self.runtime
            .wait_for_idle(Duration::from_secs(20))
            .await
            .unwrap();
        self.runtime.shutdown().await.unwrap();
    }

    pub async fn wait_for_plan_status(&self, plan_id: &PlanId, status: Status) {
        let started = Instant::now();
        loop {
            let plan = self.runtime.store().require_plan(plan_id).unwrap();
            if plan.status == status {
                return;
            }
            assert!(
                started.elapsed() < Duration::from_secs(10),
                "plan stayed {} waiting for {}",
                plan.status,
                status
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}
