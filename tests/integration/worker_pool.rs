//! Pool concurrency bounds, shutdown and stall recovery against the full pipeline

use crate::integration::test_utils::{fast_config, plan_reply, Harness, ScriptedProvider};
use praxis::queue::QueueName;
use praxis::store::Status;
use praxis::types::UserId;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_burst_never_exceeds_configured_concurrency() {
    let mut config = fast_config();
    config.queues.plan_generation.concurrency = 2;
    let provider = ScriptedProvider::replying(plan_reply(1)).with_delay(Duration::from_millis(40));
    let harness = Harness::with_config(provider, config);

    let user = UserId::from("user-1");
    let plan_ids: Vec<_> = (0..7)
        .map(|i| {
            harness
                .runtime
                .submission()
                .submit_plan(&user, &format!("goal {}", i))
                .unwrap()
        })
        .collect();

    harness.drain().await;

    assert!(harness.provider.peak_in_flight() <= 2);
    assert_eq!(harness.provider.calls(), 7);
    let stats = harness.runtime.pool_stats(QueueName::PlanGeneration).unwrap();
    assert!(stats.peak_in_flight <= 2);
    assert_eq!(stats.completed, 7);
    for plan_id in &plan_ids {
        let plan = harness.runtime.store().require_plan(plan_id).unwrap();
        assert_eq!(plan.status, Status::Completed);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_returns_job_and_restart_finishes_it() {
    let provider = ScriptedProvider::replying(plan_reply(2));
    provider.set_stalled(true);
    let harness = Harness::new(provider);
    let plan_id = harness
        .runtime
        .submission()
        .submit_plan(&UserId::from("user-1"), "Learn Haskell")
        .unwrap();

    harness.runtime.start().unwrap();
    harness
        .wait_for_plan_status(&plan_id, Status::Processing)
        .await;
    harness.runtime.shutdown().await.unwrap();

    let counts = harness
        .runtime
        .queue()
        .counts(QueueName::PlanGeneration)
        .unwrap();
    assert_eq!(counts.waiting, 1);
    assert_eq!(counts.active, 0);
    assert_eq!(
        harness
            .runtime
            .pool_stats(QueueName::PlanGeneration)
            .unwrap()
            .released,
        1
    );

    harness.provider.set_stalled(false);
    harness.drain().await;

    let plan = harness.runtime.store().require_plan(&plan_id).unwrap();
    assert_eq!(plan.status, Status::Completed);
    let job = harness
        .runtime
        .queue()
        .dead_letters(QueueName::PlanGeneration)
        .unwrap();
    assert!(job.is_empty());
}

#[tokio::test]
async fn test_start_recovers_jobs_left_active() {
    let harness = Harness::new(ScriptedProvider::replying(plan_reply(1)));
    let plan_id = harness
        .runtime
        .submission()
        .submit_plan(&UserId::from("user-1"), "Learn Elixir")
        .unwrap();
    // A previous process claimed the job and died
    let claimed = harness
        .runtime
        .queue()
        .claim(QueueName::PlanGeneration)
        .unwrap()
        .unwrap();
    assert_eq!(claimed.attempts, 1);

    harness.drain().await;

    let plan = harness.runtime.store().require_plan(&plan_id).unwrap();
    assert_eq!(plan.status, Status::Completed);
}
