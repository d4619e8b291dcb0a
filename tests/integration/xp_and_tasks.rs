//! XP recalculation and task regeneration through the pipeline

use crate::integration::test_utils::{fast_config, plan_reply, Harness, ScriptedProvider};
use praxis::error::ApiError;
use praxis::queue::QueueName;
use praxis::store::Status;
use praxis::types::{PlanId, UserId};
use praxis::worker::REGENERATION_SYSTEM_PROMPT;
use serde_json::json;
use std::time::Duration;

async fn generated_plan(harness: &Harness, user: &UserId) -> PlanId {
    let plan_id = harness
        .runtime
        .submission()
        .submit_plan(user, "Learn Python")
        .unwrap();
    harness.drain().await;
    plan_id
}

#[tokio::test]
async fn test_xp_recalculation_is_idempotent() {
    let harness = Harness::new(ScriptedProvider::replying(plan_reply(3)));
    let user = UserId::from("user-1");
    let plan_id = generated_plan(&harness, &user).await;

    let submission = harness.runtime.submission();
    let tasks = harness.runtime.store().list_tasks(&plan_id).unwrap();
    // 10 + 30 XP completed, 20 XP still open
    submission.complete_task(&tasks[0].id).unwrap();
    submission.complete_task(&tasks[2].id).unwrap();

    submission.request_xp_recalculation(&user).unwrap();
    harness.drain().await;
    let first = submission.user_xp(&user).unwrap().unwrap();
    let plan_version = harness.runtime.store().require_plan(&plan_id).unwrap().version;

    submission.request_xp_recalculation(&user).unwrap();
    harness.drain().await;
    let second = submission.user_xp(&user).unwrap().unwrap();

    assert_eq!(first.total_xp, 40);
    assert_eq!(second.total_xp, 40);
    let plan = harness.runtime.store().require_plan(&plan_id).unwrap();
    assert_eq!(plan.xp_earned, 40);
    assert_eq!(plan.version, plan_version);

    let counts = harness
        .runtime
        .queue()
        .counts(QueueName::XpRecalculation)
        .unwrap();
    assert_eq!(counts.completed, 2);
}

#[tokio::test]
async fn test_regeneration_success_leaves_task_pending() {
    let provider = ScriptedProvider::replying("Practice list comprehensions for 20 minutes")
        .then(Ok(plan_reply(2)));
    let harness = Harness::new(provider);
    let plan_id = generated_plan(&harness, &UserId::from("user-1")).await;
    let task = harness.runtime.store().list_tasks(&plan_id).unwrap().remove(1);

    harness
        .runtime
        .submission()
        .request_task_regeneration(&task.id, "shorter sessions")
        .unwrap();
    harness.drain().await;

    let task = harness.runtime.store().require_task(&task.id).unwrap();
    assert_eq!(task.status, Status::Pending);
    assert_eq!(
        task.content,
        Some(json!({"regenerated": "Practice list comprehensions for 20 minutes"}))
    );

    let messages = harness.provider.messages();
    let last = messages.last().unwrap();
    assert_eq!(last[0].content, REGENERATION_SYSTEM_PROMPT);
    assert_eq!(last[1].content, "Regenerate task with context: shorter sessions");
}

#[tokio::test]
async fn test_regeneration_failure_leaves_task_failed() {
    let mut config = fast_config();
    config.queues.task_regeneration.max_attempts = 2;
    let provider = ScriptedProvider::failing(ApiError::ProviderTimeout(120)).then(Ok(plan_reply(1)));
    let harness = Harness::with_config(provider, config);
    let plan_id = generated_plan(&harness, &UserId::from("user-1")).await;
    let task = harness.runtime.store().list_tasks(&plan_id).unwrap().remove(0);

    harness
        .runtime
        .submission()
        .request_task_regeneration(&task.id, "more detail")
        .unwrap();
    harness.drain().await;

    let task = harness.runtime.store().require_task(&task.id).unwrap();
    assert_eq!(task.status, Status::Failed);
    let dead = harness
        .runtime
        .queue()
        .dead_letters(QueueName::TaskRegeneration)
        .unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].attempts, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_regeneration_waits_for_leased_task_instead_of_failing() {
    let provider = ScriptedProvider::replying("Fresh task details")
        .then(Ok(plan_reply(1)))
        .with_delay(Duration::from_millis(300));
    let harness = Harness::new(provider);
    let plan_id = generated_plan(&harness, &UserId::from("user-1")).await;
    let task = harness.runtime.store().list_tasks(&plan_id).unwrap().remove(0);

    let submission = harness.runtime.submission();
    submission.request_task_regeneration(&task.id, "first").unwrap();
    submission.request_task_regeneration(&task.id, "second").unwrap();
    harness.drain().await;

    // Both requests reached the provider, one after the other
    assert_eq!(harness.provider.calls(), 3);
    let prompts: Vec<String> = harness
        .provider
        .messages()
        .iter()
        .skip(1)
        .map(|messages| messages[1].content.clone())
        .collect();
    assert!(prompts.contains(&"Regenerate task with context: first".to_string()));
    assert!(prompts.contains(&"Regenerate task with context: second".to_string()));

    let dead = harness
        .runtime
        .queue()
        .dead_letters(QueueName::TaskRegeneration)
        .unwrap();
    assert!(dead.is_empty());
    let stats = harness
        .runtime
        .pool_stats(QueueName::TaskRegeneration)
        .unwrap();
    assert_eq!(stats.completed, 2);
    assert!(stats.deferred >= 1);
    assert_eq!(
        harness.runtime.store().require_task(&task.id).unwrap().status,
        Status::Pending
    );
}
