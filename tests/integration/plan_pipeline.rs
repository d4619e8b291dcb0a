//! End-to-end plan generation through the queue, worker pool and store

use crate::integration::test_utils::{
    fast_config, plan_reply, Harness, ScriptedProvider, LEARN_PYTHON_REPLY, PLAIN_TEXT_REPLY,
};
use praxis::error::ApiError;
use praxis::provider::MessageRole;
use praxis::queue::{PlanGenerationJob, QueueName};
use praxis::store::{NewTask, Status};
use praxis::types::UserId;
use praxis::worker::PLAN_SYSTEM_PROMPT;

#[tokio::test]
async fn test_learn_python_completes_with_one_task() {
    let harness = Harness::new(ScriptedProvider::replying(LEARN_PYTHON_REPLY));
    let plan_id = harness
        .runtime
        .submission()
        .submit_plan(&UserId::from("user-1"), "Learn Python")
        .unwrap();

    harness.drain().await;

    let store = harness.runtime.store();
    let plan = store.require_plan(&plan_id).unwrap();
    assert_eq!(plan.status, Status::Completed);
    assert_eq!(plan.title, "Learn Python");
    assert!(plan.completed_at.is_some());
    assert_eq!(plan.content.as_ref().unwrap()["tasks"][0]["xpValue"], 10);

    let tasks = store.list_tasks(&plan_id).unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].order, 1);
    assert_eq!(tasks[0].xp_value, 10);
    assert_eq!(tasks[0].status, Status::Pending);
    assert_eq!(tasks[0].title, "Install Python");

    let messages = harness.provider.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0][0].role, MessageRole::System);
    assert_eq!(messages[0][0].content, PLAN_SYSTEM_PROMPT);
    assert_eq!(messages[0][1].content, "Learn Python");
}

#[tokio::test]
async fn test_tasks_follow_provider_order() {
    let harness = Harness::new(ScriptedProvider::replying(plan_reply(5)));
    let plan_id = harness
        .runtime
        .submission()
        .submit_plan(&UserId::from("user-1"), "Run a marathon")
        .unwrap();

    harness.drain().await;

    let tasks = harness.runtime.store().list_tasks(&plan_id).unwrap();
    let orders: Vec<u32> = tasks.iter().map(|t| t.order).collect();
    let titles: Vec<&str> = tasks.iter().map(|t| t.title.as_str()).collect();
    assert_eq!(orders, vec![1, 2, 3, 4, 5]);
    assert_eq!(titles, vec!["Step 1", "Step 2", "Step 3", "Step 4", "Step 5"]);
}

#[tokio::test]
async fn test_plain_text_reply_fails_plan_without_tasks() {
    let mut config = fast_config();
    config.queues.plan_generation.max_attempts = 1;
    let harness = Harness::with_config(ScriptedProvider::replying(PLAIN_TEXT_REPLY), config);
    let plan_id = harness
        .runtime
        .submission()
        .submit_plan(&UserId::from("user-1"), "Learn Python")
        .unwrap();

    harness.drain().await;

    let store = harness.runtime.store();
    let plan = store.require_plan(&plan_id).unwrap();
    assert_eq!(plan.status, Status::Failed);
    let error = plan.content.as_ref().unwrap()["error"].as_str().unwrap();
    assert!(!error.is_empty());
    assert!(store.list_tasks(&plan_id).unwrap().is_empty());

    let dead = harness
        .runtime
        .queue()
        .dead_letters(QueueName::PlanGeneration)
        .unwrap();
    assert_eq!(dead.len(), 1);
    assert!(dead[0].last_error.as_ref().unwrap().contains("Malformed"));
}

#[tokio::test]
async fn test_retry_overwrites_error_and_completes() {
    let provider = ScriptedProvider::replying(plan_reply(2)).then(Ok(PLAIN_TEXT_REPLY.to_string()));
    let harness = Harness::new(provider);
    let plan_id = harness
        .runtime
        .submission()
        .submit_plan(&UserId::from("user-1"), "Learn Rust")
        .unwrap();

    harness.drain().await;

    let plan = harness.runtime.store().require_plan(&plan_id).unwrap();
    assert_eq!(plan.status, Status::Completed);
    assert!(plan.content.as_ref().unwrap().get("error").is_none());
    assert_eq!(harness.provider.calls(), 2);
    assert_eq!(harness.runtime.store().list_tasks(&plan_id).unwrap().len(), 2);
    assert_eq!(
        harness
            .runtime
            .pool_stats(QueueName::PlanGeneration)
            .unwrap()
            .retried,
        1
    );
}

#[tokio::test]
async fn test_duplicate_delivery_is_a_noop() {
    let mut config = fast_config();
    config.queues.plan_generation.concurrency = 1;
    let harness = Harness::with_config(ScriptedProvider::replying(plan_reply(3)), config);
    let user = UserId::from("user-1");
    let plan_id = harness
        .runtime
        .submission()
        .submit_plan(&user, "Learn SQL")
        .unwrap();
    harness
        .runtime
        .queue()
        .enqueue(&PlanGenerationJob {
            plan_id: plan_id.clone(),
            prompt: "Learn SQL".to_string(),
            user_id: user,
        })
        .unwrap();

    harness.drain().await;

    assert_eq!(harness.provider.calls(), 1);
    assert_eq!(harness.runtime.store().list_tasks(&plan_id).unwrap().len(), 3);
    let counts = harness
        .runtime
        .queue()
        .counts(QueueName::PlanGeneration)
        .unwrap();
    assert_eq!(counts.completed, 2);
    assert_eq!(counts.dead_lettered, 0);
}

#[tokio::test]
async fn test_rerun_after_partial_attempt_never_duplicates_tasks() {
    let harness = Harness::new(ScriptedProvider::replying(plan_reply(2)));
    let plan_id = harness
        .runtime
        .submission()
        .submit_plan(&UserId::from("user-1"), "Learn Go")
        .unwrap();
    // Leftovers from an earlier attempt that died before completing
    harness
        .runtime
        .store()
        .create_tasks(
            &plan_id,
            (0..4)
                .map(|i| NewTask {
                    title: format!("stale {}", i),
                    description: String::new(),
                    xp_value: 1,
                })
                .collect(),
        )
        .unwrap();

    harness.drain().await;

    let tasks = harness.runtime.store().list_tasks(&plan_id).unwrap();
    assert_eq!(tasks.len(), 2);
    assert!(tasks.iter().all(|t| t.title.starts_with("Step")));
    assert_eq!(tasks.iter().map(|t| t.order).collect::<Vec<_>>(), vec![1, 2]);
}

#[tokio::test]
async fn test_auth_failure_is_dead_lettered_without_retry() {
    let harness = Harness::new(ScriptedProvider::failing(ApiError::ProviderAuthFailed(
        "invalid api key".to_string(),
    )));
    let plan_id = harness
        .runtime
        .submission()
        .submit_plan(&UserId::from("user-1"), "Learn Python")
        .unwrap();

    harness.drain().await;

    assert_eq!(harness.provider.calls(), 1);
    let plan = harness.runtime.store().require_plan(&plan_id).unwrap();
    assert_eq!(plan.status, Status::Failed);
    assert!(plan.content.unwrap()["error"]
        .as_str()
        .unwrap()
        .contains("authentication"));
}

#[tokio::test]
async fn test_transient_failures_back_off_then_dead_letter() {
    let harness = Harness::new(ScriptedProvider::failing(ApiError::ProviderRequestFailed(
        "connection refused".to_string(),
    )));
    harness
        .runtime
        .submission()
        .submit_plan(&UserId::from("user-1"), "Learn Python")
        .unwrap();

    harness.drain().await;

    // Default policy: three attempts
    assert_eq!(harness.provider.calls(), 3);
    let dead = harness
        .runtime
        .queue()
        .dead_letters(QueueName::PlanGeneration)
        .unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].attempts, 3);
}
