//! Configuration files and the CLI run context built from them

use praxis::cli::{Commands, PlanCommands, QueueCommands, RunContext};
use praxis::config::{BackoffKind, ConfigLoader, ProviderType};
use praxis::error::ApiError;
use praxis::queue::QueueName;
use std::path::Path;
use tempfile::TempDir;

fn write_config(dir: &Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("praxis.toml");
    std::fs::write(&path, body).unwrap();
    path
}

#[test]
fn test_file_overrides_queue_and_provider_settings() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        dir.path(),
        r#"
[provider]
provider_type = "local"
model = "qwen2"
endpoint = "http://localhost:8080/v1"
request_timeout_secs = 30

[queues.plan_generation]
concurrency = 4
max_attempts = 5

[queues.plan_generation.backoff]
strategy = "fixed"
delay_ms = 250
"#,
    );

    let config = ConfigLoader::load_from_file(&path).unwrap();
    assert!(config.validate().is_ok());
    assert_eq!(config.provider.provider_type, ProviderType::LocalCustom);
    assert_eq!(config.provider.request_timeout_secs, 30);

    let plan = config.queue(QueueName::PlanGeneration);
    assert_eq!(plan.concurrency, 4);
    assert_eq!(plan.max_attempts, 5);
    assert_eq!(plan.backoff.strategy, BackoffKind::Fixed);
    assert_eq!(plan.backoff.delay_ms, 250);

    // Untouched queues keep their defaults
    assert_eq!(config.queue(QueueName::XpRecalculation).concurrency, 5);
    assert_eq!(config.queue(QueueName::TaskRegeneration).concurrency, 3);
}

#[test]
fn test_invalid_settings_are_reported_together() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        dir.path(),
        r#"
[provider]
provider_type = "local"
model = "qwen2"

[queues.xp_recalculation]
concurrency = 0
"#,
    );

    let err = ConfigLoader::load_validated(dir.path(), Some(&path)).unwrap_err();
    let message = match err {
        ApiError::ConfigError(message) => message,
        other => panic!("unexpected error: {:?}", other),
    };
    assert!(message.contains("endpoint"));
    assert!(message.contains("xp-recalculation"));
}

#[tokio::test]
async fn test_run_context_serves_cli_commands() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("db");
    let path = write_config(
        dir.path(),
        &format!(
            r#"
[provider]
provider_type = "ollama"
model = "mistral"

[storage]
path = "{}"
"#,
            db_path.display().to_string().replace('\\', "\\\\")
        ),
    );

    let context = RunContext::new(dir.path().to_path_buf(), Some(path)).unwrap();
    let submitted = context
        .execute(&Commands::Submit {
            user: "user-1".to_string(),
            prompt: "Learn Python".to_string(),
            wait: false,
            format: "json".to_string(),
        })
        .await
        .unwrap();
    let plan_id = serde_json::from_str::<serde_json::Value>(&submitted).unwrap()["planId"]
        .as_str()
        .unwrap()
        .to_string();

    let shown = context
        .execute(&Commands::Plan {
            command: PlanCommands::Show {
                plan_id: plan_id.clone(),
                format: "json".to_string(),
            },
        })
        .await
        .unwrap();
    let shown: serde_json::Value = serde_json::from_str(&shown).unwrap();
    assert_eq!(shown["plan"]["status"], "PENDING");
    assert_eq!(shown["plan"]["title"], "Generating...");

    let stats = context
        .execute(&Commands::Queue {
            command: QueueCommands::Stats {
                format: "json".to_string(),
            },
        })
        .await
        .unwrap();
    let stats: serde_json::Value = serde_json::from_str(&stats).unwrap();
    assert_eq!(stats["queues"][0]["queue"], "plan-generation");
    assert_eq!(stats["queues"][0]["counts"]["waiting"], 1);

    let missing = context
        .execute(&Commands::Plan {
            command: PlanCommands::Show {
                plan_id: "does-not-exist".to_string(),
                format: "text".to_string(),
            },
        })
        .await
        .unwrap_err();
    assert_eq!(missing.status_code(), 404);
}
