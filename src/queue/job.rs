//! Queue names, job records and typed payloads.

use crate::error::ApiError;
use crate::types::{JobId, PlanId, TaskId, UserId};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The three named queues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueName {
    PlanGeneration,
    XpRecalculation,
    TaskRegeneration,
}

impl QueueName {
    pub const ALL: [QueueName; 3] = [
        QueueName::PlanGeneration,
        QueueName::XpRecalculation,
        QueueName::TaskRegeneration,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            QueueName::PlanGeneration => "plan-generation",
            QueueName::XpRecalculation => "xp-recalculation",
            QueueName::TaskRegeneration => "task-regeneration",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QueueName {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueueName::ALL
            .into_iter()
            .find(|queue| queue.as_str() == s)
            .ok_or_else(|| ApiError::Validation(format!("Unknown queue: {}", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    DeadLettered,
}

/// A job as stored by the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub queue: QueueName,
    pub payload: Value,
    /// Attempts started so far
    pub attempts: u32,
    pub state: JobState,
    pub enqueued_at: DateTime<Utc>,
    /// Not claimable before this instant (Unix epoch milliseconds)
    pub available_at_ms: i64,
    pub last_error: Option<String>,
    pub result: Option<Value>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Decode the payload; a payload of the wrong shape can never succeed
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            ApiError::Validation(format!(
                "Invalid {} payload for job {}: {}",
                self.queue, self.id, e
            ))
        })
    }

    /// Lease owner identity for entity leases taken while running this job
    pub fn owner(&self) -> String {
        format!("job:{}:{}", self.queue, self.id)
    }
}

/// Typed payload bound to its queue
pub trait JobPayload: Serialize + DeserializeOwned + Send + Sync {
    const QUEUE: QueueName;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanGenerationJob {
    pub plan_id: PlanId,
    pub prompt: String,
    pub user_id: UserId,
}

impl JobPayload for PlanGenerationJob {
    const QUEUE: QueueName = QueueName::PlanGeneration;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XpRecalculationJob {
    pub user_id: UserId,
}

impl JobPayload for XpRecalculationJob {
    const QUEUE: QueueName = QueueName::XpRecalculation;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRegenerationJob {
    pub task_id: TaskId,
    pub context: String,
}

impl JobPayload for TaskRegenerationJob {
    const QUEUE: QueueName = QueueName::TaskRegeneration;
}
