//! Plan Store
//!
//! Durable records for Plans, their ordered Tasks, per-user XP totals and the
//! short-lived entity leases that serialize workers touching the same record.
//! Every Plan/Task mutation is a compare-and-swap on the record's `version`.

pub mod persistence;

pub use persistence::SledPlanStore;

use crate::error::StorageError;
use crate::types::{PlanId, TaskId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Lifecycle status shared by Plans and Tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "PENDING",
            Status::Processing => "PROCESSING",
            Status::Completed => "COMPLETED",
            Status::Failed => "FAILED",
        }
    }

    /// Plan status rules: forward only, COMPLETED terminal, FAILED re-entered
    /// only through a retry (FAILED -> PROCESSING).
    pub fn plan_transition_allowed(self, to: Status) -> bool {
        use Status::*;
        if self == to {
            return true;
        }
        matches!(
            (self, to),
            (Pending, Processing)
                | (Pending, Failed)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Failed, Processing)
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Status::Pending),
            "PROCESSING" => Ok(Status::Processing),
            "COMPLETED" => Ok(Status::Completed),
            "FAILED" => Ok(Status::Failed),
            other => Err(format!("Unknown status: {}", other)),
        }
    }
}

/// A generated plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    pub user_id: UserId,
    pub title: String,
    pub description: String,
    /// Parsed provider output on success, `{"error": ...}` on failure
    pub content: Option<Value>,
    pub status: Status,
    pub xp_earned: u64,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// One ordered step of a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub plan_id: PlanId,
    pub title: String,
    pub description: String,
    pub content: Option<Value>,
    pub status: Status,
    /// 1-based position within the plan
    pub order: u32,
    pub xp_value: u32,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewPlan {
    pub user_id: UserId,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub xp_value: u32,
}

/// Partial plan update; `None` leaves a field untouched
#[derive(Debug, Clone, Default)]
pub struct PlanUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub content: Option<Value>,
    pub status: Option<Status>,
    pub xp_earned: Option<u64>,
}

impl PlanUpdate {
    pub fn status(status: Status) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn failed(message: &str) -> Self {
        Self {
            status: Some(Status::Failed),
            content: Some(serde_json::json!({ "error": message })),
            ..Self::default()
        }
    }
}

/// Partial task update; `None` leaves a field untouched
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub content: Option<Value>,
    pub status: Option<Status>,
}

impl TaskUpdate {
    pub fn status(status: Status) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

/// Everything written when plan generation succeeds
#[derive(Debug, Clone)]
pub struct PlanCompletion {
    pub title: String,
    pub description: String,
    pub content: Value,
    pub tasks: Vec<NewTask>,
}

/// Recomputed experience total for a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserXp {
    pub user_id: UserId,
    pub total_xp: u64,
    pub recalculated_at: DateTime<Utc>,
    /// Bumped on every write; 0 means no record yet
    pub version: u64,
}

/// Exclusive, expiring claim on an entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub key: String,
    pub owner: String,
    /// Unix epoch milliseconds
    pub expires_at_ms: i64,
}

impl Lease {
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.expires_at_ms <= now_ms
    }
}

pub fn plan_lease_key(id: &PlanId) -> String {
    format!("plan:{}", id)
}

pub fn task_lease_key(id: &TaskId) -> String {
    format!("task:{}", id)
}

/// Persistence interface consumed by the submission service and the workers
pub trait PlanStore: Send + Sync {
    fn create_plan(&self, plan: NewPlan) -> Result<Plan, StorageError>;

    fn get_plan(&self, id: &PlanId) -> Result<Option<Plan>, StorageError>;

    /// Apply `update` if the stored version still equals `expected_version`
    fn update_plan(
        &self,
        id: &PlanId,
        expected_version: u64,
        update: PlanUpdate,
    ) -> Result<Plan, StorageError>;

    /// Newest first
    fn list_plans_for_user(&self, user_id: &UserId) -> Result<Vec<Plan>, StorageError>;

    /// Append tasks after the plan's current highest order
    fn create_tasks(&self, plan_id: &PlanId, tasks: Vec<NewTask>)
        -> Result<Vec<Task>, StorageError>;

    /// Atomically write the generated plan fields, replace the plan's task set and
    /// transition the plan to COMPLETED
    fn complete_plan_generation(
        &self,
        id: &PlanId,
        expected_version: u64,
        completion: PlanCompletion,
    ) -> Result<(Plan, Vec<Task>), StorageError>;

    fn get_task(&self, id: &TaskId) -> Result<Option<Task>, StorageError>;

    fn update_task(
        &self,
        id: &TaskId,
        expected_version: u64,
        update: TaskUpdate,
    ) -> Result<Task, StorageError>;

    /// Ordered by `order`
    fn list_tasks(&self, plan_id: &PlanId) -> Result<Vec<Task>, StorageError>;

    fn get_user_xp(&self, user_id: &UserId) -> Result<Option<UserXp>, StorageError>;

    /// Store `total_xp` if the record's version still equals `expected_version`
    /// (0 when the user has no record yet)
    fn put_user_xp(
        &self,
        user_id: &UserId,
        expected_version: u64,
        total_xp: u64,
    ) -> Result<UserXp, StorageError>;

    /// Take or renew the lease on `key`; fails with `LeaseHeld` while another
    /// owner's lease is unexpired
    fn acquire_lease(&self, key: &str, owner: &str, ttl: Duration)
        -> Result<Lease, StorageError>;

    /// Release the lease if `owner` still holds it; returns whether it was removed
    fn release_lease(&self, key: &str, owner: &str) -> Result<bool, StorageError>;

    fn require_plan(&self, id: &PlanId) -> Result<Plan, StorageError> {
        self.get_plan(id)?
            .ok_or_else(|| StorageError::PlanNotFound(id.clone()))
    }

    fn require_task(&self, id: &TaskId) -> Result<Task, StorageError> {
        self.get_task(id)?
            .ok_or_else(|| StorageError::TaskNotFound(id.clone()))
    }
}
