//! Identifier types shared across the pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Plan identifier (UUID v4 text)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanId(String);

impl PlanId {
    pub fn generate() -> Self {
        PlanId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Task identifier
///
/// Derived from the owning plan and the task's position, so re-creating the
/// task set of a plan addresses the same keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn derive(plan_id: &PlanId, order: u32) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(plan_id.as_str().as_bytes());
        hasher.update(b":");
        hasher.update(&order.to_be_bytes());
        let digest = hasher.finalize();
        TaskId(hex::encode(&digest.as_bytes()[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Owning user reference (issued by the external identity collaborator)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Queue-assigned job identifier (monotonic per database)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(u64);

impl JobId {
    pub fn new(raw: u64) -> Self {
        JobId(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn to_key(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

macro_rules! string_id_conversions {
    ($($ty:ident),*) => {
        $(
            impl From<&str> for $ty {
                fn from(value: &str) -> Self {
                    $ty(value.to_string())
                }
            }

            impl From<String> for $ty {
                fn from(value: String) -> Self {
                    $ty(value)
                }
            }

            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(&self.0)
                }
            }
        )*
    };
}

string_id_conversions!(PlanId, TaskId, UserId);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
