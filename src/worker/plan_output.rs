//! Strict parsing of provider plan output.
//!
//! The reply must be exactly one JSON object of the shape
//! `{title, description, tasks: [{title, description, xpValue}]}`. No fence
//! stripping or repair is attempted.

use crate::error::ApiError;
use crate::store::{NewTask, PlanCompletion};
use serde::{Deserialize, Serialize};

pub const PLAN_SYSTEM_PROMPT: &str = "You are a helpful AI assistant that generates structured plans.
Create a detailed plan with tasks based on the user's request.
Respond ONLY with valid JSON in this format:
{
  \"title\": \"Plan Title\",
  \"description\": \"Brief description\",
  \"tasks\": [
    { \"title\": \"Task 1\", \"description\": \"Task description\", \"xpValue\": 10 }
  ]
}";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanOutput {
    pub title: String,
    pub description: String,
    pub tasks: Vec<PlanTaskOutput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanTaskOutput {
    pub title: String,
    pub description: String,
    pub xp_value: u32,
}

impl PlanOutput {
    pub fn parse(raw: &str) -> Result<Self, ApiError> {
        let output: PlanOutput = serde_json::from_str(raw).map_err(|e| {
            ApiError::MalformedOutput(format!("Failed to parse AI response as PlanOutput: {}", e))
        })?;
        if let Some(position) = output.tasks.iter().position(|task| task.xp_value == 0) {
            return Err(ApiError::MalformedOutput(format!(
                "Task {} has a non-positive xpValue",
                position + 1
            )));
        }
        Ok(output)
    }

    /// Parsed object kept as the plan's content, tasks in provider order
    pub fn into_completion(self) -> Result<PlanCompletion, ApiError> {
        let content = serde_json::to_value(&self)
            .map_err(|e| ApiError::MalformedOutput(format!("Unencodable plan output: {}", e)))?;
        Ok(PlanCompletion {
            title: self.title,
            description: self.description,
            content,
            tasks: self
                .tasks
                .into_iter()
                .map(|task| NewTask {
                    title: task.title,
                    description: task.description,
                    xp_value: task.xp_value,
                })
                .collect(),
        })
    }
}
