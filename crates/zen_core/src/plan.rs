//! Contract for the AI day planner.
//!
//! A plan request is a free-text brain dump plus the titles of the tasks the
//! user already has. The provider is asked for a fixed JSON shape and the
//! reply is either parsed in full or rejected; no partial plan is ever
//! returned.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleItem {
    pub time: String,
    pub activity: String,
    pub category: String,
    pub duration: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlanResponse {
    pub summary: String,
    pub recommended_schedule: Vec<ScheduleItem>,
    pub motivational_quote: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PlanRequest {
    pub brain_dump: String,
    /// Existing task titles, comma separated.
    pub existing_tasks: String,
}

impl PlanRequest {
    pub fn new<S: AsRef<str>>(brain_dump: impl Into<String>, task_titles: &[S]) -> Self {
        let existing_tasks = task_titles
            .iter()
            .map(|title| title.as_ref())
            .collect::<Vec<_>>()
            .join(", ");
        Self {
            brain_dump: brain_dump.into(),
            existing_tasks,
        }
    }

    /// Nothing to plan: no thoughts and no existing tasks.
    pub fn is_empty(&self) -> bool {
        self.brain_dump.trim().is_empty() && self.existing_tasks.trim().is_empty()
    }
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("no API credential configured")]
    MissingCredential,

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("provider returned no content")]
    EmptyResponse,

    #[error("malformed plan: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("a plan request is already in flight")]
    Busy,

    #[error("nothing to plan")]
    EmptyRequest,
}

/// External generator of day plans.
#[async_trait]
pub trait PlanClient: Send + Sync {
    async fn request_plan(&self, request: &PlanRequest) -> Result<PlanResponse, PlanError>;
}

pub fn build_prompt(request: &PlanRequest) -> String {
    format!(
        "Help me plan my day.\n\
         Context:\n\
         My current tasks: {}\n\
         My raw thoughts for today: {}\n\n\
         Create a structured schedule that balances deep work and rest.",
        request.existing_tasks, request.brain_dump
    )
}

/// Response schema handed to the provider for constrained generation.
pub fn response_schema() -> serde_json::Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "summary": { "type": "STRING" },
            "recommendedSchedule": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "time": { "type": "STRING" },
                        "activity": { "type": "STRING" },
                        "category": { "type": "STRING" },
                        "duration": { "type": "STRING" }
                    },
                    "required": ["time", "activity", "category", "duration"]
                }
            },
            "motivationalQuote": { "type": "STRING" }
        },
        "required": ["summary", "recommendedSchedule", "motivationalQuote"]
    })
}

pub fn parse_plan(text: &str) -> Result<PlanResponse, PlanError> {
    if text.trim().is_empty() {
        return Err(PlanError::EmptyResponse);
    }
    Ok(serde_json::from_str(text)?)
}
