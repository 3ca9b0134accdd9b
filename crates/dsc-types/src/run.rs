use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::RunStatus;
use crate::error::{DiscoveryError, Result};

/// An artifact produced by a run and exported to object storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFile {
    pub path: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

/// One entry of a run's append-only error log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunError {
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Durable record of a single task invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    /// Container image the run executes.
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub parameters: serde_json::Value,
    #[serde(default)]
    pub status: RunStatus,
    #[serde(default)]
    pub result: serde_json::Value,
    #[serde(default)]
    pub files: Vec<RunFile>,
    #[serde(default)]
    pub errors: Vec<RunError>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Run {
    /// A fresh `PENDING` record. `owner_id` and `parent_id` are lifted out of
    /// `parameters` when present.
    pub fn new(id: &str, name: &str, parameters: serde_json::Value) -> Self {
        let owner_id = string_field(&parameters, "owner_id");
        let parent_id = string_field(&parameters, "parent_id");
        let now = Utc::now();
        Self {
            id: id.to_string(),
            name: name.to_string(),
            parent_id,
            owner_id,
            parameters,
            status: RunStatus::Pending,
            result: serde_json::Value::Object(Default::default()),
            files: Vec::new(),
            errors: Vec::new(),
            started_at: None,
            failed_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `RUNNING`. Returns the previous status.
    pub fn mark_running(&mut self, at: DateTime<Utc>) -> Result<RunStatus> {
        let prev = self.transition(RunStatus::Running)?;
        self.started_at = Some(at);
        Ok(prev)
    }

    /// Move to `SUCCESS`, writing result and files once. Returns the previous status.
    pub fn mark_succeeded(
        &mut self,
        result: serde_json::Value,
        files: Vec<RunFile>,
        at: DateTime<Utc>,
    ) -> Result<RunStatus> {
        let prev = self.transition(RunStatus::Success)?;
        self.result = result;
        self.files = files;
        self.completed_at = Some(at);
        Ok(prev)
    }

    /// Append a failure and move to `FAILED` when the state machine allows it.
    ///
    /// Returns the previous status if a transition happened, `None` when the
    /// record was already terminal and only the error log grew.
    pub fn mark_failed(&mut self, message: &str, at: DateTime<Utc>) -> Option<RunStatus> {
        self.errors.push(RunError {
            message: message.to_string(),
            timestamp: at,
        });
        let prev = self.transition(RunStatus::Failed).ok()?;
        self.failed_at = Some(at);
        Some(prev)
    }

    fn transition(&mut self, next: RunStatus) -> Result<RunStatus> {
        if !self.status.can_transition_to(next) {
            return Err(DiscoveryError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        let prev = self.status;
        self.status = next;
        Ok(prev)
    }
}

/// Criteria for listing runs. `None` fields are not filtered on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunFilter {
    #[serde(default)]
    pub status: Option<RunStatus>,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
}

fn string_field(value: &serde_json::Value, key: &str) -> Option<String> {
    value.get(key).and_then(|v| v.as_str()).map(str::to_string)
}
