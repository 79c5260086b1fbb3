use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type TaskId = String;

/// Label used when a task carries no service name.
pub const UNNAMED_TASK: &str = "Task";

pub const CANCELLED_MESSAGE: &str = "Cancelled by user";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    #[serde(default, alias = "user_id")]
    pub user_id: Option<String>,
    #[serde(default, alias = "service_name")]
    pub service_name: Option<String>,
    pub status: TaskStatus,
    #[serde(default, alias = "created_at")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "started_at")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "finished_at")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "error_message")]
    pub error_message: Option<String>,
    #[serde(default, alias = "input_image")]
    pub input_image: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queue,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queue => "queue",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    /// Queued or processing.
    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::Queue | TaskStatus::Processing)
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queue" => Some(TaskStatus::Queue),
            "processing" => Some(TaskStatus::Processing),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Task {
    pub fn new(id: impl Into<TaskId>, status: TaskStatus) -> Self {
        Self {
            id: id.into(),
            user_id: None,
            service_name: None,
            status,
            created_at: None,
            started_at: None,
            finished_at: None,
            error_message: None,
            input_image: None,
        }
    }

    pub fn display_name(&self) -> &str {
        self.service_name.as_deref().unwrap_or(UNNAMED_TASK)
    }

    /// Seconds between `startedAt` and `finishedAt`, when both are known.
    pub fn processing_secs(&self) -> Option<f64> {
        match (self.started_at, self.finished_at) {
            (Some(started), Some(finished)) => {
                Some((finished - started).num_milliseconds() as f64 / 1000.0)
            }
            _ => None,
        }
    }

    /// True when two revisions of the same task differ in status,
    /// timestamps or error text. Other fields never change server-side.
    pub fn differs_from(&self, other: &Task) -> bool {
        self.status != other.status
            || self.created_at != other.created_at
            || self.started_at != other.started_at
            || self.finished_at != other.finished_at
            || self.error_message != other.error_message
    }
}

/// Body of `PUT /tasks`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPatch {
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl StatusPatch {
    pub fn requeue() -> Self {
        Self { status: TaskStatus::Queue, error_message: None }
    }

    pub fn cancel() -> Self {
        Self {
            status: TaskStatus::Failed,
            error_message: Some(CANCELLED_MESSAGE.to_string()),
        }
    }
}
