use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskAction {
    Retry,
    Cancel,
    Delete,
}

impl TaskAction {
    pub fn default_failure(&self) -> &'static str {
        match self {
            TaskAction::Retry => "Failed to retry task",
            TaskAction::Cancel => "Failed to cancel task",
            TaskAction::Delete => "Failed to delete task",
        }
    }

    pub fn success_message(&self) -> &'static str {
        match self {
            TaskAction::Retry => "Task queued for retry.",
            TaskAction::Cancel => "Task cancelled.",
            TaskAction::Delete => "Task deleted.",
        }
    }
}

impl fmt::Display for TaskAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TaskAction::Retry => "retry",
            TaskAction::Cancel => "cancel",
            TaskAction::Delete => "delete",
        })
    }
}

#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("subscription error: {0}")]
    Subscription(String),
    #[error("{action} failed: {reason}")]
    Action { action: TaskAction, reason: String },
    #[error("config error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SyncError::Decode(err.to_string())
        } else {
            SyncError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Decode(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Transport(err.to_string())
    }
}
