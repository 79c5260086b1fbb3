use std::sync::Arc;

use log::{info, warn};

use crate::error::{Result, SyncError, TaskAction};
use crate::models::task::StatusPatch;

/// Write side of the persistence collaborator.
pub trait TaskActions: Send + Sync {
    fn update_status(&self, user_id: &str, task_id: &str, patch: &StatusPatch) -> Result<()>;
    fn delete_task(&self, user_id: &str, task_id: &str) -> Result<()>;
}

/// Issues retry, cancel and delete requests for one user.
///
/// The local store is never touched here: the resulting row change comes
/// back through whichever transport is live. Cancel only marks the task
/// failed, work already running in the pipeline is not interrupted.
#[derive(Clone)]
pub struct TaskActionGateway {
    backend: Arc<dyn TaskActions>,
    user_id: String,
}

impl TaskActionGateway {
    pub fn new(backend: Arc<dyn TaskActions>, user_id: impl Into<String>) -> Self {
        Self {
            backend,
            user_id: user_id.into(),
        }
    }

    pub fn retry(&self, task_id: &str) -> Result<()> {
        self.run(TaskAction::Retry, task_id)
    }

    pub fn cancel(&self, task_id: &str) -> Result<()> {
        self.run(TaskAction::Cancel, task_id)
    }

    pub fn delete(&self, task_id: &str) -> Result<()> {
        self.run(TaskAction::Delete, task_id)
    }

    pub fn run(&self, action: TaskAction, task_id: &str) -> Result<()> {
        let result = match action {
            TaskAction::Retry => self.backend.update_status(&self.user_id, task_id, &StatusPatch::requeue()),
            TaskAction::Cancel => self.backend.update_status(&self.user_id, task_id, &StatusPatch::cancel()),
            TaskAction::Delete => self.backend.delete_task(&self.user_id, task_id),
        };
        match result {
            Ok(()) => {
                info!("Sent {action} for task '{task_id}'.");
                Ok(())
            }
            Err(err) => {
                warn!("{action} of task '{task_id}' failed: {err}");
                Err(SyncError::Action {
                    action,
                    reason: reason(err).unwrap_or_else(|| action.default_failure().to_string()),
                })
            }
        }
    }
}

fn reason(err: SyncError) -> Option<String> {
    let text = match err {
        SyncError::Transport(text)
        | SyncError::Decode(text)
        | SyncError::Subscription(text)
        | SyncError::Config(text) => text,
        SyncError::Action { reason, .. } => reason,
    };
    Some(text).filter(|t| !t.is_empty())
}
