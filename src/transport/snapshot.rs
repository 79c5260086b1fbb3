use crate::error::Result;
use crate::models::task::Task;

/// Full task list for one user, newest first. Idempotent; safe to call as
/// often as the resync interval demands.
pub trait SnapshotFetcher: Send + Sync {
    fn fetch_all(&self, user_id: &str) -> Result<Vec<Task>>;
}
