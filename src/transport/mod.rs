//! Network-facing halves of the sync subsystem.
//!
//! Both push transports report through [`DeltaHandler`], so the event loop
//! does not care which one produced a change.

pub mod change_feed;
pub mod fallback;
pub mod http;
pub mod snapshot;

use crate::error::SyncError;
use crate::models::message::{RemovedTask, TaskDelta};
use crate::models::task::Task;

pub trait DeltaHandler: Send + Sync + 'static {
    fn on_subscribed(&self) {}
    /// First full list received on a fresh connection.
    fn on_snapshot(&self, _tasks: Vec<Task>) {}
    fn on_insert(&self, task: Task);
    fn on_update(&self, task: Task);
    fn on_delete(&self, removed: RemovedTask);
    /// Called at most once per connection; nothing follows it.
    fn on_error(&self, err: SyncError);
}

pub(crate) fn dispatch(handler: &dyn DeltaHandler, delta: TaskDelta) {
    match delta {
        TaskDelta::Insert(task) => handler.on_insert(task),
        TaskDelta::Update(task) => handler.on_update(task),
        TaskDelta::Delete(removed) => handler.on_delete(removed),
    }
}
