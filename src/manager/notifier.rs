use std::collections::HashMap;

use log::debug;

use crate::models::message::RemovedTask;
use crate::models::notification::{Notification, NotificationSink};
use crate::models::task::{Task, TaskId, TaskStatus, UNNAMED_TASK};

const RESULTS_PATH: &str = "/dashboard/library";

/// Turns observed status transitions into user-facing notifications.
///
/// Nothing fires until a baseline snapshot has been seen. After that each
/// status a task moves into is announced once, however many transports
/// report it.
pub struct NotificationEmitter {
    sink: Box<dyn NotificationSink>,
    last_status: HashMap<TaskId, TaskStatus>,
    baseline: bool,
}

impl NotificationEmitter {
    pub fn new(sink: Box<dyn NotificationSink>) -> Self {
        Self {
            sink,
            last_status: HashMap::new(),
            baseline: false,
        }
    }

    pub fn has_baseline(&self) -> bool {
        self.baseline
    }

    /// Records the statuses of a full snapshot without announcing them.
    pub fn establish_baseline(&mut self, tasks: &[Task]) {
        self.last_status = tasks.iter().map(|t| (t.id.clone(), t.status)).collect();
        self.baseline = true;
    }

    /// Notes a task seen for the first time (insert).
    pub fn observe(&mut self, task: &Task) {
        self.last_status.insert(task.id.clone(), task.status);
    }

    /// Returns true when a notification went out.
    pub fn on_transition(&mut self, previous: &Task, updated: &Task) -> bool {
        let already_seen = self.last_status.insert(updated.id.clone(), updated.status);
        if !self.baseline || previous.status == updated.status {
            return false;
        }
        if already_seen == Some(updated.status) {
            debug!("Transition of task '{}' to {} already announced.", updated.id, updated.status);
            return false;
        }
        match transition_notification(updated) {
            Some(notification) => {
                self.sink.notify(notification);
                true
            }
            None => false,
        }
    }

    pub fn on_delete(&mut self, removed: &RemovedTask, last_known: Option<&Task>) -> bool {
        let was_tracked = self.last_status.remove(&removed.id).is_some();
        if !self.baseline || (!was_tracked && last_known.is_none()) {
            return false;
        }
        let name = last_known
            .and_then(|t| t.service_name.as_deref())
            .or(removed.service_name.as_deref())
            .unwrap_or(UNNAMED_TASK);
        self.sink.notify(Notification::info(format!("Task removed: {name}")));
        true
    }

    pub fn notify(&self, notification: Notification) {
        self.sink.notify(notification);
    }
}

/// Policy for a task that just entered `updated.status`.
pub fn transition_notification(updated: &Task) -> Option<Notification> {
    let name = updated.display_name();
    match updated.status {
        TaskStatus::Queue => None,
        TaskStatus::Processing => Some(Notification::info(format!("Processing started: {name}"))),
        TaskStatus::Completed => {
            let mut notification = Notification::success(format!("Processing completed: {name}"))
                .with_action("View Results", format!("{RESULTS_PATH}/{}", updated.id));
            if let Some(secs) = updated.processing_secs().filter(|s| *s > 0.0) {
                notification = notification.with_description(format!("Processed in {secs}s"));
            }
            Some(notification)
        }
        TaskStatus::Failed => Some(
            Notification::error(format!("Processing failed: {name}")).with_description(
                updated
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "Unknown error occurred".to_string()),
            ),
        ),
    }
}
