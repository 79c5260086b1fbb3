use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::task::{Task, TaskId};
use crate::error::{Result, SyncError, TaskAction};

/// Identity of a removed row. Change feeds often only carry the key.
#[derive(Debug, Clone, PartialEq)]
pub struct RemovedTask {
    pub id: TaskId,
    pub service_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskDelta {
    Insert(Task),
    Update(Task),
    Delete(RemovedTask),
}

impl TaskDelta {
    pub fn task_id(&self) -> &str {
        match self {
            TaskDelta::Insert(task) | TaskDelta::Update(task) => &task.id,
            TaskDelta::Delete(removed) => &removed.id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Row-level change as delivered on a `user_tasks_<userId>` channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub event_type: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
}

#[derive(Deserialize)]
struct RowKey {
    id: TaskId,
    #[serde(default, alias = "service_name", rename = "serviceName")]
    service_name: Option<String>,
}

impl ChangeEvent {
    pub fn insert(task: &Task) -> Result<Self> {
        Ok(Self {
            event_type: ChangeKind::Insert,
            new: Some(serde_json::to_value(task)?),
            old: None,
        })
    }

    pub fn update(task: &Task) -> Result<Self> {
        Ok(Self {
            event_type: ChangeKind::Update,
            new: Some(serde_json::to_value(task)?),
            old: None,
        })
    }

    pub fn delete(id: &str) -> Self {
        Self {
            event_type: ChangeKind::Delete,
            new: None,
            old: Some(serde_json::json!({ "id": id })),
        }
    }

    pub fn into_delta(self) -> Result<TaskDelta> {
        match self.event_type {
            ChangeKind::Insert => Ok(TaskDelta::Insert(row(self.new, "new")?)),
            ChangeKind::Update => Ok(TaskDelta::Update(row(self.new, "new")?)),
            ChangeKind::Delete => {
                let key: RowKey = row(self.old, "old")?;
                Ok(TaskDelta::Delete(RemovedTask {
                    id: key.id,
                    service_name: key.service_name,
                }))
            }
        }
    }
}

fn row<T: serde::de::DeserializeOwned>(value: Option<Value>, side: &str) -> Result<T> {
    let value = value.ok_or_else(|| SyncError::Decode(format!("change event without `{side}` row")))?;
    Ok(serde_json::from_value(value)?)
}

/// Which push transport produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Realtime,
    Fallback,
}

#[derive(Debug, Clone)]
pub enum TransportEvent {
    Subscribed,
    Snapshot(Vec<Task>),
    Delta(TaskDelta),
    Failed(SyncError),
}

/// Everything the sync loop reacts to.
#[derive(Debug)]
pub enum SyncMessage {
    Action(TaskAction, TaskId),
    ActionDone(TaskAction, TaskId, Result<()>),
    Transport {
        source: Source,
        conn: u64,
        event: TransportEvent,
    },
    SnapshotFetched(Result<Vec<Task>>),
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::task::TaskStatus;
    use serde_json::json;

    #[test]
    fn update_event_becomes_update_delta() {
        let event: ChangeEvent = serde_json::from_value(json!({
            "eventType": "UPDATE",
            "new": {"id": "t1", "status": "completed", "service_name": "scan"},
            "old": {"id": "t1"}
        }))
        .unwrap();
        match event.into_delta().unwrap() {
            TaskDelta::Update(task) => {
                assert_eq!(task.id, "t1");
                assert_eq!(task.status, TaskStatus::Completed);
            }
            other => panic!("unexpected delta {other:?}"),
        }
    }

    #[test]
    fn delete_event_only_needs_the_key() {
        let event: ChangeEvent = serde_json::from_value(json!({
            "eventType": "DELETE",
            "new": {},
            "old": {"id": "t9"}
        }))
        .unwrap();
        assert_eq!(
            event.into_delta().unwrap(),
            TaskDelta::Delete(RemovedTask { id: "t9".into(), service_name: None })
        );
    }

    #[test]
    fn insert_without_row_is_a_decode_error() {
        let event = ChangeEvent { event_type: ChangeKind::Insert, new: None, old: None };
        assert!(matches!(event.into_delta(), Err(SyncError::Decode(_))));
    }
}
