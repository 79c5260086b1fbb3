use crate::models::message::TaskDelta;
use crate::models::task::{Task, TaskStatus};

/// Ordered task list for one user. Ids are unique; updates keep position,
/// inserts append.
#[derive(Debug, Default, Clone)]
pub struct TaskStore {
    tasks: Vec<Task>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TaskStats {
    pub total: usize,
    pub queue: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub active: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusTab {
    #[default]
    All,
    Active,
    Completed,
    Failed,
}

impl StatusTab {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "all" => Some(StatusTab::All),
            "active" => Some(StatusTab::Active),
            "completed" => Some(StatusTab::Completed),
            "failed" => Some(StatusTab::Failed),
            _ => None,
        }
    }

    fn admits(&self, status: TaskStatus) -> bool {
        match self {
            StatusTab::All => true,
            StatusTab::Active => status.is_active(),
            StatusTab::Completed => status == TaskStatus::Completed,
            StatusTab::Failed => status == TaskStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub tab: StatusTab,
    pub status: Option<TaskStatus>,
    pub search: String,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        let needle = self.search.to_lowercase();
        let name_matches = needle.is_empty()
            || task
                .service_name
                .as_deref()
                .unwrap_or_default()
                .to_lowercase()
                .contains(&needle);
        name_matches
            && self.status.map_or(true, |s| s == task.status)
            && self.tab.admits(task.status)
    }
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_all(&self) -> &[Task] {
        &self.tasks
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Appends, or replaces in place when the id is already known.
    pub fn apply_insert(&mut self, task: Task) {
        match self.position(&task.id) {
            Some(idx) => self.tasks[idx] = task,
            None => self.tasks.push(task),
        }
    }

    /// Replaces in place. Unknown ids are ignored: a late update may race
    /// with the delete that removed the row.
    pub fn apply_update(&mut self, task: Task) -> bool {
        match self.position(&task.id) {
            Some(idx) => {
                self.tasks[idx] = task;
                true
            }
            None => false,
        }
    }

    pub fn apply_delete(&mut self, id: &str) -> Option<Task> {
        self.position(id).map(|idx| self.tasks.remove(idx))
    }

    pub fn apply(&mut self, delta: TaskDelta) {
        match delta {
            TaskDelta::Insert(task) => self.apply_insert(task),
            TaskDelta::Update(task) => {
                self.apply_update(task);
            }
            TaskDelta::Delete(removed) => {
                self.apply_delete(&removed.id);
            }
        }
    }

    /// Full resync. Later duplicates of an id win but keep the first slot.
    pub fn replace_all(&mut self, tasks: Vec<Task>) {
        self.tasks.clear();
        for task in tasks {
            self.apply_insert(task);
        }
    }

    pub fn stats(&self) -> TaskStats {
        let mut stats = TaskStats {
            total: self.tasks.len(),
            ..TaskStats::default()
        };
        for task in &self.tasks {
            match task.status {
                TaskStatus::Queue => stats.queue += 1,
                TaskStatus::Processing => stats.processing += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
            }
        }
        stats.active = stats.queue + stats.processing;
        stats
    }

    pub fn filtered(&self, filter: &TaskFilter) -> Vec<Task> {
        self.tasks.iter().filter(|t| filter.matches(t)).cloned().collect()
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.tasks.iter().position(|task| task.id == id)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::models::message::RemovedTask;

    fn task(id: &str, status: TaskStatus) -> Task {
        Task::new(id, status)
    }

    fn delete(id: &str) -> TaskDelta {
        TaskDelta::Delete(RemovedTask { id: id.into(), service_name: None })
    }

    #[test]
    fn update_keeps_position() {
        let mut store = TaskStore::new();
        store.apply_insert(task("a", TaskStatus::Queue));
        store.apply_insert(task("b", TaskStatus::Queue));
        store.apply_insert(task("c", TaskStatus::Queue));
        assert!(store.apply_update(task("a", TaskStatus::Completed)));

        let ids: Vec<_> = store.get_all().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
        assert_eq!(store.get("a").unwrap().status, TaskStatus::Completed);
    }

    #[test]
    fn update_of_missing_id_is_ignored() {
        let mut store = TaskStore::new();
        store.apply_insert(task("a", TaskStatus::Queue));
        store.apply_delete("a");
        assert!(!store.apply_update(task("a", TaskStatus::Processing)));
        assert!(store.is_empty());
    }

    #[test]
    fn duplicate_insert_acts_as_update() {
        let mut store = TaskStore::new();
        store.apply_insert(task("a", TaskStatus::Queue));
        store.apply_insert(task("b", TaskStatus::Queue));
        store.apply_insert(task("a", TaskStatus::Processing));
        assert_eq!(store.len(), 2);
        assert_eq!(store.get_all()[0].status, TaskStatus::Processing);
    }

    #[test]
    fn deltas_agree_with_a_plain_map() {
        let deltas = vec![
            TaskDelta::Insert(task("1", TaskStatus::Queue)),
            TaskDelta::Insert(task("2", TaskStatus::Queue)),
            TaskDelta::Update(task("1", TaskStatus::Processing)),
            TaskDelta::Update(task("9", TaskStatus::Failed)),
            delete("2"),
            TaskDelta::Insert(task("3", TaskStatus::Queue)),
            TaskDelta::Insert(task("1", TaskStatus::Completed)),
            TaskDelta::Update(task("1", TaskStatus::Completed)),
            delete("7"),
            TaskDelta::Insert(task("2", TaskStatus::Failed)),
        ];

        let mut store = TaskStore::new();
        let mut model: HashMap<String, TaskStatus> = HashMap::new();
        for delta in deltas {
            match &delta {
                TaskDelta::Insert(t) => {
                    model.insert(t.id.clone(), t.status);
                }
                TaskDelta::Update(t) => {
                    if let Some(s) = model.get_mut(&t.id) {
                        *s = t.status;
                    }
                }
                TaskDelta::Delete(r) => {
                    model.remove(&r.id);
                }
            }
            store.apply(delta);
        }

        let from_store: HashMap<String, TaskStatus> = store
            .get_all()
            .iter()
            .map(|t| (t.id.clone(), t.status))
            .collect();
        assert_eq!(from_store, model);
        assert_eq!(store.len(), model.len());
    }

    #[test]
    fn replace_all_collapses_duplicate_ids() {
        let mut store = TaskStore::new();
        store.apply_insert(task("old", TaskStatus::Queue));
        store.replace_all(vec![
            task("x", TaskStatus::Queue),
            task("y", TaskStatus::Queue),
            task("x", TaskStatus::Failed),
        ]);
        assert_eq!(store.len(), 2);
        assert!(store.get("old").is_none());
        assert_eq!(store.get("x").unwrap().status, TaskStatus::Failed);
    }

    #[test]
    fn stats_count_active_as_queue_plus_processing() {
        let mut store = TaskStore::new();
        store.replace_all(vec![
            task("1", TaskStatus::Queue),
            task("2", TaskStatus::Processing),
            task("3", TaskStatus::Processing),
            task("4", TaskStatus::Completed),
            task("5", TaskStatus::Failed),
        ]);
        let stats = store.stats();
        assert_eq!(stats.total, 5);
        assert_eq!(stats.active, 3);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
    }

    #[test]
    fn filter_combines_tab_status_and_search() {
        let mut resume = task("1", TaskStatus::Processing);
        resume.service_name = Some("Resume Parser".into());
        let mut invoice = task("2", TaskStatus::Queue);
        invoice.service_name = Some("Invoice OCR".into());
        let mut done = task("3", TaskStatus::Completed);
        done.service_name = Some("resume-v2".into());

        let mut store = TaskStore::new();
        store.replace_all(vec![resume, invoice, done]);

        let filter = TaskFilter {
            tab: StatusTab::Active,
            status: None,
            search: "RESUME".into(),
        };
        let hits = store.filtered(&filter);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "1");

        let filter = TaskFilter {
            status: Some(TaskStatus::Queue),
            ..TaskFilter::default()
        };
        assert_eq!(store.filtered(&filter)[0].id, "2");
    }
}
