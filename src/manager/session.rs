use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::info;

use crate::config::SyncConfig;
use crate::error::TaskAction;
use crate::manager::notifier::NotificationEmitter;
use crate::manager::supervisor::TransportState;
use crate::manager::task_store::{TaskFilter, TaskStats, TaskStore};
use crate::models::message::SyncMessage;
use crate::models::notification::Notification;
use crate::models::task::Task;
use crate::worker::worker::{lock, spawn_sync_thread, SyncDeps, SyncTimings, SyncWorker};

/// Task sync for one signed-in user.
///
/// Reads go straight to the shared store; everything that changes it runs
/// on the session's own loop thread. Dropping the session stops the loop
/// and waits for it, so no callback touches the store afterwards.
pub struct SyncSession {
    user_id: String,
    store: Arc<Mutex<TaskStore>>,
    state: Arc<Mutex<TransportState>>,
    sender: Sender<SyncMessage>,
    notifications: Receiver<Notification>,
    worker: Option<JoinHandle<()>>,
}

impl SyncSession {
    pub fn start(user_id: &str, deps: SyncDeps, config: &SyncConfig) -> Self {
        let timings = SyncTimings {
            resync_interval: config.resync_interval(),
            realtime_retry: config.realtime_retry(),
            fallback_retry: config.fallback_retry(),
        };
        let store = Arc::new(Mutex::new(TaskStore::new()));
        let state = Arc::new(Mutex::new(TransportState::Disconnected));
        let (sender, receiver) = unbounded();
        let (notify_tx, notifications) = unbounded();

        let worker = SyncWorker::new(
            user_id.to_string(),
            deps,
            timings,
            Arc::clone(&store),
            Arc::clone(&state),
            NotificationEmitter::new(Box::new(notify_tx)),
            sender.clone(),
        );
        let worker = spawn_sync_thread(worker, receiver);

        Self {
            user_id: user_id.to_string(),
            store,
            state,
            sender,
            notifications,
            worker: Some(worker),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn get_all_tasks(&self) -> Vec<Task> {
        lock(&self.store).get_all().to_vec()
    }

    pub fn get_task(&self, id: &str) -> Option<Task> {
        lock(&self.store).get(id).cloned()
    }

    pub fn stats(&self) -> TaskStats {
        lock(&self.store).stats()
    }

    pub fn filtered_tasks(&self, filter: &TaskFilter) -> Vec<Task> {
        lock(&self.store).filtered(filter)
    }

    pub fn transport_state(&self) -> TransportState {
        *lock(&self.state)
    }

    pub fn notifications(&self) -> &Receiver<Notification> {
        &self.notifications
    }

    pub fn retry_task(&self, id: &str) -> bool {
        self.request(TaskAction::Retry, id)
    }

    pub fn cancel_task(&self, id: &str) -> bool {
        self.request(TaskAction::Cancel, id)
    }

    pub fn delete_task(&self, id: &str) -> bool {
        self.request(TaskAction::Delete, id)
    }

    /// False when the task is unknown or the session is gone.
    fn request(&self, action: TaskAction, id: &str) -> bool {
        if lock(&self.store).get(id).is_none() {
            return false;
        }
        self.sender.send(SyncMessage::Action(action, id.to_string())).is_ok()
    }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = self.sender.send(SyncMessage::Shutdown);
            let _ = worker.join();
            info!("Session for user '{}' torn down.", self.user_id);
        }
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Holds at most one session, matching whoever is signed in. A different
/// user id always gets a store built from scratch.
pub struct SessionScope {
    deps: SyncDeps,
    config: SyncConfig,
    session: Option<SyncSession>,
}

impl SessionScope {
    pub fn new(deps: SyncDeps, config: SyncConfig) -> Self {
        Self {
            deps,
            config,
            session: None,
        }
    }

    /// Returns true when the session was replaced.
    pub fn set_user(&mut self, user_id: Option<&str>) -> bool {
        let current = self.session.as_ref().map(SyncSession::user_id);
        if current == user_id {
            return false;
        }
        if let Some(old) = self.session.take() {
            old.shutdown();
        }
        self.session = user_id.map(|id| SyncSession::start(id, self.deps.clone(), &self.config));
        true
    }

    pub fn session(&self) -> Option<&SyncSession> {
        self.session.as_ref()
    }
}
