use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{after, never, select, tick, Receiver, Sender};
use log::{debug, error, info, warn};

use crate::error::{SyncError, TaskAction};
use crate::manager::actions::{TaskActionGateway, TaskActions};
use crate::manager::notifier::NotificationEmitter;
use crate::manager::supervisor::{SupervisorEvent, TransportCommand, TransportState, TransportSupervisor};
use crate::manager::task_store::TaskStore;
use crate::models::message::{RemovedTask, Source, SyncMessage, TaskDelta, TransportEvent};
use crate::models::notification::Notification;
use crate::models::task::{Task, TaskId};
use crate::transport::change_feed::{ChangeFeedSubscriber, RealtimeConnector, SubscriptionHandle};
use crate::transport::fallback::{diff_snapshots, ConnectionHandle, EventSource, FallbackStreamClient};
use crate::transport::snapshot::SnapshotFetcher;
use crate::transport::DeltaHandler;

/// Collaborators a session talks to.
#[derive(Clone)]
pub struct SyncDeps {
    pub fetcher: Arc<dyn SnapshotFetcher>,
    pub realtime: Arc<dyn RealtimeConnector>,
    pub events: Arc<dyn EventSource>,
    pub actions: Arc<dyn TaskActions>,
}

#[derive(Debug, Clone, Copy)]
pub struct SyncTimings {
    pub resync_interval: Duration,
    pub realtime_retry: Duration,
    pub fallback_retry: Duration,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Tags transport callbacks with the connection they came from so the loop
/// can drop anything a closed connection still delivers.
struct LoopHandler {
    source: Source,
    conn: u64,
    sender: Sender<SyncMessage>,
}

impl LoopHandler {
    fn forward(&self, event: TransportEvent) {
        let _ = self.sender.send(SyncMessage::Transport {
            source: self.source,
            conn: self.conn,
            event,
        });
    }
}

impl DeltaHandler for LoopHandler {
    fn on_subscribed(&self) {
        self.forward(TransportEvent::Subscribed);
    }

    fn on_snapshot(&self, tasks: Vec<Task>) {
        self.forward(TransportEvent::Snapshot(tasks));
    }

    fn on_insert(&self, task: Task) {
        self.forward(TransportEvent::Delta(TaskDelta::Insert(task)));
    }

    fn on_update(&self, task: Task) {
        self.forward(TransportEvent::Delta(TaskDelta::Update(task)));
    }

    fn on_delete(&self, removed: RemovedTask) {
        self.forward(TransportEvent::Delta(TaskDelta::Delete(removed)));
    }

    fn on_error(&self, err: SyncError) {
        self.forward(TransportEvent::Failed(err));
    }
}

/// Single-threaded owner of one user's task store. Every mutation, diff and
/// notification happens on this thread in message order.
pub(crate) struct SyncWorker {
    user_id: String,
    deps: SyncDeps,
    timings: SyncTimings,
    store: Arc<Mutex<TaskStore>>,
    state: Arc<Mutex<TransportState>>,
    emitter: NotificationEmitter,
    supervisor: TransportSupervisor,
    gateway: TaskActionGateway,
    sender: Sender<SyncMessage>,
    next_conn: u64,
    subscription: Option<(u64, SubscriptionHandle)>,
    fallback: Option<(u64, ConnectionHandle)>,
    realtime_timer: Option<Receiver<Instant>>,
    fallback_timer: Option<Receiver<Instant>>,
    fetch_in_flight: bool,
    /// Latest row per id changed by a delta while a fetch was in flight,
    /// `None` when the delta was a delete. Kept in arrival order.
    changed_during_fetch: Vec<(TaskId, Option<Task>)>,
}

impl SyncWorker {
    pub(crate) fn new(
        user_id: String,
        deps: SyncDeps,
        timings: SyncTimings,
        store: Arc<Mutex<TaskStore>>,
        state: Arc<Mutex<TransportState>>,
        emitter: NotificationEmitter,
        sender: Sender<SyncMessage>,
    ) -> Self {
        let gateway = TaskActionGateway::new(Arc::clone(&deps.actions), user_id.clone());
        Self {
            supervisor: TransportSupervisor::new(timings.realtime_retry, timings.fallback_retry),
            user_id,
            deps,
            timings,
            store,
            state,
            emitter,
            gateway,
            sender,
            next_conn: 0,
            subscription: None,
            fallback: None,
            realtime_timer: None,
            fallback_timer: None,
            fetch_in_flight: false,
            changed_during_fetch: Vec::new(),
        }
    }
}

pub(crate) fn spawn_sync_thread(worker: SyncWorker, receiver: Receiver<SyncMessage>) -> JoinHandle<()> {
    thread::spawn(move || worker.run(receiver))
}

impl SyncWorker {
    fn run(mut self, receiver: Receiver<SyncMessage>) {
        info!("Sync session for user '{}' started.", self.user_id);
        self.fetch_snapshot();
        self.dispatch(SupervisorEvent::Mount);
        let resync = tick(self.timings.resync_interval);

        let mut running = true;
        while running {
            // Cancelled timers are dropped, so a stale retry can never fire.
            let realtime_timer = self.realtime_timer.clone().unwrap_or_else(never);
            let fallback_timer = self.fallback_timer.clone().unwrap_or_else(never);
            select! {
                recv(receiver) -> message => match message {
                    Ok(SyncMessage::Shutdown) | Err(_) => running = false,
                    Ok(message) => self.handle(message),
                },
                recv(resync) -> _ => self.fetch_snapshot(),
                recv(realtime_timer) -> _ => {
                    self.realtime_timer = None;
                    self.dispatch(SupervisorEvent::RealtimeRetryDue);
                }
                recv(fallback_timer) -> _ => {
                    self.fallback_timer = None;
                    self.dispatch(SupervisorEvent::FallbackRetryDue);
                }
            }
        }

        self.dispatch(SupervisorEvent::Teardown);
        info!("Sync session for user '{}' stopped.", self.user_id);
    }

    fn handle(&mut self, message: SyncMessage) {
        match message {
            SyncMessage::Action(action, task_id) => self.run_action(action, task_id),
            SyncMessage::ActionDone(action, task_id, result) => match result {
                Ok(()) => self.emitter.notify(Notification::success(action.success_message())),
                Err(err) => {
                    let reason = match err {
                        SyncError::Action { reason, .. } => reason,
                        other => other.to_string(),
                    };
                    error!("Could not {action} task '{task_id}': {reason}");
                    self.emitter
                        .notify(Notification::error(action.default_failure()).with_description(reason));
                }
            },
            SyncMessage::SnapshotFetched(result) => {
                self.fetch_in_flight = false;
                let changed = std::mem::take(&mut self.changed_during_fetch);
                match result {
                    Ok(tasks) => {
                        let tasks = self.revalidate(tasks, &changed);
                        self.resync(tasks);
                    }
                    Err(err) => {
                        warn!("Fetching tasks for user '{}' failed: {err}", self.user_id);
                        if !self.emitter.has_baseline() {
                            self.emitter.notify(
                                Notification::error("Failed to fetch tasks.").with_description(err.to_string()),
                            );
                        }
                    }
                }
            }
            SyncMessage::Transport { source, conn, event } => self.on_transport(source, conn, event),
            SyncMessage::Shutdown => {}
        }
    }

    fn on_transport(&mut self, source: Source, conn: u64, event: TransportEvent) {
        let live = match source {
            Source::Realtime => self.subscription.as_ref().map(|(id, _)| *id),
            Source::Fallback => self.fallback.as_ref().map(|(id, _)| *id),
        };
        if live != Some(conn) {
            debug!("Dropping {:?} event from closed connection {conn}.", source);
            return;
        }

        match (source, event) {
            (Source::Realtime, TransportEvent::Subscribed) => {
                self.dispatch(SupervisorEvent::RealtimeSubscribed)
            }
            (Source::Realtime, TransportEvent::Delta(delta)) => self.apply_delta(delta),
            (Source::Realtime, TransportEvent::Failed(err)) => {
                warn!("Realtime channel for user '{}' failed: {err}", self.user_id);
                self.dispatch(SupervisorEvent::RealtimeFailed);
            }
            (Source::Fallback, TransportEvent::Snapshot(tasks)) => {
                self.dispatch(SupervisorEvent::FallbackSnapshot);
                if self.supervisor.accepts_fallback() {
                    self.resync(tasks);
                }
            }
            (Source::Fallback, TransportEvent::Delta(delta)) => {
                if self.supervisor.accepts_fallback() {
                    self.apply_delta(delta);
                }
            }
            (Source::Fallback, TransportEvent::Failed(err)) => {
                warn!("Fallback stream for user '{}' failed: {err}", self.user_id);
                self.dispatch(SupervisorEvent::FallbackFailed);
            }
            (source, event) => debug!("Ignoring {:?} from {:?}.", event, source),
        }
    }

    fn dispatch(&mut self, event: SupervisorEvent) {
        for command in self.supervisor.handle(event) {
            self.execute(command);
        }
        *lock(&self.state) = self.supervisor.state();
    }

    fn execute(&mut self, command: TransportCommand) {
        match command {
            TransportCommand::Subscribe => {
                let conn = self.next_conn();
                let handler = self.handler(Source::Realtime, conn);
                let handle = ChangeFeedSubscriber::new(Arc::clone(&self.deps.realtime))
                    .subscribe(&self.user_id, handler);
                self.subscription = Some((conn, handle));
            }
            TransportCommand::Unsubscribe => {
                if let Some((_, handle)) = self.subscription.take() {
                    ChangeFeedSubscriber::new(Arc::clone(&self.deps.realtime)).unsubscribe(handle);
                }
            }
            TransportCommand::OpenFallback => {
                let conn = self.next_conn();
                let handler = self.handler(Source::Fallback, conn);
                let handle = FallbackStreamClient::new(Arc::clone(&self.deps.events)).open(&self.user_id, handler);
                self.fallback = Some((conn, handle));
            }
            TransportCommand::CloseFallback => {
                if let Some((_, handle)) = self.fallback.take() {
                    FallbackStreamClient::new(Arc::clone(&self.deps.events)).close(handle);
                }
            }
            TransportCommand::ScheduleRealtimeRetry(delay) => self.realtime_timer = Some(after(delay)),
            TransportCommand::CancelRealtimeRetry => self.realtime_timer = None,
            TransportCommand::ScheduleFallbackRetry(delay) => self.fallback_timer = Some(after(delay)),
            TransportCommand::CancelFallbackRetry => self.fallback_timer = None,
            TransportCommand::NotifyDegraded => self.emitter.notify(
                Notification::info("Realtime connection lost.")
                    .with_description("Following task updates through the event stream."),
            ),
        }
    }

    fn next_conn(&mut self) -> u64 {
        self.next_conn += 1;
        self.next_conn
    }

    fn handler(&self, source: Source, conn: u64) -> LoopHandler {
        LoopHandler {
            source,
            conn,
            sender: self.sender.clone(),
        }
    }

    fn fetch_snapshot(&mut self) {
        if self.fetch_in_flight {
            debug!("Resync for user '{}' still in flight, skipping.", self.user_id);
            return;
        }
        self.fetch_in_flight = true;
        let fetcher = Arc::clone(&self.deps.fetcher);
        let sender = self.sender.clone();
        let user_id = self.user_id.clone();
        thread::spawn(move || {
            let result = fetcher.fetch_all(&user_id);
            let _ = sender.send(SyncMessage::SnapshotFetched(result));
        });
    }

    fn run_action(&mut self, action: TaskAction, task_id: TaskId) {
        let gateway = self.gateway.clone();
        let sender = self.sender.clone();
        thread::spawn(move || {
            let result = gateway.run(action, &task_id);
            let _ = sender.send(SyncMessage::ActionDone(action, task_id, result));
        });
    }

    /// A fetched list predates deltas that arrived while it was in flight.
    /// For those ids the newest known row wins: the store's entry, else the
    /// delta's own payload. Only ids deleted meanwhile are left out.
    fn revalidate(&self, fetched: Vec<Task>, changed: &[(TaskId, Option<Task>)]) -> Vec<Task> {
        if changed.is_empty() {
            return fetched;
        }
        let latest: HashMap<&str, Option<&Task>> =
            changed.iter().map(|(id, row)| (id.as_str(), row.as_ref())).collect();
        let store = lock(&self.store);
        let newest = |row: &Task| store.get(&row.id).cloned().unwrap_or_else(|| row.clone());

        let mut seen = HashSet::new();
        let mut tasks: Vec<Task> = fetched
            .into_iter()
            .filter_map(|task| match latest.get(task.id.as_str()) {
                None => Some(task),
                Some(row) => {
                    seen.insert(task.id.clone());
                    row.map(newest)
                }
            })
            .collect();
        for (id, row) in changed {
            if let Some(row) = row.as_ref().filter(|_| !seen.contains(id)) {
                tasks.push(newest(row));
            }
        }
        tasks
    }

    /// Replaces the store with a full list. Before the first baseline this
    /// is silent; afterwards transitions against the old content notify.
    fn resync(&mut self, tasks: Vec<Task>) {
        let mut store = lock(&self.store);
        if !self.emitter.has_baseline() {
            store.replace_all(tasks);
            self.emitter.establish_baseline(store.get_all());
            info!("Baseline of {} tasks for user '{}'.", store.len(), self.user_id);
            return;
        }

        let previous = store.get_all().to_vec();
        for delta in diff_snapshots(&previous, &tasks) {
            match delta {
                TaskDelta::Insert(task) => self.emitter.observe(&task),
                TaskDelta::Update(task) => {
                    if let Some(prev) = previous.iter().find(|t| t.id == task.id) {
                        self.emitter.on_transition(prev, &task);
                    }
                }
                TaskDelta::Delete(removed) => {
                    let prev = previous.iter().find(|t| t.id == removed.id);
                    self.emitter.on_delete(&removed, prev);
                }
            }
        }
        store.replace_all(tasks);
    }

    fn note_change_during_fetch(&mut self, delta: &TaskDelta) {
        let row = match delta {
            TaskDelta::Insert(task) | TaskDelta::Update(task) => Some(task.clone()),
            TaskDelta::Delete(_) => None,
        };
        let id = delta.task_id();
        match self.changed_during_fetch.iter_mut().find(|(seen, _)| seen == id) {
            Some(entry) => entry.1 = row,
            None => self.changed_during_fetch.push((id.to_string(), row)),
        }
    }

    fn apply_delta(&mut self, delta: TaskDelta) {
        if self.fetch_in_flight {
            self.note_change_during_fetch(&delta);
        }
        let mut store = lock(&self.store);
        match delta {
            TaskDelta::Insert(task) => {
                match store.get(&task.id).cloned() {
                    Some(prev) => {
                        self.emitter.on_transition(&prev, &task);
                    }
                    None => self.emitter.observe(&task),
                }
                store.apply_insert(task);
            }
            TaskDelta::Update(task) => match store.get(&task.id).cloned() {
                Some(prev) => {
                    store.apply_update(task.clone());
                    self.emitter.on_transition(&prev, &task);
                }
                None => debug!("Update for unknown task '{}' ignored.", task.id),
            },
            TaskDelta::Delete(removed) => {
                if let Some(prev) = store.apply_delete(&removed.id) {
                    self.emitter.on_delete(&removed, Some(&prev));
                }
            }
        }
    }
}
