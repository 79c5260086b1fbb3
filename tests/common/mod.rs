#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use task_status_sync::manager::actions::TaskActions;
use task_status_sync::models::task::StatusPatch;
use task_status_sync::transport::change_feed::MemoryRealtime;
use task_status_sync::transport::fallback::EventSource;
use task_status_sync::transport::snapshot::SnapshotFetcher;
use task_status_sync::{Notification, Result, SyncConfig, SyncError, SyncDeps, SyncSession, Task, TaskStatus};

pub const WAIT: Duration = Duration::from_secs(3);

pub fn task(id: &str, status: TaskStatus) -> Task {
    let mut task = Task::new(id, status);
    task.service_name = Some(format!("scan-{id}.png"));
    task
}

pub fn fast_config() -> SyncConfig {
    SyncConfig {
        resync_interval_ms: 60_000,
        realtime_retry_ms: 150,
        fallback_retry_ms: 50,
        ..SyncConfig::default()
    }
}

pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Next notification whose title starts with `prefix`, skipping others.
pub fn expect_notification(session: &SyncSession, prefix: &str) -> Notification {
    let deadline = Instant::now() + WAIT;
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        match session.notifications().recv_timeout(left) {
            Ok(n) if n.title.starts_with(prefix) => return n,
            Ok(_) => continue,
            Err(_) => panic!("no notification starting with {prefix:?}"),
        }
    }
}

/// Read and write side of the task API, per user.
#[derive(Default)]
pub struct FakeApi {
    pub tasks: Mutex<HashMap<String, Vec<Task>>>,
    pub fetches: AtomicUsize,
    pub requests: Mutex<Vec<String>>,
    /// Holds the next fetch until a message arrives.
    gate: Mutex<Option<Receiver<()>>>,
    /// Every write fails with this server message.
    pub reject_with: Mutex<Option<String>>,
}

impl FakeApi {
    pub fn with_tasks(user_id: &str, tasks: Vec<Task>) -> Arc<Self> {
        let api = Self::default();
        api.tasks.lock().unwrap().insert(user_id.to_string(), tasks);
        Arc::new(api)
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn set_tasks(&self, user_id: &str, tasks: Vec<Task>) {
        self.tasks.lock().unwrap().insert(user_id.to_string(), tasks);
    }

    /// The next fetch blocks until the returned sender fires.
    pub fn hold_next_fetch(&self) -> Sender<()> {
        let (release, gate) = unbounded();
        *self.gate.lock().unwrap() = Some(gate);
        release
    }

    fn write(&self, request: String) -> Result<()> {
        if let Some(reason) = self.reject_with.lock().unwrap().clone() {
            return Err(SyncError::Transport(reason));
        }
        self.requests.lock().unwrap().push(request);
        Ok(())
    }
}

impl SnapshotFetcher for FakeApi {
    fn fetch_all(&self, user_id: &str) -> Result<Vec<Task>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.recv();
        }
        Ok(self.tasks.lock().unwrap().get(user_id).cloned().unwrap_or_default())
    }
}

impl TaskActions for FakeApi {
    fn update_status(&self, user_id: &str, task_id: &str, patch: &StatusPatch) -> Result<()> {
        self.write(format!("PUT {user_id} {task_id} {}", patch.status))
    }

    fn delete_task(&self, user_id: &str, task_id: &str) -> Result<()> {
        self.write(format!("DELETE {user_id} {task_id}"))
    }
}

/// Reader fed frame by frame. Times out while idle like the HTTP stream
/// body does, and reports EOF once the sender is dropped.
struct ChannelReader {
    frames: Receiver<Vec<u8>>,
    pending: io::Cursor<Vec<u8>>,
    open: Arc<AtomicUsize>,
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let n = self.pending.read(buf)?;
            if n > 0 {
                return Ok(n);
            }
            match self.frames.recv_timeout(Duration::from_millis(20)) {
                Ok(bytes) => self.pending = io::Cursor::new(bytes),
                Err(RecvTimeoutError::Timeout) => return Err(io::ErrorKind::TimedOut.into()),
                Err(RecvTimeoutError::Disconnected) => return Ok(0),
            }
        }
    }
}

impl Drop for ChannelReader {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Server-sent snapshot stream under test control.
#[derive(Default)]
pub struct FakeStream {
    pub opens: AtomicUsize,
    open_readers: Arc<AtomicUsize>,
    live: Mutex<Option<Sender<Vec<u8>>>>,
}

impl FakeStream {
    pub fn push(&self, tasks: &[Task]) {
        let frame = format!("data: {}\n\n", serde_json::to_string(tasks).unwrap());
        if let Some(sender) = self.live.lock().unwrap().as_ref() {
            let _ = sender.send(frame.into_bytes());
        }
    }

    /// Ends the current connection as if the server went away.
    pub fn drop_connection(&self) {
        self.live.lock().unwrap().take();
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Connections whose reader has not been dropped yet.
    pub fn open_readers(&self) -> usize {
        self.open_readers.load(Ordering::SeqCst)
    }
}

impl EventSource for FakeStream {
    fn connect(&self, _user_id: &str) -> Result<Box<dyn BufRead + Send>> {
        let (sender, frames) = unbounded();
        *self.live.lock().unwrap() = Some(sender);
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.open_readers.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(BufReader::new(ChannelReader {
            frames,
            pending: io::Cursor::new(Vec::new()),
            open: Arc::clone(&self.open_readers),
        })))
    }
}

pub struct Harness {
    pub api: Arc<FakeApi>,
    pub hub: Arc<MemoryRealtime>,
    pub stream: Arc<FakeStream>,
}

impl Harness {
    pub fn new(api: Arc<FakeApi>) -> Self {
        Self {
            api,
            hub: Arc::new(MemoryRealtime::new()),
            stream: Arc::new(FakeStream::default()),
        }
    }

    pub fn deps(&self) -> SyncDeps {
        SyncDeps {
            fetcher: self.api.clone(),
            realtime: self.hub.clone(),
            events: self.stream.clone(),
            actions: self.api.clone(),
        }
    }

    pub fn start(&self, user_id: &str) -> SyncSession {
        SyncSession::start(user_id, self.deps(), &fast_config())
    }
}

pub fn statuses(session: &SyncSession) -> Vec<(String, TaskStatus)> {
    session
        .get_all_tasks()
        .into_iter()
        .map(|t| (t.id, t.status))
        .collect()
}
