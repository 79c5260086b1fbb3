use std::collections::HashMap;
use std::io::{self, BufRead};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use log::{info, warn};

use super::{dispatch, DeltaHandler};
use crate::error::{Result, SyncError};
use crate::models::message::{RemovedTask, TaskDelta};
use crate::models::task::Task;

pub const EVENT_STREAM: &str = "text/event-stream";

/// Opens the server-push stream of full task snapshots for a user.
pub trait EventSource: Send + Sync {
    fn connect(&self, user_id: &str) -> Result<Box<dyn BufRead + Send>>;
}

/// What the decoder made of the next stretch of the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    /// The `data` payload of one event.
    Data(String),
    /// An event carrying bytes that are not UTF-8.
    Undecodable,
    /// The source timed out between events; nothing is lost, reading may
    /// resume.
    Idle,
}

/// Splits a server-sent event stream into frames.
///
/// A read that fails with `TimedOut` or `WouldBlock` yields
/// [`SseFrame::Idle`] and keeps any partial line for the next call.
pub struct SseDecoder<R> {
    reader: R,
    line: Vec<u8>,
    data: Option<String>,
    corrupt: bool,
}

impl<R: BufRead> SseDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: Vec::new(),
            data: None,
            corrupt: false,
        }
    }

    fn take_event(&mut self) -> Option<SseFrame> {
        let data = self.data.take()?;
        if std::mem::take(&mut self.corrupt) {
            Some(SseFrame::Undecodable)
        } else {
            Some(SseFrame::Data(data))
        }
    }

    fn feed_line(&mut self, raw: &[u8]) -> Option<SseFrame> {
        let Ok(line) = std::str::from_utf8(raw) else {
            self.data.get_or_insert_with(String::new);
            self.corrupt = true;
            return None;
        };
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return self.take_event();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            match self.data.as_mut() {
                Some(buf) => {
                    buf.push('\n');
                    buf.push_str(value);
                }
                None => self.data = Some(value.to_string()),
            }
        }
        None
    }
}

fn is_idle(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}

impl<R: BufRead> Iterator for SseDecoder<R> {
    type Item = io::Result<SseFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.reader.read_until(b'\n', &mut self.line) {
                Ok(0) => {
                    let rest = std::mem::take(&mut self.line);
                    if !rest.is_empty() {
                        if let Some(frame) = self.feed_line(&rest) {
                            return Some(Ok(frame));
                        }
                    }
                    return self.take_event().map(Ok);
                }
                Ok(_) => {}
                Err(err) if is_idle(&err) => return Some(Ok(SseFrame::Idle)),
                Err(err) => return Some(Err(err)),
            }
            let raw = std::mem::take(&mut self.line);
            if let Some(frame) = self.feed_line(&raw) {
                return Some(Ok(frame));
            }
        }
    }
}

/// Deltas that turn `old` into `new`, keyed by task id. Inserts and updates
/// follow `new` order, deletes follow `old` order.
pub fn diff_snapshots(old: &[Task], new: &[Task]) -> Vec<TaskDelta> {
    let before: HashMap<&str, &Task> = old.iter().map(|t| (t.id.as_str(), t)).collect();
    let after: HashMap<&str, &Task> = new.iter().map(|t| (t.id.as_str(), t)).collect();

    let mut deltas = Vec::new();
    for task in new {
        match before.get(task.id.as_str()) {
            None => deltas.push(TaskDelta::Insert(task.clone())),
            Some(prev) if prev.differs_from(task) => deltas.push(TaskDelta::Update(task.clone())),
            Some(_) => {}
        }
    }
    for task in old {
        if !after.contains_key(task.id.as_str()) {
            deltas.push(TaskDelta::Delete(RemovedTask {
                id: task.id.clone(),
                service_name: task.service_name.clone(),
            }));
        }
    }
    deltas
}

/// Closing releases the connection: the reader thread notices at its next
/// frame or idle tick and drops the source.
pub struct ConnectionHandle {
    user_id: String,
    closed: Arc<AtomicBool>,
}

impl ConnectionHandle {
    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("Closed fallback stream for user '{}'.", self.user_id);
        }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Consumes the snapshot stream and reports it as deltas.
///
/// The first frame of a connection is handed over whole; every later frame
/// is diffed against its predecessor. A malformed frame is skipped and the
/// baseline kept, the next frame heals it. Stream failure is reported once.
pub struct FallbackStreamClient {
    source: Arc<dyn EventSource>,
}

impl FallbackStreamClient {
    pub fn new(source: Arc<dyn EventSource>) -> Self {
        Self { source }
    }

    pub fn open<H: DeltaHandler>(&self, user_id: &str, handler: H) -> ConnectionHandle {
        let handle = ConnectionHandle {
            user_id: user_id.to_string(),
            closed: Arc::new(AtomicBool::new(false)),
        };
        let source = Arc::clone(&self.source);
        let closed = Arc::clone(&handle.closed);
        let user_id = user_id.to_string();
        thread::spawn(move || {
            info!("Opening fallback stream for user '{user_id}'.");
            let failure = match source.connect(&user_id) {
                Ok(reader) => consume(SseDecoder::new(reader), &closed, &handler),
                Err(err) => Some(err),
            };
            if let Some(err) = failure {
                if !closed.load(Ordering::SeqCst) {
                    warn!("Fallback stream for user '{user_id}' failed: {err}");
                    handler.on_error(err);
                }
            }
        });
        handle
    }

    pub fn close(&self, handle: ConnectionHandle) {
        handle.close();
    }
}

fn consume<R: BufRead>(
    frames: SseDecoder<R>,
    closed: &AtomicBool,
    handler: &dyn DeltaHandler,
) -> Option<SyncError> {
    let mut baseline: Option<Vec<Task>> = None;
    for frame in frames {
        if closed.load(Ordering::SeqCst) {
            return None;
        }
        let data = match frame {
            Ok(SseFrame::Data(data)) => data,
            Ok(SseFrame::Idle) => continue,
            Ok(SseFrame::Undecodable) => {
                warn!("Dropping snapshot frame that is not valid UTF-8.");
                continue;
            }
            Err(err) => return Some(SyncError::Transport(err.to_string())),
        };
        let snapshot: Vec<Task> = match serde_json::from_str(&data) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!("Dropping malformed snapshot frame: {err}");
                continue;
            }
        };
        match baseline.as_deref() {
            None => handler.on_snapshot(snapshot.clone()),
            Some(previous) => {
                for delta in diff_snapshots(previous, &snapshot) {
                    dispatch(handler, delta);
                }
            }
        }
        baseline = Some(snapshot);
    }
    if closed.load(Ordering::SeqCst) {
        None
    } else {
        Some(SyncError::Transport("event stream ended".to_string()))
    }
}
