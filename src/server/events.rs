//! Server half of `GET /tasks/events`: request validation and the
//! change-only snapshot publisher behind it.

use std::io::Write;
use std::time::Duration;

use crossbeam_channel::{select, tick, Receiver};
use log::{debug, warn};

use crate::error::{Result, SyncError};
use crate::models::task::Task;
use crate::transport::fallback::EVENT_STREAM;
use crate::transport::snapshot::SnapshotFetcher;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub status: u16,
    pub error: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventStreamRequest {
    pub user_id: String,
}

impl EventStreamRequest {
    pub fn parse(accept: Option<&str>, user_id: Option<&str>) -> std::result::Result<Self, Rejection> {
        let streams = accept.is_some_and(|value| {
            value
                .split(',')
                .map(|part| part.split(';').next().unwrap_or_default().trim())
                .any(|media| media.eq_ignore_ascii_case(EVENT_STREAM))
        });
        if !streams {
            return Err(Rejection {
                status: 400,
                error: "This endpoint only supports EventSource connections",
            });
        }
        match user_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => Ok(Self { user_id: id.to_string() }),
            None => Err(Rejection {
                status: 400,
                error: "User ID is required",
            }),
        }
    }
}

pub const RESPONSE_HEADERS: [(&str, &str); 3] = [
    ("Content-Type", EVENT_STREAM),
    ("Cache-Control", "no-cache"),
    ("Connection", "keep-alive"),
];

/// Writes `data:` frames, skipping snapshots identical to the last one sent.
pub struct SnapshotPublisher<W> {
    writer: W,
    last_sent: Option<String>,
}

impl<W: Write> SnapshotPublisher<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, last_sent: None }
    }

    /// Returns true when a frame was written.
    pub fn publish(&mut self, tasks: &[Task]) -> Result<bool> {
        let encoded = serde_json::to_string(tasks)?;
        if self.last_sent.as_deref() == Some(encoded.as_str()) {
            return Ok(false);
        }
        write!(self.writer, "data: {encoded}\n\n")?;
        self.writer.flush()?;
        self.last_sent = Some(encoded);
        Ok(true)
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Streams one user's snapshots until `stop` fires or the stream breaks.
/// `cadence` is normally [`SyncConfig::publish_cadence`](crate::config::SyncConfig::publish_cadence).
/// A failed fetch ends the stream; the client reconnects on its own.
pub fn run_publisher<W: Write>(
    fetcher: &dyn SnapshotFetcher,
    request: &EventStreamRequest,
    writer: W,
    cadence: Duration,
    stop: &Receiver<()>,
) -> Result<W> {
    let mut publisher = SnapshotPublisher::new(writer);
    let ticker = tick(cadence);
    loop {
        let tasks = fetcher.fetch_all(&request.user_id).inspect_err(|err| {
            warn!("Event stream for user '{}' stopped: {err}", request.user_id);
        })?;
        if publisher.publish(&tasks)? {
            debug!("Pushed {} tasks to user '{}'.", tasks.len(), request.user_id);
        }
        select! {
            recv(stop) -> _ => return Ok(publisher.into_inner()),
            recv(ticker) -> _ => {}
        }
    }
}

impl From<Rejection> for SyncError {
    fn from(rejection: Rejection) -> Self {
        SyncError::Transport(format!("{} {}", rejection.status, rejection.error))
    }
}
