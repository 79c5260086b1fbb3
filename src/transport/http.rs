//! reqwest-backed client for the `/tasks` endpoints.

use std::io::{self, BufRead, BufReader, Read};
use std::time::Duration;

use log::debug;
use reqwest::blocking::{Client, Response};
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::Url;
use serde_json::Value;

use super::fallback::{EventSource, EVENT_STREAM};
use super::snapshot::SnapshotFetcher;
use crate::error::{Result, SyncError};
use crate::manager::actions::TaskActions;
use crate::models::task::{StatusPatch, Task};

/// Longest a stream read blocks before the reader checks whether its
/// connection was closed. Also bounds the wait for the response headers.
pub const STREAM_READ_TIMEOUT: Duration = Duration::from_secs(3);

pub struct ApiClient {
    client: Client,
    stream_client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(request_timeout).build()?;
        // The blocking client applies `timeout` per read, so an idle stream
        // stays open and only wakes its reader periodically.
        let stream_client = Client::builder()
            .connect_timeout(request_timeout)
            .timeout(STREAM_READ_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            stream_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str, params: &[(&str, &str)]) -> Result<Url> {
        Url::parse_with_params(&format!("{}{}", self.base_url, path), params)
            .map_err(|err| SyncError::Transport(format!("invalid url for {path}: {err}")))
    }

    fn task_url(&self, user_id: &str, task_id: &str) -> Result<Url> {
        self.url("/tasks", &[("taskId", task_id), ("userId", user_id)])
    }
}

/// Prefers the server's own explanation over the bare status code.
fn failure(response: Response) -> SyncError {
    let status = response.status();
    let body: Option<Value> = response.text().ok().and_then(|t| serde_json::from_str(&t).ok());
    let reason = body
        .as_ref()
        .and_then(|b| b.get("message").or_else(|| b.get("error")))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {status}"));
    SyncError::Transport(reason)
}

impl SnapshotFetcher for ApiClient {
    fn fetch_all(&self, user_id: &str) -> Result<Vec<Task>> {
        let url = self.url("/tasks", &[("userId", user_id)])?;
        debug!("GET {url}");
        let response = self.client.get(url).send()?;
        if !response.status().is_success() {
            return Err(failure(response));
        }
        let body = response.text()?;
        Ok(serde_json::from_str(&body)?)
    }
}

impl TaskActions for ApiClient {
    fn update_status(&self, user_id: &str, task_id: &str, patch: &StatusPatch) -> Result<()> {
        let url = self.task_url(user_id, task_id)?;
        debug!("PUT {url} -> {}", patch.status);
        let response = self.client.put(url).json(patch).send()?;
        if !response.status().is_success() {
            return Err(failure(response));
        }
        Ok(())
    }

    fn delete_task(&self, user_id: &str, task_id: &str) -> Result<()> {
        let url = self.task_url(user_id, task_id)?;
        debug!("DELETE {url}");
        let response = self.client.delete(url).send()?;
        if !response.status().is_success() {
            return Err(failure(response));
        }
        Ok(())
    }
}

impl EventSource for ApiClient {
    fn connect(&self, user_id: &str) -> Result<Box<dyn BufRead + Send>> {
        let url = self.url("/tasks/events", &[("userId", user_id)])?;
        debug!("GET {url} (event stream)");
        let response = self
            .stream_client
            .get(url)
            .header(ACCEPT, EVENT_STREAM)
            .header(CACHE_CONTROL, "no-cache")
            .send()?;
        if !response.status().is_success() {
            return Err(failure(response));
        }
        Ok(Box::new(BufReader::new(StreamBody(response))))
    }
}

/// Event stream body whose read timeouts surface as `TimedOut`, which the
/// decoder treats as an idle tick rather than a broken stream.
struct StreamBody(Response);

impl Read for StreamBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf).map_err(|err| {
            let timed_out = err
                .get_ref()
                .and_then(|inner| inner.downcast_ref::<reqwest::Error>())
                .is_some_and(reqwest::Error::is_timeout);
            if timed_out {
                io::Error::new(io::ErrorKind::TimedOut, err)
            } else {
                err
            }
        })
    }
}
