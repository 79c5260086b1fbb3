//! Keeps a signed-in user's list of document-processing tasks current.
//!
//! A session loads the full list once, then follows a realtime change feed.
//! When that feed fails it switches to a server-sent snapshot stream and
//! keeps retrying realtime in the background. A periodic full resync backs
//! up both. Status transitions surface as notifications, once each.

pub mod config;
pub mod error;
pub mod manager;
pub mod models;
pub mod server;
pub mod transport;
pub mod worker;

pub use config::SyncConfig;
pub use error::{Result, SyncError, TaskAction};
pub use manager::session::{SessionScope, SyncSession};
pub use manager::supervisor::TransportState;
pub use models::notification::{Notification, NotificationLevel};
pub use models::task::{Task, TaskId, TaskStatus};
pub use worker::worker::SyncDeps;
