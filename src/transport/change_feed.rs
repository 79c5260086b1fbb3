use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, info, warn};
use serde_json::Value;

use super::{dispatch, DeltaHandler};
use crate::error::{Result, SyncError};
use crate::models::message::ChangeEvent;

pub fn channel_topic(user_id: &str) -> String {
    format!("user_tasks_{user_id}")
}

/// Raw traffic on a joined realtime channel.
#[derive(Debug, Clone)]
pub enum ChannelMessage {
    Subscribed,
    Change(Value),
    Error(String),
    Closed,
}

pub struct Membership {
    pub id: u64,
    pub messages: Receiver<ChannelMessage>,
}

/// The realtime client library. It owns the socket; this crate only joins
/// and leaves per-user topics.
pub trait RealtimeConnector: Send + Sync {
    fn join(&self, topic: &str) -> Result<Membership>;
    fn leave(&self, topic: &str, membership_id: u64);
}

pub struct SubscriptionHandle {
    topic: String,
    membership: Arc<Mutex<Option<u64>>>,
    closed: Arc<AtomicBool>,
    connector: Arc<dyn RealtimeConnector>,
}

impl SubscriptionHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let membership = self.membership.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(id) = membership {
            self.connector.leave(&self.topic, id);
        }
        info!("Unsubscribed from realtime channel '{}'.", self.topic);
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Forwards a user's change channel to a [`DeltaHandler`], in arrival order.
///
/// A channel error is reported once and ends the subscription; retrying is
/// left to the caller.
pub struct ChangeFeedSubscriber {
    connector: Arc<dyn RealtimeConnector>,
}

impl ChangeFeedSubscriber {
    pub fn new(connector: Arc<dyn RealtimeConnector>) -> Self {
        Self { connector }
    }

    pub fn subscribe<H: DeltaHandler>(&self, user_id: &str, handler: H) -> SubscriptionHandle {
        let topic = channel_topic(user_id);
        let handle = SubscriptionHandle {
            topic: topic.clone(),
            membership: Arc::new(Mutex::new(None)),
            closed: Arc::new(AtomicBool::new(false)),
            connector: Arc::clone(&self.connector),
        };

        let connector = Arc::clone(&self.connector);
        let membership_slot = Arc::clone(&handle.membership);
        let closed = Arc::clone(&handle.closed);
        thread::spawn(move || {
            let membership = match connector.join(&topic) {
                Ok(membership) => membership,
                Err(err) => {
                    if !closed.load(Ordering::SeqCst) {
                        handler.on_error(err);
                    }
                    return;
                }
            };
            {
                let mut slot = membership_slot.lock().unwrap_or_else(PoisonError::into_inner);
                if closed.load(Ordering::SeqCst) {
                    // Closed while joining; the handle could not leave for us.
                    connector.leave(&topic, membership.id);
                    return;
                }
                *slot = Some(membership.id);
            }
            let failure = pump(&topic, &membership.messages, &closed, &handler);
            if let Some(err) = failure {
                if !closed.load(Ordering::SeqCst) {
                    handler.on_error(err);
                }
            }
        });
        handle
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        handle.close();
    }
}

/// Returns the error that ended the channel, if any.
fn pump(
    topic: &str,
    messages: &Receiver<ChannelMessage>,
    closed: &AtomicBool,
    handler: &dyn DeltaHandler,
) -> Option<SyncError> {
    for message in messages.iter() {
        if closed.load(Ordering::SeqCst) {
            return None;
        }
        match message {
            ChannelMessage::Subscribed => {
                info!("Subscribed to realtime channel '{topic}'.");
                handler.on_subscribed();
            }
            ChannelMessage::Change(payload) => {
                let delta = serde_json::from_value::<ChangeEvent>(payload)
                    .map_err(SyncError::from)
                    .and_then(ChangeEvent::into_delta);
                match delta {
                    Ok(delta) => dispatch(handler, delta),
                    Err(err) => warn!("Dropping undecodable change on '{topic}': {err}"),
                }
            }
            ChannelMessage::Error(reason) => return Some(SyncError::Subscription(reason)),
            ChannelMessage::Closed => {
                return Some(SyncError::Subscription(format!("channel '{topic}' closed")))
            }
        }
    }
    if closed.load(Ordering::SeqCst) {
        None
    } else {
        Some(SyncError::Subscription(format!("channel '{topic}' disconnected")))
    }
}

/// In-process realtime hub. Backs tests and embedders that feed changes
/// from their own listener.
#[derive(Default)]
pub struct MemoryRealtime {
    inner: Mutex<HubState>,
}

#[derive(Default)]
struct HubState {
    next_id: u64,
    unavailable: bool,
    members: HashMap<String, Vec<(u64, Sender<ChannelMessage>)>>,
}

impl MemoryRealtime {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, HubState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// While unavailable every join fails with a subscription error.
    pub fn set_available(&self, available: bool) {
        self.state().unavailable = !available;
    }

    pub fn subscriber_count(&self, user_id: &str) -> usize {
        self.state()
            .members
            .get(&channel_topic(user_id))
            .map_or(0, Vec::len)
    }

    /// Returns how many members received the change.
    pub fn publish(&self, user_id: &str, event: &ChangeEvent) -> Result<usize> {
        let payload = serde_json::to_value(event)?;
        Ok(self.send(user_id, ChannelMessage::Change(payload)))
    }

    /// Publishes a raw payload, bypassing encoding.
    pub fn publish_raw(&self, user_id: &str, payload: Value) -> usize {
        self.send(user_id, ChannelMessage::Change(payload))
    }

    /// Breaks every membership of the user's channel.
    pub fn fail_channel(&self, user_id: &str, reason: &str) {
        let members = self.state().members.remove(&channel_topic(user_id)).unwrap_or_default();
        for (_, sender) in members {
            let _ = sender.send(ChannelMessage::Error(reason.to_string()));
        }
    }

    fn send(&self, user_id: &str, message: ChannelMessage) -> usize {
        let state = self.state();
        let Some(members) = state.members.get(&channel_topic(user_id)) else {
            return 0;
        };
        members
            .iter()
            .filter(|(_, sender)| sender.send(message.clone()).is_ok())
            .count()
    }
}

impl RealtimeConnector for MemoryRealtime {
    fn join(&self, topic: &str) -> Result<Membership> {
        let mut state = self.state();
        if state.unavailable {
            return Err(SyncError::Subscription(format!("cannot join '{topic}'")));
        }
        state.next_id += 1;
        let id = state.next_id;
        let (sender, messages) = unbounded();
        let _ = sender.send(ChannelMessage::Subscribed);
        state.members.entry(topic.to_string()).or_default().push((id, sender));
        debug!("Member {id} joined '{topic}'.");
        Ok(Membership { id, messages })
    }

    fn leave(&self, topic: &str, membership_id: u64) {
        let mut state = self.state();
        if let Some(members) = state.members.get_mut(topic) {
            members.retain(|(id, _)| *id != membership_id);
            if members.is_empty() {
                state.members.remove(topic);
            }
        }
    }
}

/// Connector for deployments without a realtime endpoint. Every join fails,
/// which keeps the supervisor on the fallback stream.
pub struct OfflineRealtime;

impl RealtimeConnector for OfflineRealtime {
    fn join(&self, topic: &str) -> Result<Membership> {
        Err(SyncError::Subscription(format!(
            "no realtime endpoint configured for '{topic}'"
        )))
    }

    fn leave(&self, _topic: &str, _membership_id: u64) {}
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use serde_json::json;

    use super::*;
    use crate::models::message::{RemovedTask, TaskDelta};
    use crate::models::task::{Task, TaskStatus};
    use crate::transport::testing::{Recorder, Seen};

    fn wait_for(recorder: &Recorder, count: usize) -> Vec<Seen> {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            let events = recorder.events();
            if events.len() >= count {
                return events;
            }
            thread::sleep(Duration::from_millis(5));
        }
        recorder.events()
    }

    fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !condition() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn delivers_changes_in_order() {
        let hub = Arc::new(MemoryRealtime::new());
        let recorder = Arc::new(Recorder::default());
        let subscriber = ChangeFeedSubscriber::new(hub.clone());
        let handle = subscriber.subscribe("u1", Arc::clone(&recorder));
        assert_eq!(handle.topic(), "user_tasks_u1");
        wait_until(|| hub.subscriber_count("u1") == 1);

        let task = Task::new("t1", TaskStatus::Queue);
        hub.publish("u1", &ChangeEvent::insert(&task).unwrap()).unwrap();
        let mut done = task.clone();
        done.status = TaskStatus::Completed;
        hub.publish("u1", &ChangeEvent::update(&done).unwrap()).unwrap();
        hub.publish("u1", &ChangeEvent::delete("t1")).unwrap();

        let events = wait_for(&recorder, 4);
        assert_eq!(
            events,
            vec![
                Seen::Subscribed,
                Seen::Delta(TaskDelta::Insert(task)),
                Seen::Delta(TaskDelta::Update(done)),
                Seen::Delta(TaskDelta::Delete(RemovedTask { id: "t1".into(), service_name: None })),
            ]
        );
    }

    #[test]
    fn bad_payload_is_dropped_without_ending_the_feed() {
        let hub = Arc::new(MemoryRealtime::new());
        let recorder = Arc::new(Recorder::default());
        let _handle = ChangeFeedSubscriber::new(hub.clone()).subscribe("u1", Arc::clone(&recorder));
        wait_until(|| hub.subscriber_count("u1") == 1);

        hub.publish_raw("u1", json!({"eventType": "UPDATE", "new": {"id": 4}}));
        hub.publish_raw("u1", json!({"eventType": "DELETE", "old": {"id": "t2"}}));

        let events = wait_for(&recorder, 2);
        assert_eq!(events.len(), 2);
        assert!(!events.contains(&Seen::Error));
    }

    #[test]
    fn channel_error_is_reported_once_and_ends_delivery() {
        let hub = Arc::new(MemoryRealtime::new());
        let recorder = Arc::new(Recorder::default());
        let _handle = ChangeFeedSubscriber::new(hub.clone()).subscribe("u1", Arc::clone(&recorder));
        wait_until(|| hub.subscriber_count("u1") == 1);

        hub.fail_channel("u1", "CHANNEL_ERROR");
        assert_eq!(hub.publish("u1", &ChangeEvent::delete("x")).unwrap(), 0);

        let events = wait_for(&recorder, 2);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(events, vec![Seen::Subscribed, Seen::Error]);
        assert_eq!(recorder.events().len(), 2);
    }

    #[test]
    fn failed_join_reports_error() {
        let hub = Arc::new(MemoryRealtime::new());
        hub.set_available(false);
        let recorder = Arc::new(Recorder::default());
        let _handle = ChangeFeedSubscriber::new(hub.clone()).subscribe("u1", Arc::clone(&recorder));
        assert_eq!(wait_for(&recorder, 1), vec![Seen::Error]);
    }

    #[test]
    fn unsubscribe_leaves_the_channel() {
        let hub = Arc::new(MemoryRealtime::new());
        let recorder = Arc::new(Recorder::default());
        let subscriber = ChangeFeedSubscriber::new(hub.clone());
        let handle = subscriber.subscribe("u1", Arc::clone(&recorder));
        wait_until(|| hub.subscriber_count("u1") == 1);

        subscriber.unsubscribe(handle);
        wait_until(|| hub.subscriber_count("u1") == 0);
        assert_eq!(hub.subscriber_count("u1"), 0);
        thread::sleep(Duration::from_millis(50));
        assert!(!recorder.events().contains(&Seen::Error));
    }
}
