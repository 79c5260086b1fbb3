use std::time::Duration;

use log::info;

/// Externally visible transport state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Disconnected,
    ConnectingRealtime,
    RealtimeActive,
    /// Realtime failed; the fallback stream is waiting to reconnect.
    Degraded,
    ConnectingFallback,
    FallbackActive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Leg {
    Idle,
    Connecting,
    Active,
    RetryScheduled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorEvent {
    Mount,
    RealtimeSubscribed,
    RealtimeFailed,
    RealtimeRetryDue,
    FallbackSnapshot,
    FallbackFailed,
    FallbackRetryDue,
    Teardown,
}

/// Side effects the event loop carries out on the supervisor's behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportCommand {
    Subscribe,
    Unsubscribe,
    OpenFallback,
    CloseFallback,
    ScheduleRealtimeRetry(Duration),
    CancelRealtimeRetry,
    ScheduleFallbackRetry(Duration),
    CancelFallbackRetry,
    NotifyDegraded,
}

/// Decides which push transport is live. Pure: no I/O and no clocks, the
/// loop feeds it events and executes the returned commands in order.
///
/// The realtime and fallback legs run independent retry loops. A realtime
/// subscription always supersedes the fallback stream.
#[derive(Debug)]
pub struct TransportSupervisor {
    realtime: Leg,
    fallback: Leg,
    realtime_retry: Duration,
    fallback_retry: Duration,
    degraded_notice_sent: bool,
}

impl TransportSupervisor {
    pub fn new(realtime_retry: Duration, fallback_retry: Duration) -> Self {
        Self {
            realtime: Leg::Idle,
            fallback: Leg::Idle,
            realtime_retry,
            fallback_retry,
            degraded_notice_sent: false,
        }
    }

    pub fn state(&self) -> TransportState {
        match (self.realtime, self.fallback) {
            (Leg::Active, _) => TransportState::RealtimeActive,
            (_, Leg::Active) => TransportState::FallbackActive,
            (_, Leg::Connecting) => TransportState::ConnectingFallback,
            (_, Leg::RetryScheduled) => TransportState::Degraded,
            (Leg::Connecting, Leg::Idle) => TransportState::ConnectingRealtime,
            // Realtime retry pending without a fallback leg does not occur.
            (Leg::RetryScheduled, Leg::Idle) => TransportState::Degraded,
            (Leg::Idle, Leg::Idle) => TransportState::Disconnected,
        }
    }

    /// True when deltas from this source should be applied.
    pub fn accepts_fallback(&self) -> bool {
        self.realtime != Leg::Active && matches!(self.fallback, Leg::Connecting | Leg::Active)
    }

    pub fn handle(&mut self, event: SupervisorEvent) -> Vec<TransportCommand> {
        let before = self.state();
        let commands = self.transition(event);
        let after = self.state();
        if before != after {
            info!("Transport state {:?} -> {:?} on {:?}.", before, after, event);
        }
        commands
    }

    fn transition(&mut self, event: SupervisorEvent) -> Vec<TransportCommand> {
        use TransportCommand::*;

        match event {
            SupervisorEvent::Mount => {
                if self.realtime != Leg::Idle || self.fallback != Leg::Idle {
                    return vec![];
                }
                self.realtime = Leg::Connecting;
                vec![Subscribe]
            }
            SupervisorEvent::RealtimeSubscribed => {
                if self.realtime != Leg::Connecting {
                    return vec![];
                }
                self.realtime = Leg::Active;
                self.degraded_notice_sent = false;
                let mut commands = vec![];
                match self.fallback {
                    Leg::Idle => {}
                    Leg::RetryScheduled => commands.push(CancelFallbackRetry),
                    Leg::Connecting | Leg::Active => commands.push(CloseFallback),
                }
                self.fallback = Leg::Idle;
                commands
            }
            SupervisorEvent::RealtimeFailed => {
                if !matches!(self.realtime, Leg::Connecting | Leg::Active) {
                    return vec![];
                }
                self.realtime = Leg::RetryScheduled;
                let mut commands = vec![Unsubscribe];
                if !self.degraded_notice_sent {
                    self.degraded_notice_sent = true;
                    commands.push(NotifyDegraded);
                }
                if self.fallback == Leg::Idle {
                    self.fallback = Leg::Connecting;
                    commands.push(OpenFallback);
                }
                commands.push(ScheduleRealtimeRetry(self.realtime_retry));
                commands
            }
            SupervisorEvent::RealtimeRetryDue => {
                if self.realtime != Leg::RetryScheduled {
                    return vec![];
                }
                self.realtime = Leg::Connecting;
                vec![Subscribe]
            }
            SupervisorEvent::FallbackSnapshot => {
                if self.fallback == Leg::Connecting {
                    self.fallback = Leg::Active;
                }
                vec![]
            }
            SupervisorEvent::FallbackFailed => {
                if !matches!(self.fallback, Leg::Connecting | Leg::Active) {
                    return vec![];
                }
                self.fallback = Leg::RetryScheduled;
                vec![CloseFallback, ScheduleFallbackRetry(self.fallback_retry)]
            }
            SupervisorEvent::FallbackRetryDue => {
                if self.fallback != Leg::RetryScheduled {
                    return vec![];
                }
                if self.realtime == Leg::Active {
                    self.fallback = Leg::Idle;
                    return vec![];
                }
                self.fallback = Leg::Connecting;
                vec![OpenFallback]
            }
            SupervisorEvent::Teardown => {
                self.realtime = Leg::Idle;
                self.fallback = Leg::Idle;
                self.degraded_notice_sent = false;
                vec![Unsubscribe, CloseFallback, CancelRealtimeRetry, CancelFallbackRetry]
            }
        }
    }
}
