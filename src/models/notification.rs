use crossbeam_channel::Sender;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationAction {
    pub label: String,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub description: Option<String>,
    pub action: Option<NotificationAction>,
}

impl Notification {
    pub fn info(title: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Info, title)
    }

    pub fn success(title: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Success, title)
    }

    pub fn error(title: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Error, title)
    }

    fn new(level: NotificationLevel, title: impl Into<String>) -> Self {
        Self {
            level,
            title: title.into(),
            description: None,
            action: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_action(mut self, label: impl Into<String>, target: impl Into<String>) -> Self {
        self.action = Some(NotificationAction {
            label: label.into(),
            target: target.into(),
        });
        self
    }
}

/// Where notifications end up. The terminal front end drains a channel;
/// embedding apps may render them however they like.
pub trait NotificationSink: Send {
    fn notify(&self, notification: Notification);
}

impl NotificationSink for Sender<Notification> {
    fn notify(&self, notification: Notification) {
        // A dropped receiver just means nobody is watching anymore.
        let _ = self.send(notification);
    }
}
