use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub from_id: String,
    /// Recipient account.
    pub to_id: String,
    /// Entity the notification is about, e.g. `schedules/{id}`.
    pub link: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("delivery to {to} failed: {message}")]
    Delivery { to: String, message: String },
}

/// Outbound notifications. Delivery is best effort.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, notification: Notification) -> Result<(), NotifyError>;
}

/// Broadcast hub with one channel per recipient account.
pub struct NotifyHub {
    channels: DashMap<String, broadcast::Sender<Notification>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to notifications for an account. Creates the channel if needed.
    pub fn subscribe(&self, account_id: &str) -> broadcast::Receiver<Notification> {
        let sender = self
            .channels
            .entry(account_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }
}

#[async_trait]
impl NotificationSender for NotifyHub {
    /// No-op if nobody is listening. A channel whose receivers are all gone
    /// is dropped on the next send.
    async fn send(&self, notification: Notification) -> Result<(), NotifyError> {
        let to_id = notification.to_id.clone();
        let delivered = match self.channels.get(&to_id) {
            Some(sender) => sender.send(notification).is_ok(),
            None => return Ok(()),
        };
        if !delivered {
            self.channels
                .remove_if(&to_id, |_, sender| sender.receiver_count() == 0);
        }
        Ok(())
    }
}
