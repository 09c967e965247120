//! Settings update events.

use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 64;

/// Broadcast when a runtime setting changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsUpdateEvent {
    Changed { key: String },
}

/// Cloneable sender for [`SettingsUpdateEvent`]s.
#[derive(Debug, Clone)]
pub struct SettingsEventBroadcaster {
    sender: broadcast::Sender<SettingsUpdateEvent>,
}

impl SettingsEventBroadcaster {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: SettingsUpdateEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SettingsUpdateEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for SettingsEventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
