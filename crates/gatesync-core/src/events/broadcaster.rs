//! Lifecycle event broadcaster.
//!
//! The `EventBroadcaster` is the bus the gateway reactor publishes API
//! lifecycle changes on. It uses tokio's broadcast channel so several
//! listeners (the key cache service among them) can subscribe.

use std::sync::Arc;
use tokio::sync::broadcast;

use super::types::LifecycleEvent;
use crate::model::Api;

/// Default buffer size for the broadcast channel.
/// Events beyond this limit will cause older events to be dropped for slow receivers.
const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Broadcaster for lifecycle events.
///
/// Cheap to clone; all clones share the same channel.
#[derive(Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl EventBroadcaster {
    /// Create a new broadcaster with default buffer size.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_SIZE)
    }

    /// Create a new broadcaster with custom buffer size.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Create a new broadcaster wrapped in an Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Send an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event.
    /// Returns 0 if there are no active subscribers.
    pub fn send(&self, event: LifecycleEvent) -> usize {
        self.sender.send(event).unwrap_or_default()
    }

    pub fn send_deploy(&self, api: Api) -> usize {
        self.send(LifecycleEvent::deploy(api))
    }

    pub fn send_undeploy(&self, api: Api) -> usize {
        self.send(LifecycleEvent::undeploy(api))
    }

    pub fn send_update(&self, api: Api) -> usize {
        self.send(LifecycleEvent::update(api))
    }

    /// Subscribe to events.
    ///
    /// Events sent before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBroadcaster")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
