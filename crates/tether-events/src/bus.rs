//! Broadcast bus delivering broker events to subscribers.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{trace, warn};

use crate::event::BrokerEvent;

/// Default channel capacity for the event bus.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Event bus for broadcasting broker events to all subscribers.
///
/// Events are delivered asynchronously and in publish order. A slow
/// subscriber that falls more than the channel capacity behind loses
/// the oldest events (and is told how many).
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<BrokerEvent>>,
    capacity: usize,
}

impl EventBus {
    /// Create a new event bus with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with the given capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender, capacity }
    }

    /// Publish an event to all subscribers.
    ///
    /// Returns the number of receivers that got the event. Publishing
    /// with no subscribers is not an error; the event is simply gone.
    pub fn publish(&self, event: BrokerEvent) -> usize {
        let event = Arc::new(event);
        trace!(event_type = %event.event_type(), "publishing broker event");
        self.sender.send(event).unwrap_or(0)
    }

    /// Subscribe to all events.
    #[must_use]
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver::new(self.sender.subscribe(), None)
    }

    /// Subscribe to events of a single kind, matched against
    /// [`BrokerEvent::event_type`] (e.g. `"session_created"`).
    #[must_use]
    pub fn subscribe_kind(&self, kind: impl Into<String>) -> EventReceiver {
        EventReceiver::new(self.sender.subscribe(), Some(kind.into()))
    }

    /// Current number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Channel capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver for events from the bus, optionally filtered by kind.
pub struct EventReceiver {
    receiver: broadcast::Receiver<Arc<BrokerEvent>>,
    kind: Option<String>,
}

impl EventReceiver {
    fn new(receiver: broadcast::Receiver<Arc<BrokerEvent>>, kind: Option<String>) -> Self {
        Self { receiver, kind }
    }

    fn matches(&self, event: &BrokerEvent) -> bool {
        self.kind
            .as_deref()
            .is_none_or(|kind| event.event_type() == kind)
    }

    /// Receive the next matching event.
    ///
    /// Returns `None` once the bus is dropped. Lagging (missing events
    /// because the receiver fell behind) is logged and skipped over.
    pub async fn recv(&mut self) -> Option<Arc<BrokerEvent>> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.matches(&event) {
                        return Some(event);
                    }
                },
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!(skipped = count, "event receiver lagged, events dropped");
                },
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Receive the next matching event without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<BrokerEvent>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.matches(&event) {
                        return Some(event);
                    }
                },
                Err(broadcast::error::TryRecvError::Lagged(count)) => {
                    warn!(skipped = count, "event receiver lagged, events dropped");
                },
                Err(
                    broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed,
                ) => return None,
            }
        }
    }
}
