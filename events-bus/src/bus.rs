use crate::error::{EventBusError, Result};
use crate::event::{Event, EventKind};
use crate::subscriber::Subscriber;
use tokio::sync::broadcast;

/// Default number of buffered events per subscriber
pub const DEFAULT_CAPACITY: usize = 64;

/// In-process publish/subscribe channel for change notifications
///
/// Publishing never blocks and never fails for lack of listeners: a UI that
/// is not subscribed simply misses the event and reads the cache on its next
/// render.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(EventBusError::InvalidCapacity(capacity));
        }
        let (sender, _) = broadcast::channel(capacity);
        Ok(Self { sender })
    }

    /// Publish an event; returns how many subscribers received it
    pub fn publish(&self, event: Event) -> usize {
        let kind = event.kind;
        match self.sender.send(event) {
            Ok(receivers) => {
                tracing::debug!(event = %kind, receivers, "Published event");
                receivers
            }
            Err(_) => {
                tracing::trace!(event = %kind, "Published event with no subscribers");
                0
            }
        }
    }

    /// Subscribe to every event
    pub fn subscribe(&self) -> Subscriber {
        Subscriber::new(self.sender.subscribe(), None)
    }

    /// Subscribe to one kind of event
    pub fn subscribe_kind(&self, kind: EventKind) -> Subscriber {
        Subscriber::new(self.sender.subscribe(), Some(kind))
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(DEFAULT_CAPACITY);
        Self { sender }
    }
}
