use crate::error::{EventBusError, Result};
use crate::event::{Event, EventKind};
use futures::{Stream, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

/// Receiving end of an [`EventBus`](crate::EventBus) subscription
pub struct Subscriber {
    receiver: broadcast::Receiver<Event>,
    kind: Option<EventKind>,
}

impl Subscriber {
    pub(crate) fn new(receiver: broadcast::Receiver<Event>, kind: Option<EventKind>) -> Self {
        Self { receiver, kind }
    }

    fn accepts(&self, event: &Event) -> bool {
        self.kind.map_or(true, |kind| kind == event.kind)
    }

    /// Wait for the next matching event
    pub async fn recv(&mut self) -> Result<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.accepts(&event) => return Ok(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(missed)) => return Err(EventBusError::Lagged(missed)),
                Err(RecvError::Closed) => return Err(EventBusError::ChannelClosed),
            }
        }
    }

    /// Take the next matching event if one is already buffered
    pub fn try_recv(&mut self) -> Result<Option<Event>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.accepts(&event) => return Ok(Some(event)),
                Ok(_) => continue,
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Lagged(missed)) => return Err(EventBusError::Lagged(missed)),
                Err(TryRecvError::Closed) => return Err(EventBusError::ChannelClosed),
            }
        }
    }

    /// Convert into a stream of matching events; lag is logged and skipped
    pub fn into_stream(self) -> impl Stream<Item = Event> {
        let kind = self.kind;
        BroadcastStream::new(self.receiver).filter_map(move |item| async move {
            match item {
                Ok(event) if kind.map_or(true, |k| k == event.kind) => Some(event),
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Event subscriber lagged");
                    None
                }
            }
        })
    }
}
