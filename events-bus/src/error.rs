use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EventBusError {
    #[error("Event channel closed")]
    ChannelClosed,

    #[error("Subscriber lagged behind and missed {0} events")]
    Lagged(u64),

    #[error("Invalid event bus capacity: {0}")]
    InvalidCapacity(usize),
}

pub type Result<T> = std::result::Result<T, EventBusError>;
