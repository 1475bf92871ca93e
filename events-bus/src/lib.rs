//! Change-notification bus for Rollcall
//!
//! The cache-first reader and the role service publish scoped events when
//! cached content genuinely changes; UI layers subscribe and re-render.
//!
//! # Event Types
//!
//! - **data-refreshed**: a `(section, resource)` store was replaced
//! - **logs-refreshed**: a section's audit log store was replaced
//! - **role-refreshed**: a user's cached role assignment changed
//!
//! # Example
//!
//! ```rust
//! use events_bus::{Event, EventBus, EventKind};
//!
//! # async fn demo() -> Result<(), events_bus::EventBusError> {
//! let bus = EventBus::new(16)?;
//! let mut subscriber = bus.subscribe_kind(EventKind::DataRefreshed);
//!
//! bus.publish(Event::data_refreshed("company", "members"));
//!
//! let event = subscriber.recv().await?;
//! assert!(event.concerns("company", "members"));
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod error;
pub mod event;
pub mod subscriber;

pub use bus::*;
pub use error::*;
pub use event::*;
pub use subscriber::*;
