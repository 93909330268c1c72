//! Notification events for the Tether access broker.
//!
//! The broker pushes lifecycle events (access requested, session
//! created/expired/revoked, peer connectivity changes) onto a broadcast
//! bus. The external consent UI subscribes here; nothing in the core
//! consumes these events itself.

pub mod bus;
pub mod event;

pub use bus::{EventBus, EventReceiver, DEFAULT_CHANNEL_CAPACITY};
pub use event::BrokerEvent;
