//! The Tether access broker facade.
//!
//! Ties the session store, policy engine, connection registry, event
//! bus, and audit sink together behind one [`Broker`]: management
//! operations gated by an administrative credential, session-bound
//! duplex channels gated by session tokens, and a background sweep
//! retiring expired sessions and stale requests.

pub mod broker;
mod sweeper;

pub use broker::{AgentChannel, Broker, PeerChannel};
