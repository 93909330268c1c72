//! Message relay for the Tether access broker.
//!
//! The [`ConnectionRegistry`] multiplexes live connections per session
//! and role; the [`ProxyEngine`] runs every crossing message through
//! scope, path, size, and rate policy before forwarding, audits each
//! decision, and keeps the two sides consistent through disconnects,
//! timeouts, and teardown.

pub mod correlation;
pub mod engine;
pub mod message;
pub mod registry;

pub use correlation::CorrelationTracker;
pub use engine::ProxyEngine;
pub use message::{
    error_result, ok_result, path_argument, payload_size, timeout_result, ErrorBody, ResultStatus,
    WireMessage,
};
pub use registry::{open_channel, ChannelConnection, ConnectionHandle, ConnectionRegistry};
