//! Core types for the Tether access broker.
//!
//! This crate holds the pieces every other Tether crate needs:
//! identifiers, timestamps, the protocol-level error taxonomy, and the
//! broker configuration.

pub mod config;
pub mod error;
pub mod types;

pub use config::{BrokerConfig, ConfigError, RateLimitConfig};
pub use error::{BrokerError, BrokerResult};
pub use types::{AgentId, CorrelationId, PeerRole, RequestId, SessionId, Timestamp};
