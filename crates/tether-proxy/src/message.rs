//! Wire messages relayed between the agent and peer sides.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tether_core::{BrokerError, CorrelationId};

/// Status of a `Result` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    /// The command completed successfully.
    Ok,
    /// The command failed; see the error body.
    Error,
    /// No result arrived within the configured window; synthesized by
    /// the broker, not sent by the peer.
    Timeout,
}

/// Structured error carried inside an error `Result`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable machine-readable code (see [`BrokerError::code`]).
    pub code: String,
    /// Human-readable description.
    pub message: String,
}

/// The unit of traffic crossing the broker.
///
/// A closed tagged union; action semantics live entirely inside the
/// opaque `args`/`data` bags, which the broker validates (path, size)
/// but never interprets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    /// Agent to peer: do something.
    Command {
        /// Caller-supplied correlation ID, unique within the session.
        id: CorrelationId,
        /// Action name, classified by the scope catalog.
        action: String,
        /// Opaque argument bag.
        args: serde_json::Value,
    },

    /// Peer to agent: the outcome of a command.
    Result {
        /// Correlation ID of the command being answered.
        id: CorrelationId,
        /// What happened.
        status: ResultStatus,
        /// Success payload, when `status` is `ok`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
        /// Error detail, when `status` is not `ok`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorBody>,
    },

    /// Peer to agent: something happened, unprompted.
    Event {
        /// Event category.
        event: String,
        /// Opaque payload.
        data: serde_json::Value,
    },

    /// Peer to agent: one increment of a streaming result.
    StreamChunk {
        /// Correlation ID of the command being streamed.
        id: CorrelationId,
        /// Position in the stream, starting at zero.
        seq: u64,
        /// Incremental payload.
        delta: serde_json::Value,
        /// Marks the final chunk; closes correlation tracking.
        finished: bool,
    },
}

impl WireMessage {
    /// The message's `type` tag as a string.
    #[must_use]
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::Command { .. } => "command",
            Self::Result { .. } => "result",
            Self::Event { .. } => "event",
            Self::StreamChunk { .. } => "stream_chunk",
        }
    }

    /// The correlation ID, for the variants that carry one.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&CorrelationId> {
        match self {
            Self::Command { id, .. } | Self::Result { id, .. } | Self::StreamChunk { id, .. } => {
                Some(id)
            },
            Self::Event { .. } => None,
        }
    }
}

/// Build a successful `Result`.
#[must_use]
pub fn ok_result(id: CorrelationId, data: serde_json::Value) -> WireMessage {
    WireMessage::Result {
        id,
        status: ResultStatus::Ok,
        data: Some(data),
        error: None,
    }
}

/// Build an error `Result` from a broker error, preserving its stable
/// wire code.
#[must_use]
pub fn error_result(id: CorrelationId, error: &BrokerError) -> WireMessage {
    WireMessage::Result {
        id,
        status: ResultStatus::Error,
        data: None,
        error: Some(ErrorBody {
            code: error.code().to_string(),
            message: error.to_string(),
        }),
    }
}

/// Build the `Result` the broker synthesizes when a command's window
/// elapses with no answer from the peer.
#[must_use]
pub fn timeout_result(id: CorrelationId, timeout_ms: u64) -> WireMessage {
    let error = BrokerError::Timeout { timeout_ms };
    WireMessage::Result {
        id,
        status: ResultStatus::Timeout,
        data: None,
        error: Some(ErrorBody {
            code: error.code().to_string(),
            message: error.to_string(),
        }),
    }
}

/// Extract the `path` argument from a command's argument bag, if one is
/// present. The broker never interprets args beyond this.
#[must_use]
pub fn path_argument(args: &serde_json::Value) -> Option<PathBuf> {
    args.get("path")
        .and_then(serde_json::Value::as_str)
        .map(PathBuf::from)
}

/// Serialized size of an argument bag, for the payload limit check.
#[must_use]
pub fn payload_size(args: &serde_json::Value) -> usize {
    serde_json::to_vec(args).map_or(0, |bytes| bytes.len())
}
