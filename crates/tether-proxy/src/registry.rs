//! Connection bookkeeping: who is reachable, per session and role.
//!
//! Pure transport multiplexing. The registry tracks liveness and
//! delivers messages; it never reads or writes session state. Deciding
//! what a delivery failure *means* is the proxy engine's job.

use dashmap::DashMap;
use std::sync::Arc;
use tether_core::{PeerRole, SessionId};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::message::WireMessage;

/// One live transport connection bound to a (session, role) slot.
///
/// Delivery must fail fast: a handle whose consumer is gone or whose
/// buffer is full returns `false` instead of blocking.
pub trait ConnectionHandle: Send + Sync {
    /// Attempt delivery. Never blocks.
    fn deliver(&self, message: WireMessage) -> bool;

    /// Whether the far side can still receive.
    fn is_alive(&self) -> bool;
}

/// Default buffer depth for in-process connections.
pub const CHANNEL_CAPACITY: usize = 64;

/// In-process connection backed by a bounded `mpsc` channel.
///
/// A network gateway would implement [`ConnectionHandle`] over its own
/// transport; inside one process the channel is the transport.
pub struct ChannelConnection {
    sender: mpsc::Sender<WireMessage>,
}

impl ConnectionHandle for ChannelConnection {
    fn deliver(&self, message: WireMessage) -> bool {
        // try_send fails both when the receiver is dropped and when the
        // buffer is full; either way the peer is not keeping up.
        self.sender.try_send(message).is_ok()
    }

    fn is_alive(&self) -> bool {
        !self.sender.is_closed()
    }
}

impl std::fmt::Debug for ChannelConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelConnection")
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Open a new in-process connection, returning the handle (for the
/// registry) and the receiving end (for the connected peer).
#[must_use]
pub fn open_channel() -> (Arc<ChannelConnection>, mpsc::Receiver<WireMessage>) {
    let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
    (Arc::new(ChannelConnection { sender }), receiver)
}

/// Maps (session, role) to the live connection handle for that slot.
///
/// At most one handle per slot. A new registration replaces the old
/// binding; the replacement is logged and reported to the caller.
#[derive(Default)]
pub struct ConnectionRegistry {
    bindings: DashMap<(SessionId, PeerRole), Arc<dyn ConnectionHandle>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a handle to a slot. Returns whether a prior live handle was
    /// replaced.
    pub fn register(
        &self,
        session: &SessionId,
        role: PeerRole,
        handle: Arc<dyn ConnectionHandle>,
    ) -> bool {
        let previous = self.bindings.insert((session.clone(), role), handle);
        let replaced = previous.is_some_and(|old| old.is_alive());
        if replaced {
            warn!(session_id = %session, %role, "replaced a live connection binding");
        } else {
            debug!(session_id = %session, %role, "connection registered");
        }
        replaced
    }

    /// Remove a binding. Idempotent.
    pub fn unregister(&self, session: &SessionId, role: PeerRole) {
        if self.bindings.remove(&(session.clone(), role)).is_some() {
            debug!(session_id = %session, %role, "connection unregistered");
        }
    }

    /// Deliver a message to the slot's handle.
    ///
    /// On failure the dead handle is unregistered and `false` is
    /// returned. No retry, no session-state side effects.
    pub fn send(&self, session: &SessionId, role: PeerRole, message: WireMessage) -> bool {
        let key = (session.clone(), role);
        let delivered = self
            .bindings
            .get(&key)
            .is_some_and(|handle| handle.deliver(message));
        if !delivered {
            self.bindings.remove(&key);
        }
        delivered
    }

    /// Whether the slot holds a live handle.
    #[must_use]
    pub fn is_connected(&self, session: &SessionId, role: PeerRole) -> bool {
        self.bindings
            .get(&(session.clone(), role))
            .is_some_and(|handle| handle.is_alive())
    }

    /// Number of currently bound slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether no slots are bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("bindings", &self.bindings.len())
            .finish()
    }
}
