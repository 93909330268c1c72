//! The proxy engine: policy enforcement and message relay.
//!
//! Every message crossing the broker passes through here. The engine
//! owns no session state of its own beyond soft degraded flags and
//! correlation tracking; it consults the session store, policy checks,
//! and rate limiter, then either forwards through the connection
//! registry or answers with a structured error. Every command decision
//! lands in the audit sink, allowed or not.

use chrono::Utc;
use dashmap::DashSet;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tether_audit::{payload_digest, record_or_log, AuditOutcome, AuditRecord, AuditSink};
use tether_core::{BrokerConfig, BrokerError, CorrelationId, PeerRole, SessionId};
use tether_events::{BrokerEvent, EventBus};
use tether_policy::{required_scope, validate_path, validate_payload_size, RateLimiter};
use tether_session::{SessionStatus, SessionStore};
use tracing::{debug, warn};

use crate::correlation::CorrelationTracker;
use crate::message::{
    error_result, path_argument, payload_size, timeout_result, WireMessage,
};
use crate::registry::{ConnectionHandle, ConnectionRegistry};

/// Policy-enforcing relay between the agent and peer sides of every
/// active session.
pub struct ProxyEngine {
    store: Arc<SessionStore>,
    registry: Arc<ConnectionRegistry>,
    limiter: Arc<RateLimiter>,
    audit: Arc<dyn AuditSink>,
    events: EventBus,
    correlations: CorrelationTracker,
    /// Sessions whose peer side is currently unreachable. Soft state:
    /// cleared on reconnect, never written to the session store.
    degraded: DashSet<SessionId>,
    max_payload_bytes: usize,
    command_timeout: Duration,
}

impl ProxyEngine {
    /// Build an engine over the shared broker components.
    #[must_use]
    pub fn new(
        store: Arc<SessionStore>,
        registry: Arc<ConnectionRegistry>,
        limiter: Arc<RateLimiter>,
        audit: Arc<dyn AuditSink>,
        events: EventBus,
        config: &BrokerConfig,
    ) -> Self {
        Self {
            store,
            registry,
            limiter,
            audit,
            events,
            correlations: CorrelationTracker::new(),
            degraded: DashSet::new(),
            max_payload_bytes: config.max_payload_bytes,
            command_timeout: Duration::from_secs(config.command_timeout_secs),
        }
    }

    /// Whether a session's peer side is currently unreachable.
    #[must_use]
    pub fn is_degraded(&self, session: &SessionId) -> bool {
        self.degraded.contains(session)
    }

    /// Bind a connection to a session slot. Returns whether a live
    /// binding was replaced.
    ///
    /// A peer reconnecting to a degraded session clears the degraded
    /// flag and resumes normal forwarding.
    pub fn connect(
        &self,
        session: &SessionId,
        role: PeerRole,
        handle: Arc<dyn ConnectionHandle>,
    ) -> bool {
        let replaced = self.registry.register(session, role, handle);
        if role == PeerRole::Peer && self.degraded.remove(session).is_some() {
            debug!(session_id = %session, "peer reconnected, session no longer degraded");
            self.events.publish(BrokerEvent::PeerReconnected {
                session_id: session.clone(),
                role,
            });
        }
        replaced
    }

    /// Drop a connection binding. A peer-side drop marks the session
    /// degraded (the session itself stays alive); an agent-side drop
    /// just means results are discarded until it returns.
    pub fn disconnect(&self, session: &SessionId, role: PeerRole) {
        self.registry.unregister(session, role);
        if role == PeerRole::Peer && self.degraded.insert(session.clone()) {
            warn!(session_id = %session, "peer disconnected, session degraded");
            self.events.publish(BrokerEvent::PeerDisconnected {
                session_id: session.clone(),
                role,
            });
        }
    }

    /// Process a command arriving from the agent side.
    ///
    /// Returns `Some(result)` when the broker answers directly (any
    /// policy denial or delivery failure); `None` when the command was
    /// forwarded and the peer's answer will arrive on the agent's
    /// receive channel. Every outcome is audited.
    pub fn handle_command(
        self: &Arc<Self>,
        session_id: &SessionId,
        token: &str,
        id: CorrelationId,
        action: &str,
        args: serde_json::Value,
    ) -> Option<WireMessage> {
        let started = Instant::now();
        let actor = self
            .store
            .lookup(session_id)
            .map_or_else(|| "unknown".to_string(), |info| info.agent_id.as_str().to_string());
        let digest = payload_digest(&args);

        if !self.store.verify(session_id, token) {
            let err = BrokerError::unauthenticated("invalid or expired session token");
            return Some(self.deny(session_id, &actor, action, &digest, started, id, &err));
        }

        let Some(session) = self.store.session(session_id) else {
            // Swept between verify and fetch; answer as expired.
            let err = BrokerError::unauthenticated("session no longer exists");
            return Some(self.deny(session_id, &actor, action, &digest, started, id, &err));
        };

        let admission = self.limiter.admit(session_id, Utc::now());
        if let Some(retry_after) = admission.retry_after() {
            let err = BrokerError::RateLimited {
                retry_after_secs: u64::try_from(retry_after.num_seconds().max(1)).unwrap_or(1),
            };
            return Some(self.deny(session_id, &actor, action, &digest, started, id, &err));
        }

        match required_scope(action) {
            Some(scope) if session.has_scope(scope) => {},
            _ => {
                let err = BrokerError::forbidden(format!("scope not granted for action {action}"));
                return Some(self.deny(session_id, &actor, action, &digest, started, id, &err));
            },
        }

        if let Some(path) = path_argument(&args) {
            if !validate_path(&path, &session.roots) {
                let err = BrokerError::forbidden("path outside approved roots");
                return Some(self.deny(session_id, &actor, action, &digest, started, id, &err));
            }
        }

        if !validate_payload_size(payload_size(&args), self.max_payload_bytes) {
            let err = BrokerError::forbidden("payload exceeds size limit");
            return Some(self.deny(session_id, &actor, action, &digest, started, id, &err));
        }

        if self.degraded.contains(session_id) {
            let err = BrokerError::PeerUnreachable;
            return Some(self.deny(session_id, &actor, action, &digest, started, id, &err));
        }

        if !self.correlations.begin(session_id, &id) {
            let err = BrokerError::InvalidState {
                reason: format!("correlation id {id} is already outstanding"),
            };
            return Some(self.deny(session_id, &actor, action, &digest, started, id, &err));
        }

        self.store.touch(session_id);
        let command = WireMessage::Command {
            id: id.clone(),
            action: action.to_string(),
            args,
        };
        if !self.registry.send(session_id, PeerRole::Peer, command) {
            self.correlations.complete(session_id, &id);
            if self.degraded.insert(session_id.clone()) {
                warn!(session_id = %session_id, "peer unreachable, session degraded");
                self.events.publish(BrokerEvent::PeerDisconnected {
                    session_id: session_id.clone(),
                    role: PeerRole::Peer,
                });
            }
            let err = BrokerError::PeerUnreachable;
            return Some(self.deny(session_id, &actor, action, &digest, started, id, &err));
        }

        self.spawn_timeout(session_id.clone(), id);
        record_or_log(
            self.audit.as_ref(),
            AuditRecord::new(Some(session_id.clone()), actor, action, AuditOutcome::Allowed)
                .with_payload_digest(digest)
                .with_latency_ms(elapsed_ms(started)),
        );
        None
    }

    /// Process a message arriving from the peer side.
    ///
    /// The peer authenticated at attach time, so no token travels with
    /// each message; the session must still resolve to an active one.
    /// Anomalies (unknown session, unmatched or replayed correlation)
    /// are dropped and audited, never forwarded.
    pub fn handle_peer_message(&self, session_id: &SessionId, message: WireMessage) {
        let Some(info) = self.store.lookup(session_id) else {
            self.audit_anomaly(None, "anomaly.unknown_session");
            return;
        };
        if info.status != SessionStatus::Active || info.expires_at.0 <= Utc::now() {
            self.audit_anomaly(Some(session_id.clone()), "anomaly.inactive_session");
            return;
        }

        match &message {
            WireMessage::Result { id, .. } => {
                if !self.correlations.complete(session_id, id) {
                    self.audit_anomaly(Some(session_id.clone()), "anomaly.unmatched_correlation");
                    return;
                }
            },
            WireMessage::StreamChunk { id, finished, .. } => {
                if !self.correlations.is_pending(session_id, id) {
                    self.audit_anomaly(Some(session_id.clone()), "anomaly.unmatched_correlation");
                    return;
                }
                if *finished {
                    self.correlations.complete(session_id, id);
                }
            },
            WireMessage::Event { .. } => {},
            WireMessage::Command { .. } => {
                // Commands only flow agent to peer.
                self.audit_anomaly(Some(session_id.clone()), "anomaly.command_from_peer");
                return;
            },
        }

        if self.registry.send(session_id, PeerRole::Agent, message) {
            self.store.touch(session_id);
        } else {
            // The agent being gone is not a peer-visible error.
            debug!(session_id = %session_id, "agent unreachable, message discarded");
        }
    }

    /// Tear down a session's connections after expiry or revocation.
    ///
    /// Each still-reachable side gets a closing notification before its
    /// binding is removed; outstanding correlations are abandoned and
    /// the rate-limit bucket released.
    pub fn teardown(&self, session_id: &SessionId, reason: &str) {
        for role in [PeerRole::Agent, PeerRole::Peer] {
            if self.registry.is_connected(session_id, role) {
                let closing = WireMessage::Event {
                    event: "session_closed".to_string(),
                    data: json!({ "reason": reason }),
                };
                self.registry.send(session_id, role, closing);
            }
            self.registry.unregister(session_id, role);
        }

        let abandoned = self.correlations.abandon_session(session_id);
        if abandoned > 0 {
            debug!(session_id = %session_id, abandoned, "abandoned outstanding correlations");
        }
        self.limiter.reset(session_id);
        self.degraded.remove(session_id);

        record_or_log(
            self.audit.as_ref(),
            AuditRecord::new(
                Some(session_id.clone()),
                "broker",
                "session_closed",
                AuditOutcome::Allowed,
            ),
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn deny(
        &self,
        session_id: &SessionId,
        actor: &str,
        action: &str,
        digest: &str,
        started: Instant,
        id: CorrelationId,
        error: &BrokerError,
    ) -> WireMessage {
        debug!(
            session_id = %session_id,
            action,
            code = error.code(),
            "command rejected"
        );
        let outcome = match error {
            BrokerError::Forbidden { reason } => AuditOutcome::denied(reason.clone()),
            BrokerError::RateLimited { .. } => AuditOutcome::denied("rate limit exceeded"),
            other => AuditOutcome::error(other.code()),
        };
        record_or_log(
            self.audit.as_ref(),
            AuditRecord::new(Some(session_id.clone()), actor, action, outcome)
                .with_payload_digest(digest)
                .with_latency_ms(elapsed_ms(started)),
        );
        error_result(id, error)
    }

    fn audit_anomaly(&self, session_id: Option<SessionId>, action: &str) {
        warn!(session_id = ?session_id, action, "dropped anomalous peer message");
        record_or_log(
            self.audit.as_ref(),
            AuditRecord::new(session_id, "peer", action, AuditOutcome::error("anomaly")),
        );
    }

    /// Arm the per-command timeout. If the correlation is still
    /// outstanding when the window elapses, the broker synthesizes a
    /// timeout result; the real answer, should it ever arrive, is then
    /// an anomaly.
    fn spawn_timeout(self: &Arc<Self>, session_id: SessionId, id: CorrelationId) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(engine.command_timeout).await;
            if engine.correlations.complete(&session_id, &id) {
                let timeout_ms =
                    u64::try_from(engine.command_timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(session_id = %session_id, correlation_id = %id, timeout_ms, "command timed out");
                engine.registry.send(
                    &session_id,
                    PeerRole::Agent,
                    timeout_result(id, timeout_ms),
                );
                record_or_log(
                    engine.audit.as_ref(),
                    AuditRecord::new(
                        Some(session_id),
                        "broker",
                        "command_timeout",
                        AuditOutcome::error("timeout"),
                    ),
                );
            }
        });
    }
}

impl std::fmt::Debug for ProxyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyEngine")
            .field("degraded", &self.degraded.len())
            .field("outstanding", &self.correlations.outstanding())
            .finish_non_exhaustive()
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
