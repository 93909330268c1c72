//! The broker facade: approval workflow, management surface, and
//! session-bound channels.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tether_audit::{record_or_log, AuditOutcome, AuditRecord, AuditSink};
use tether_core::{
    AgentId, BrokerConfig, BrokerError, BrokerResult, ConfigError, CorrelationId, PeerRole,
    RequestId, SessionId,
};
use tether_events::{BrokerEvent, EventBus, EventReceiver};
use tether_policy::{RateLimiter, Scope};
use tether_proxy::{open_channel, ConnectionRegistry, ProxyEngine, WireMessage};
use tether_session::{
    mint_token, AccessRequest, ApprovedSession, RequestStatus, SessionInfo, SessionStore, TokenHash,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::sweeper::spawn_sweeper;

/// The Tether access broker.
///
/// One instance owns the session store, connection registry, policy
/// state, event bus, and background sweep. Management operations
/// require the administrative credential minted at [`Broker::launch`];
/// session-bound operations require a session token.
pub struct Broker {
    store: Arc<SessionStore>,
    engine: Arc<ProxyEngine>,
    events: EventBus,
    audit: Arc<dyn AuditSink>,
    admin_hash: TokenHash,
    shutdown: watch::Sender<bool>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Broker {
    /// Validate the configuration, assemble the broker, and start the
    /// background sweep.
    ///
    /// Returns the broker and the plaintext administrative credential.
    /// The credential is returned exactly once; only its hash is kept.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a configuration value is out
    /// of range.
    pub fn launch(
        config: BrokerConfig,
        audit: Arc<dyn AuditSink>,
    ) -> Result<(Arc<Self>, String), ConfigError> {
        config.validate()?;

        let store = Arc::new(SessionStore::new(&config));
        let registry = Arc::new(ConnectionRegistry::new());
        let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
        let events = EventBus::with_capacity(config.event_capacity);
        let engine = Arc::new(ProxyEngine::new(
            Arc::clone(&store),
            registry,
            limiter,
            Arc::clone(&audit),
            events.clone(),
            &config,
        ));

        let (admin_token, admin_hash) = mint_token();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let sweeper = spawn_sweeper(
            Arc::clone(&store),
            Arc::clone(&engine),
            events.clone(),
            config.sweep_interval_secs,
            shutdown_rx,
        );

        info!(
            max_active_sessions = config.max_active_sessions,
            sweep_interval_secs = config.sweep_interval_secs,
            "broker started"
        );
        let broker = Arc::new(Self {
            store,
            engine,
            events,
            audit,
            admin_hash,
            shutdown,
            sweeper: Mutex::new(Some(sweeper)),
        });
        Ok((broker, admin_token))
    }

    /// Stop the background sweep. Sessions stay in memory but are no
    /// longer expired; intended for orderly teardown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        if let Ok(mut guard) = self.sweeper.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
        info!("broker stopped");
    }

    fn verify_admin(&self, credential: &str) -> BrokerResult<()> {
        if self.admin_hash.verify(credential) {
            Ok(())
        } else {
            Err(BrokerError::unauthenticated("invalid management credential"))
        }
    }

    // Management surface.

    /// Create a pending access request.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Unauthenticated`] for a bad credential and
    /// [`BrokerError::Forbidden`] when a requested scope is not in the
    /// catalog.
    pub fn request_access(
        &self,
        credential: &str,
        agent_id: AgentId,
        scopes: &[String],
        roots: Vec<PathBuf>,
        reason: String,
    ) -> BrokerResult<RequestId> {
        self.verify_admin(credential)?;

        let scopes = match Scope::parse_all(scopes) {
            Ok(scopes) => scopes,
            Err(invalid) => {
                let reason = format!("unknown scopes: {}", invalid.join(", "));
                record_or_log(
                    self.audit.as_ref(),
                    AuditRecord::new(
                        None,
                        agent_id.as_str(),
                        "request_access",
                        AuditOutcome::denied(reason.clone()),
                    ),
                );
                return Err(BrokerError::forbidden(reason));
            },
        };
        let request = self
            .store
            .create_access_request(agent_id, scopes, roots, reason);

        self.events.publish(BrokerEvent::AccessRequest {
            request_id: request.id.clone(),
            agent_id: request.agent_id.clone(),
            scopes: request.scopes.iter().map(|s| s.as_str().to_string()).collect(),
            reason: request.reason.clone(),
        });
        record_or_log(
            self.audit.as_ref(),
            AuditRecord::new(
                None,
                request.agent_id.as_str(),
                "request_access",
                AuditOutcome::Allowed,
            ),
        );
        Ok(request.id)
    }

    /// List access requests, optionally filtered by status.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Unauthenticated`] for a bad credential.
    pub fn list_requests(
        &self,
        credential: &str,
        status: Option<RequestStatus>,
        limit: usize,
        offset: usize,
    ) -> BrokerResult<Vec<AccessRequest>> {
        self.verify_admin(credential)?;
        Ok(self.store.list_requests(status, limit, offset))
    }

    /// Approve a pending request, creating a session.
    ///
    /// `scopes` narrows the grant; `None` grants everything requested.
    /// The response is the only place the session token ever appears in
    /// plaintext.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Unauthenticated`] for a bad credential,
    /// [`BrokerError::Forbidden`] for scope strings outside the catalog,
    /// and the session store's `NotFound`/`InvalidState`/`LimitExceeded`
    /// errors.
    pub fn approve(
        &self,
        credential: &str,
        request_id: &RequestId,
        scopes: Option<&[String]>,
        ttl_secs: Option<u64>,
    ) -> BrokerResult<ApprovedSession> {
        self.verify_admin(credential)?;

        let narrowed = match scopes {
            Some(raw) => match Scope::parse_all(raw) {
                Ok(parsed) => Some(parsed),
                Err(invalid) => {
                    let reason = format!("unknown scopes: {}", invalid.join(", "));
                    record_or_log(
                        self.audit.as_ref(),
                        AuditRecord::new(None, "admin", "approve", AuditOutcome::denied(reason.clone())),
                    );
                    return Err(BrokerError::forbidden(reason));
                },
            },
            None => None,
        };
        let approved = self.store.approve(request_id, narrowed, ttl_secs)?;

        let info = self
            .store
            .lookup(&approved.session_id)
            .ok_or_else(|| BrokerError::Internal("approved session missing".to_string()))?;
        self.events.publish(BrokerEvent::SessionCreated {
            session_id: approved.session_id.clone(),
            agent_id: info.agent_id.clone(),
            scopes: approved.scopes.iter().map(|s| s.as_str().to_string()).collect(),
            expires_at: approved.expires_at,
        });
        record_or_log(
            self.audit.as_ref(),
            AuditRecord::new(
                Some(approved.session_id.clone()),
                "admin",
                "approve",
                AuditOutcome::Allowed,
            ),
        );
        Ok(approved)
    }

    /// Deny a pending request.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Unauthenticated`] for a bad credential and
    /// the session store's `NotFound`/`InvalidState` errors.
    pub fn deny(&self, credential: &str, request_id: &RequestId, reason: String) -> BrokerResult<()> {
        self.verify_admin(credential)?;
        self.store.deny(request_id)?;

        self.events.publish(BrokerEvent::RequestDenied {
            request_id: request_id.clone(),
            reason,
        });
        record_or_log(
            self.audit.as_ref(),
            AuditRecord::new(None, "admin", "deny", AuditOutcome::Allowed),
        );
        Ok(())
    }

    /// Revoke a session. Idempotent: revoking an already terminal
    /// session is a logged no-op.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Unauthenticated`] for a bad credential and
    /// [`BrokerError::NotFound`] for an unknown session.
    pub fn revoke(&self, credential: &str, session_id: &SessionId, reason: String) -> BrokerResult<()> {
        self.verify_admin(credential)?;
        if self.store.lookup(session_id).is_none() {
            return Err(BrokerError::NotFound {
                what: session_id.to_string(),
            });
        }

        if self.store.revoke(session_id) {
            self.engine.teardown(session_id, "revoked");
            self.events.publish(BrokerEvent::SessionRevoked {
                session_id: session_id.clone(),
                reason,
            });
            record_or_log(
                self.audit.as_ref(),
                AuditRecord::new(
                    Some(session_id.clone()),
                    "admin",
                    "revoke",
                    AuditOutcome::Allowed,
                ),
            );
        } else {
            debug!(session_id = %session_id, "revoke of a terminal session, no-op");
        }
        Ok(())
    }

    /// List all sessions. Token material is never included.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Unauthenticated`] for a bad credential.
    pub fn list_sessions(&self, credential: &str) -> BrokerResult<Vec<SessionInfo>> {
        self.verify_admin(credential)?;
        Ok(self.store.list_sessions())
    }

    /// Subscribe to the broker's notification stream.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Unauthenticated`] for a bad credential.
    pub fn subscribe(&self, credential: &str) -> BrokerResult<EventReceiver> {
        self.verify_admin(credential)?;
        Ok(self.events.subscribe())
    }

    /// Subscribe to one event kind only (e.g. `"access_request"`).
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Unauthenticated`] for a bad credential.
    pub fn subscribe_kind(&self, credential: &str, kind: &str) -> BrokerResult<EventReceiver> {
        self.verify_admin(credential)?;
        Ok(self.events.subscribe_kind(kind))
    }

    // Session-bound surface.

    /// Attach the agent side of a session.
    ///
    /// The token is verified here and re-verified on every command.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Unauthenticated`] for an invalid or
    /// expired token.
    pub fn attach_agent(
        self: &Arc<Self>,
        session_id: &SessionId,
        token: &str,
    ) -> BrokerResult<AgentChannel> {
        if !self.store.verify(session_id, token) {
            return Err(BrokerError::unauthenticated("invalid or expired session token"));
        }
        let (handle, receiver) = open_channel();
        self.engine.connect(session_id, PeerRole::Agent, handle);
        Ok(AgentChannel {
            engine: Arc::clone(&self.engine),
            session_id: session_id.clone(),
            token: token.to_string(),
            receiver,
        })
    }

    /// Attach the peer (plugin/executor) side of a session.
    ///
    /// The token is verified once here; messages on this side carry no
    /// credential.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Unauthenticated`] for an invalid or
    /// expired token.
    pub fn attach_peer(
        self: &Arc<Self>,
        session_id: &SessionId,
        token: &str,
    ) -> BrokerResult<PeerChannel> {
        if !self.store.verify(session_id, token) {
            return Err(BrokerError::unauthenticated("invalid or expired session token"));
        }
        let (handle, receiver) = open_channel();
        self.engine.connect(session_id, PeerRole::Peer, handle);
        Ok(PeerChannel {
            engine: Arc::clone(&self.engine),
            session_id: session_id.clone(),
            receiver,
        })
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("active_sessions", &self.store.active_count())
            .finish_non_exhaustive()
    }
}

/// The agent side of an attached session: issues commands, consumes
/// results, events, and stream chunks.
pub struct AgentChannel {
    engine: Arc<ProxyEngine>,
    session_id: SessionId,
    token: String,
    receiver: mpsc::Receiver<WireMessage>,
}

impl AgentChannel {
    /// Issue a command.
    ///
    /// Returns `Some(result)` when the broker answers directly (a
    /// policy denial or unreachable peer); `None` when the command was
    /// forwarded and the answer will arrive via [`AgentChannel::recv`].
    pub fn send_command(
        &self,
        id: CorrelationId,
        action: &str,
        args: serde_json::Value,
    ) -> Option<WireMessage> {
        self.engine
            .handle_command(&self.session_id, &self.token, id, action, args)
    }

    /// Await the next message from the broker.
    pub async fn recv(&mut self) -> Option<WireMessage> {
        self.receiver.recv().await
    }

    /// Take the next message without waiting, if one is queued.
    pub fn try_recv(&mut self) -> Option<WireMessage> {
        self.receiver.try_recv().ok()
    }

    /// The session this channel is bound to.
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Detach from the session. Results produced while detached are
    /// discarded.
    pub fn detach(self) {
        self.engine.disconnect(&self.session_id, PeerRole::Agent);
    }
}

impl std::fmt::Debug for AgentChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentChannel")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

/// The peer side of an attached session: receives forwarded commands,
/// sends back results, events, and stream chunks.
pub struct PeerChannel {
    engine: Arc<ProxyEngine>,
    session_id: SessionId,
    receiver: mpsc::Receiver<WireMessage>,
}

impl PeerChannel {
    /// Send a message toward the agent side.
    pub fn send(&self, message: WireMessage) {
        self.engine.handle_peer_message(&self.session_id, message);
    }

    /// Await the next forwarded command.
    pub async fn recv(&mut self) -> Option<WireMessage> {
        self.receiver.recv().await
    }

    /// Take the next forwarded command without waiting, if one is
    /// queued.
    pub fn try_recv(&mut self) -> Option<WireMessage> {
        self.receiver.try_recv().ok()
    }

    /// The session this channel is bound to.
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Detach from the session, leaving it degraded until a peer
    /// reattaches.
    pub fn detach(self) {
        self.engine.disconnect(&self.session_id, PeerRole::Peer);
    }
}

impl std::fmt::Debug for PeerChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerChannel")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}
