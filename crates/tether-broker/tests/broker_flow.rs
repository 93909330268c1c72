//! End-to-end flows through the broker facade.

#![allow(clippy::arithmetic_side_effects)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tether_audit::{AuditSink, MemorySink};
use tether_broker::Broker;
use tether_core::config::RateLimitConfig;
use tether_core::{AgentId, BrokerConfig, BrokerError, CorrelationId};
use tether_proxy::{ok_result, ResultStatus, WireMessage};
use tether_session::{ApprovedSession, RequestStatus, SessionStatus};
use tokio::time::timeout;

fn test_config() -> BrokerConfig {
    BrokerConfig {
        sweep_interval_secs: 1,
        ..BrokerConfig::default()
    }
}

fn launch(config: BrokerConfig) -> (Arc<Broker>, String, Arc<MemorySink>) {
    let audit = Arc::new(MemorySink::new());
    let (broker, admin) =
        Broker::launch(config, Arc::clone(&audit) as Arc<dyn AuditSink>).unwrap();
    (broker, admin, audit)
}

fn approved_session(
    broker: &Arc<Broker>,
    admin: &str,
    scopes: &[&str],
    root: &std::path::Path,
    ttl_secs: u64,
) -> ApprovedSession {
    let scopes: Vec<String> = scopes.iter().map(ToString::to_string).collect();
    let request_id = broker
        .request_access(
            admin,
            AgentId::from("main-agent"),
            &scopes,
            vec![PathBuf::from(root)],
            "test".to_string(),
        )
        .unwrap();
    broker
        .approve(admin, &request_id, None, Some(ttl_secs))
        .unwrap()
}

fn error_code(message: &WireMessage) -> &str {
    match message {
        WireMessage::Result {
            error: Some(body), ..
        } => &body.code,
        other => panic!("expected an error result, got {other:?}"),
    }
}

#[tokio::test]
async fn test_request_approve_and_round_trip() {
    let (broker, admin, _audit) = launch(test_config());
    let workspace = tempfile::tempdir().unwrap();
    let mut events = broker.subscribe(&admin).unwrap();

    let request_id = broker
        .request_access(
            &admin,
            AgentId::from("main-agent"),
            &["read:files".to_string()],
            vec![PathBuf::from(workspace.path())],
            "open project files".to_string(),
        )
        .unwrap();

    let event = timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.event_type(), "access_request");

    let requests = broker
        .list_requests(&admin, Some(RequestStatus::Pending), 10, 0)
        .unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].id, request_id);

    let before = chrono::Utc::now();
    let approved = broker.approve(&admin, &request_id, None, Some(5)).unwrap();
    assert!(!approved.token.is_empty());
    let ttl = approved.expires_at.0 - before;
    assert!(ttl > chrono::Duration::seconds(3) && ttl <= chrono::Duration::seconds(6));

    let event = timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.event_type(), "session_created");

    let mut agent = broker
        .attach_agent(&approved.session_id, &approved.token)
        .unwrap();
    let mut peer = broker
        .attach_peer(&approved.session_id, &approved.token)
        .unwrap();

    let file = workspace.path().join("a.txt");
    std::fs::write(&file, "contents").unwrap();
    let outcome = agent.send_command(
        CorrelationId::from("cmd-1"),
        "open_file",
        serde_json::json!({ "path": file }),
    );
    assert!(outcome.is_none());

    let forwarded = timeout(Duration::from_secs(1), peer.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(forwarded.message_type(), "command");
    assert_eq!(forwarded.correlation_id().unwrap().as_str(), "cmd-1");

    peer.send(ok_result(
        CorrelationId::from("cmd-1"),
        serde_json::json!({"content": "contents"}),
    ));
    let result = timeout(Duration::from_secs(1), agent.recv())
        .await
        .unwrap()
        .unwrap();
    let WireMessage::Result { id, status, data, .. } = result else {
        panic!("expected a result");
    };
    assert_eq!(id.as_str(), "cmd-1");
    assert_eq!(status, ResultStatus::Ok);
    assert_eq!(data.unwrap()["content"], "contents");
}

#[tokio::test]
async fn test_ungranted_scope_never_reaches_peer() {
    let (broker, admin, audit) = launch(test_config());
    let workspace = tempfile::tempdir().unwrap();
    let approved = approved_session(&broker, &admin, &["read:files"], workspace.path(), 60);

    let agent = broker
        .attach_agent(&approved.session_id, &approved.token)
        .unwrap();
    let mut peer = broker
        .attach_peer(&approved.session_id, &approved.token)
        .unwrap();

    let outcome = agent
        .send_command(
            CorrelationId::from("cmd-1"),
            "exec_command",
            serde_json::json!({"cmd": "rm -rf /"}),
        )
        .unwrap();
    assert_eq!(error_code(&outcome), "forbidden");
    assert!(peer.try_recv().is_none());

    let denied = audit
        .snapshot()
        .into_iter()
        .filter(|r| r.action == "exec_command" && !r.outcome.is_allowed())
        .count();
    assert_eq!(denied, 1);
}

#[tokio::test]
async fn test_path_traversal_rejected() {
    let (broker, admin, _audit) = launch(test_config());
    let workspace = tempfile::tempdir().unwrap();
    let approved = approved_session(&broker, &admin, &["read:files"], workspace.path(), 60);

    let agent = broker
        .attach_agent(&approved.session_id, &approved.token)
        .unwrap();
    let mut peer = broker
        .attach_peer(&approved.session_id, &approved.token)
        .unwrap();

    let escape = workspace.path().join("../../etc/passwd");
    let outcome = agent
        .send_command(
            CorrelationId::from("cmd-1"),
            "read_file",
            serde_json::json!({ "path": escape }),
        )
        .unwrap();
    assert_eq!(error_code(&outcome), "forbidden");
    assert!(peer.try_recv().is_none());
}

#[tokio::test]
async fn test_session_expires_and_sweep_retires_it() {
    let (broker, admin, _audit) = launch(test_config());
    let workspace = tempfile::tempdir().unwrap();
    let mut expirations = broker.subscribe_kind(&admin, "session_expired").unwrap();
    let approved = approved_session(&broker, &admin, &["read:files"], workspace.path(), 1);

    let agent = broker
        .attach_agent(&approved.session_id, &approved.token)
        .unwrap();

    let event = timeout(Duration::from_secs(5), expirations.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.session_id(), Some(&approved.session_id));

    let sessions = broker.list_sessions(&admin).unwrap();
    assert_eq!(sessions[0].status, SessionStatus::Expired);

    let outcome = agent
        .send_command(CorrelationId::from("cmd-1"), "list_dir", serde_json::json!({}))
        .unwrap();
    assert_eq!(error_code(&outcome), "unauthenticated");

    // An expired session cannot be re-attached either.
    let err = broker
        .attach_agent(&approved.session_id, &approved.token)
        .unwrap_err();
    assert!(matches!(err, BrokerError::Unauthenticated { .. }));
}

#[tokio::test]
async fn test_command_without_peer_fails_fast() {
    let (broker, admin, _audit) = launch(test_config());
    let workspace = tempfile::tempdir().unwrap();
    let approved = approved_session(&broker, &admin, &["read:files"], workspace.path(), 60);

    let agent = broker
        .attach_agent(&approved.session_id, &approved.token)
        .unwrap();

    // No peer ever attached: the answer is immediate, not a timeout.
    let started = std::time::Instant::now();
    let outcome = agent
        .send_command(CorrelationId::from("cmd-1"), "list_dir", serde_json::json!({}))
        .unwrap();
    assert_eq!(error_code(&outcome), "peer_unreachable");
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_rate_limit_audits_every_attempt() {
    let config = BrokerConfig {
        rate_limit: RateLimitConfig {
            max_requests: 10,
            window_secs: 60,
        },
        ..test_config()
    };
    let (broker, admin, audit) = launch(config);
    let workspace = tempfile::tempdir().unwrap();
    let approved = approved_session(&broker, &admin, &["read:files"], workspace.path(), 60);

    let agent = broker
        .attach_agent(&approved.session_id, &approved.token)
        .unwrap();
    let _peer = broker
        .attach_peer(&approved.session_id, &approved.token)
        .unwrap();

    for i in 0..10 {
        let outcome = agent.send_command(
            CorrelationId::from(format!("cmd-{i}").as_str()),
            "list_dir",
            serde_json::json!({}),
        );
        assert!(outcome.is_none(), "command {i} should be admitted");
    }
    let outcome = agent
        .send_command(CorrelationId::from("cmd-10"), "list_dir", serde_json::json!({}))
        .unwrap();
    assert_eq!(error_code(&outcome), "rate_limited");

    let records: Vec<_> = audit
        .snapshot()
        .into_iter()
        .filter(|r| r.action == "list_dir")
        .collect();
    assert_eq!(records.len(), 11);
    assert_eq!(records.iter().filter(|r| !r.outcome.is_allowed()).count(), 1);
}

#[tokio::test]
async fn test_management_requires_credential() {
    let (broker, _admin, _audit) = launch(test_config());

    let err = broker.list_sessions("wrong-credential").unwrap_err();
    assert!(matches!(err, BrokerError::Unauthenticated { .. }));

    let err = broker
        .request_access(
            "wrong-credential",
            AgentId::from("a"),
            &["read:files".to_string()],
            vec![],
            "x".to_string(),
        )
        .unwrap_err();
    assert!(matches!(err, BrokerError::Unauthenticated { .. }));
}

#[tokio::test]
async fn test_unknown_scope_rejected_and_audited() {
    let (broker, admin, audit) = launch(test_config());
    let err = broker
        .request_access(
            &admin,
            AgentId::from("a"),
            &["read:files".to_string(), "launch:missiles".to_string()],
            vec![],
            "x".to_string(),
        )
        .unwrap_err();
    assert!(matches!(err, BrokerError::Forbidden { .. }));

    // The denial itself is on the record.
    let records = audit.snapshot();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].action, "request_access");
    assert!(!records[0].outcome.is_allowed());

    // Same for an approval narrowing to a scope outside the catalog.
    let request_id = broker
        .request_access(
            &admin,
            AgentId::from("a"),
            &["read:files".to_string()],
            vec![],
            "x".to_string(),
        )
        .unwrap();
    let err = broker
        .approve(&admin, &request_id, Some(&["sudo".to_string()]), None)
        .unwrap_err();
    assert!(matches!(err, BrokerError::Forbidden { .. }));
    let denied_approvals = audit
        .snapshot()
        .into_iter()
        .filter(|r| r.action == "approve" && !r.outcome.is_allowed())
        .count();
    assert_eq!(denied_approvals, 1);
}

#[tokio::test]
async fn test_deny_is_terminal_and_published() {
    let (broker, admin, _audit) = launch(test_config());
    let mut denials = broker.subscribe_kind(&admin, "request_denied").unwrap();

    let request_id = broker
        .request_access(
            &admin,
            AgentId::from("a"),
            &["read:editor".to_string()],
            vec![],
            "x".to_string(),
        )
        .unwrap();
    broker
        .deny(&admin, &request_id, "not today".to_string())
        .unwrap();

    let event = timeout(Duration::from_secs(1), denials.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.event_type(), "request_denied");

    let err = broker.approve(&admin, &request_id, None, None).unwrap_err();
    assert!(matches!(err, BrokerError::InvalidState { .. }));
}

#[tokio::test]
async fn test_approval_narrows_scopes() {
    let (broker, admin, _audit) = launch(test_config());
    let request_id = broker
        .request_access(
            &admin,
            AgentId::from("a"),
            &["read:files".to_string(), "write:files".to_string()],
            vec![PathBuf::from("/tmp/ws")],
            "x".to_string(),
        )
        .unwrap();

    let approved = broker
        .approve(&admin, &request_id, Some(&["read:files".to_string()]), None)
        .unwrap();
    assert_eq!(approved.scopes.len(), 1);

    // Widening past the request is refused.
    let request_id = broker
        .request_access(
            &admin,
            AgentId::from("a"),
            &["read:files".to_string()],
            vec![],
            "x".to_string(),
        )
        .unwrap();
    let err = broker
        .approve(&admin, &request_id, Some(&["exec:terminal".to_string()]), None)
        .unwrap_err();
    assert!(matches!(err, BrokerError::InvalidState { .. }));
}

#[tokio::test]
async fn test_revoke_notifies_and_is_idempotent() {
    let (broker, admin, _audit) = launch(test_config());
    let workspace = tempfile::tempdir().unwrap();
    let approved = approved_session(&broker, &admin, &["read:files"], workspace.path(), 60);

    let mut agent = broker
        .attach_agent(&approved.session_id, &approved.token)
        .unwrap();
    broker
        .revoke(&admin, &approved.session_id, "policy change".to_string())
        .unwrap();

    let closing = timeout(Duration::from_secs(1), agent.recv())
        .await
        .unwrap()
        .unwrap();
    let WireMessage::Event { event, .. } = closing else {
        panic!("expected a closing event");
    };
    assert_eq!(event, "session_closed");

    let outcome = agent
        .send_command(CorrelationId::from("cmd-1"), "list_dir", serde_json::json!({}))
        .unwrap();
    assert_eq!(error_code(&outcome), "unauthenticated");

    // Revoking again is a silent no-op.
    broker
        .revoke(&admin, &approved.session_id, "again".to_string())
        .unwrap();

    let err = broker
        .revoke(&admin, &tether_core::SessionId::new(), "x".to_string())
        .unwrap_err();
    assert!(matches!(err, BrokerError::NotFound { .. }));
}

#[tokio::test]
async fn test_listings_never_contain_token_material() {
    let (broker, admin, _audit) = launch(test_config());
    let workspace = tempfile::tempdir().unwrap();
    let approved = approved_session(&broker, &admin, &["read:files"], workspace.path(), 60);

    let sessions = broker.list_sessions(&admin).unwrap();
    let json = serde_json::to_string(&sessions).unwrap();
    assert!(!json.contains(&approved.token));
    assert!(!json.contains("token"));
}

#[tokio::test]
async fn test_peer_detach_degrades_until_reattach() {
    let (broker, admin, _audit) = launch(test_config());
    let workspace = tempfile::tempdir().unwrap();
    let mut disconnects = broker.subscribe_kind(&admin, "peer_disconnected").unwrap();
    let approved = approved_session(&broker, &admin, &["read:files"], workspace.path(), 60);

    let agent = broker
        .attach_agent(&approved.session_id, &approved.token)
        .unwrap();
    let peer = broker
        .attach_peer(&approved.session_id, &approved.token)
        .unwrap();
    peer.detach();

    let event = timeout(Duration::from_secs(1), disconnects.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.session_id(), Some(&approved.session_id));

    let outcome = agent
        .send_command(CorrelationId::from("cmd-1"), "list_dir", serde_json::json!({}))
        .unwrap();
    assert_eq!(error_code(&outcome), "peer_unreachable");

    // Same session, same token: reattaching restores forwarding.
    let mut peer = broker
        .attach_peer(&approved.session_id, &approved.token)
        .unwrap();
    let outcome = agent.send_command(
        CorrelationId::from("cmd-2"),
        "list_dir",
        serde_json::json!({}),
    );
    assert!(outcome.is_none());
    assert!(timeout(Duration::from_secs(1), peer.recv())
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_shutdown_stops_sweeping() {
    let (broker, admin, _audit) = launch(test_config());
    let workspace = tempfile::tempdir().unwrap();
    let approved = approved_session(&broker, &admin, &["read:files"], workspace.path(), 1);

    broker.shutdown();
    tokio::time::sleep(Duration::from_millis(2500)).await;

    // The sweeper is gone; the session is past TTL but never swept.
    let sessions = broker.list_sessions(&admin).unwrap();
    assert_eq!(sessions[0].status, SessionStatus::Active);

    // Lazy expiry still protects the proxy path.
    let err = broker
        .attach_agent(&approved.session_id, &approved.token)
        .unwrap_err();
    assert!(matches!(err, BrokerError::Unauthenticated { .. }));
}
