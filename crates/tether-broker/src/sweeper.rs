//! Background sweep: expires sessions and stale requests on a timer.

use chrono::Utc;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tether_events::{BrokerEvent, EventBus};
use tether_proxy::ProxyEngine;
use tether_session::SessionStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Spawn the periodic sweep task.
///
/// Each tick expires due sessions and pending requests, tears down the
/// expired sessions' connections, and publishes the corresponding
/// events. The task exits when the shutdown channel fires.
pub(crate) fn spawn_sweeper(
    store: Arc<SessionStore>,
    engine: Arc<ProxyEngine>,
    events: EventBus,
    interval_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    sweep_once(&store, &engine, &events);
                },
                _ = shutdown.changed() => {
                    debug!("sweeper stopping");
                    break;
                },
            }
        }
    })
}

/// One sweep pass. One session's teardown failing must not stop the
/// remaining sessions from being swept, so each step is isolated.
fn sweep_once(store: &SessionStore, engine: &Arc<ProxyEngine>, events: &EventBus) {
    let report = store.sweep(Utc::now());

    for session_id in report.expired_sessions {
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
            engine.teardown(&session_id, "expired");
        }));
        if outcome.is_err() {
            error!(session_id = %session_id, "session teardown panicked during sweep");
        }
        events.publish(BrokerEvent::SessionExpired { session_id });
    }

    for request_id in report.expired_requests {
        events.publish(BrokerEvent::RequestExpired { request_id });
    }
}
