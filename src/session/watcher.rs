//! Per-session status watcher.
//!
//! Two phases: a tight startup loop until the Deployment reports a ready
//! replica (or the start timeout fires), then a slower steady-state loop
//! until the Deployment disappears. One watcher task per in-memory session;
//! `DeleteSession` cancels it through the session's token.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use kube::Api;
use tokio::time::{Instant, interval};

use super::{Session, SessionStatus};

const STARTUP_POLL: Duration = Duration::from_secs(2);
const STEADY_POLL: Duration = Duration::from_secs(10);

/// Pure status derivation from a Deployment (or its absence).
pub fn status_from_deployment(deployment: Option<&Deployment>) -> SessionStatus {
    let Some(deployment) = deployment else {
        return SessionStatus::Stopped;
    };
    let status = deployment.status.as_ref();
    let replicas = status.and_then(|s| s.replicas).unwrap_or(0);
    let ready = status.and_then(|s| s.ready_replicas).unwrap_or(0);
    if replicas > 0 && ready > 0 {
        SessionStatus::Active
    } else if replicas > 0 {
        SessionStatus::Starting
    } else {
        SessionStatus::Unhealthy
    }
}

/// Run the watcher until cancellation or a terminal transition.
pub async fn run(
    client: kube::Client,
    session: Arc<Session>,
    pod_start_timeout: Duration,
) {
    let api: Api<Deployment> = Api::namespaced(client, &session.namespace);
    let cancel = session.cancellation();

    tracing::debug!(session_id = %session.id, "status watcher started");

    // Phase 1: startup.
    let deadline = Instant::now() + pod_start_timeout;
    let mut ticker = interval(STARTUP_POLL);
    let became_ready = loop {
        tokio::select! {
            () = cancel.cancelled() => {
                tracing::debug!(session_id = %session.id, "status watcher cancelled");
                return;
            }
            _ = ticker.tick() => {}
        }

        if Instant::now() >= deadline {
            session.set_status(SessionStatus::Timeout);
            tracing::warn!(session_id = %session.id, "deployment never became ready");
            return;
        }

        match api.get_opt(&session.deployment_name).await {
            Ok(Some(deployment)) => {
                if status_from_deployment(Some(&deployment)) == SessionStatus::Active {
                    session.set_status(SessionStatus::Active);
                    break true;
                }
                session.set_status(SessionStatus::Starting);
            }
            Ok(None) => {
                tracing::debug!(session_id = %session.id, "deployment gone during startup");
                break false;
            }
            Err(e) => {
                tracing::warn!(session_id = %session.id, error = %e, "status poll failed");
            }
        }
    };
    if !became_ready {
        return;
    }

    // Phase 2: steady state.
    let mut ticker = interval(STEADY_POLL);
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                tracing::debug!(session_id = %session.id, "status watcher cancelled");
                return;
            }
            _ = ticker.tick() => {}
        }

        match api.get_opt(&session.deployment_name).await {
            Ok(Some(deployment)) => {
                let status = deployment.status.as_ref();
                let ready = status.and_then(|s| s.ready_replicas).unwrap_or(0);
                session.set_status(if ready > 0 {
                    SessionStatus::Active
                } else {
                    SessionStatus::Unhealthy
                });
            }
            Ok(None) => {
                session.set_status(SessionStatus::Stopped);
                tracing::info!(session_id = %session.id, "deployment gone, watcher exiting");
                return;
            }
            Err(e) => {
                tracing::warn!(session_id = %session.id, error = %e, "status poll failed");
            }
        }
    }
}
