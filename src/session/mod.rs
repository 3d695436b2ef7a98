//! Session object model and lifecycle.

pub mod compiler;
pub mod deployment;
pub mod error;
pub mod manager;
pub mod otel;
pub mod restore;
pub mod watcher;

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::k8s::names;

// ---------------------------------------------------------------------------
// Scope and status
// ---------------------------------------------------------------------------

/// Who a session belongs to; controls which credential Secrets its Pod mounts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceScope {
    #[default]
    User,
    Team,
}

impl ResourceScope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Team => "team",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "user" => Some(Self::User),
            "team" => Some(Self::Team),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Starting,
    Active,
    Unhealthy,
    Stopped,
    Timeout,
    Unknown,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Active => "active",
            Self::Unhealthy => "unhealthy",
            Self::Stopped => "stopped",
            Self::Timeout => "timeout",
            Self::Unknown => "unknown",
        }
    }

    /// Only these statuses accept proxied messages.
    pub fn accepts_messages(self) -> bool {
        matches!(self, Self::Starting | Self::Active)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Request snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryInfo {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlackParams {
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
}

/// Immutable snapshot of the creation request. Teams are opaque strings, not
/// handles, so nothing here can form a reference cycle with the session.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionRequest {
    pub user_id: String,
    #[serde(default)]
    pub team_id: Option<String>,
    #[serde(default)]
    pub scope: ResourceScope,
    #[serde(default)]
    pub teams: Vec<String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    #[serde(default)]
    pub agent_type: Option<String>,
    #[serde(default)]
    pub repository: Option<RepositoryInfo>,
    #[serde(default)]
    pub initial_message: Option<String>,
    #[serde(default)]
    pub oneshot: bool,
    /// One-shot settings overlay, persisted into the oneshot-settings Secret.
    #[serde(default)]
    pub oneshot_settings: Option<serde_json::Value>,
    #[serde(default)]
    pub slack: Option<SlackParams>,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    #[serde(default)]
    pub github_token: Option<String>,
}

// ---------------------------------------------------------------------------
// Session handle
// ---------------------------------------------------------------------------

/// In-memory handle for one session. The cluster is authoritative: a handle
/// can always be rebuilt from the session's Service and Deployment.
pub struct Session {
    pub id: String,
    pub request: SessionRequest,
    pub deployment_name: String,
    pub service_name: String,
    pub pvc_name: String,
    pub namespace: String,
    pub service_port: i32,
    pub started_at: DateTime<Utc>,
    /// Cached initial message, served in list/get responses.
    pub description: Option<String>,
    pub webhook_payload: Option<Vec<u8>>,

    status: RwLock<SessionStatus>,
    updated_at: RwLock<DateTime<Utc>>,
    cancel: CancellationToken,
}

impl Session {
    pub fn new(
        id: &str,
        request: SessionRequest,
        namespace: &str,
        service_port: i32,
        webhook_payload: Option<Vec<u8>>,
    ) -> Self {
        let now = Utc::now();
        Self::with_timestamps(id, request, namespace, service_port, webhook_payload, now, now)
    }

    pub fn with_timestamps(
        id: &str,
        request: SessionRequest,
        namespace: &str,
        service_port: i32,
        webhook_payload: Option<Vec<u8>>,
        started_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.to_owned(),
            deployment_name: names::deployment_name(id),
            service_name: names::service_name(id),
            pvc_name: names::pvc_name(id),
            namespace: namespace.to_owned(),
            service_port,
            started_at,
            description: request.initial_message.clone(),
            webhook_payload,
            request,
            status: RwLock::new(SessionStatus::Starting),
            updated_at: RwLock::new(updated_at),
            cancel: CancellationToken::new(),
        }
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.read().expect("session status lock poisoned")
    }

    pub fn set_status(&self, status: SessionStatus) {
        let mut slot = self.status.write().expect("session status lock poisoned");
        if *slot != status {
            tracing::info!(
                session_id = %self.id,
                from = %*slot,
                to = %status,
                "session status changed"
            );
            *slot = status;
        }
        *self.updated_at.write().expect("session clock lock poisoned") = Utc::now();
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        *self.updated_at.read().expect("session clock lock poisoned")
    }

    /// Cancellation handle observed by this session's watcher.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("deployment_name", &self.deployment_name)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(user: &str) -> SessionRequest {
        SessionRequest {
            user_id: user.into(),
            ..Default::default()
        }
    }

    #[test]
    fn derived_names_are_pure_functions_of_id() {
        let session = Session::new("s1", request("alice"), "ns", 9000, None);
        assert_eq!(session.deployment_name, "agentapi-session-s1");
        assert_eq!(session.service_name, "agentapi-session-s1-svc");
        assert_eq!(session.pvc_name, "agentapi-session-s1-pvc");
    }

    #[test]
    fn new_session_is_starting() {
        let session = Session::new("s1", request("alice"), "ns", 9000, None);
        assert_eq!(session.status(), SessionStatus::Starting);
        assert!(session.status().accepts_messages());
    }

    #[test]
    fn terminal_statuses_refuse_messages() {
        for status in [
            SessionStatus::Unhealthy,
            SessionStatus::Stopped,
            SessionStatus::Timeout,
            SessionStatus::Unknown,
        ] {
            assert!(!status.accepts_messages(), "{status}");
        }
    }

    #[test]
    fn set_status_bumps_updated_at() {
        let session = Session::new("s1", request("alice"), "ns", 9000, None);
        let before = session.updated_at();
        session.set_status(SessionStatus::Active);
        assert!(session.updated_at() >= before);
        assert_eq!(session.status(), SessionStatus::Active);
    }

    #[test]
    fn scope_parse_roundtrip() {
        assert_eq!(ResourceScope::parse("user"), Some(ResourceScope::User));
        assert_eq!(ResourceScope::parse("team"), Some(ResourceScope::Team));
        assert_eq!(ResourceScope::parse("cluster"), None);
    }

    #[test]
    fn description_caches_initial_message() {
        let mut req = request("alice");
        req.initial_message = Some("hi".into());
        let session = Session::new("s1", req, "ns", 9000, None);
        assert_eq!(session.description.as_deref(), Some("hi"));
    }
}
