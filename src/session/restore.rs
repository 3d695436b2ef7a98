//! Rebuilding in-memory session handles from cluster state.
//!
//! The Service carries everything a handle needs (labels, annotations, port);
//! the Deployment supplies the status and the initial-message Secret the
//! cached description. Webhook payloads are not recovered: they are written
//! once at creation and never read again by the orchestrator.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Service;

use crate::k8s::labels;

use super::{ResourceScope, SessionRequest};

/// Everything recoverable from the Service object alone.
#[derive(Debug, Clone)]
pub struct RestoredParts {
    pub id: String,
    pub user_id: String,
    pub scope: ResourceScope,
    pub team_id: Option<String>,
    pub tags: HashMap<String, String>,
    pub agent_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub service_port: i32,
}

fn parse_rfc3339(raw: Option<&String>) -> DateTime<Utc> {
    raw.and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map_or_else(Utc::now, |t| t.with_timezone(&Utc))
}

/// Parse a session Service. `None` when the object is not a session Service
/// (missing session-id label) or carries a deletion timestamp.
pub fn parse_service(service: &Service, default_port: i32) -> Option<RestoredParts> {
    if service.metadata.deletion_timestamp.is_some() {
        return None;
    }

    let label_map = service.metadata.labels.as_ref()?;
    let id = label_map.get(labels::LABEL_SESSION_ID)?.clone();
    let user_id = label_map
        .get(labels::LABEL_USER_ID)
        .cloned()
        .unwrap_or_default();
    // Legacy sessions predate the scope label.
    let scope = label_map
        .get(labels::LABEL_SCOPE)
        .and_then(|raw| ResourceScope::parse(raw))
        .unwrap_or(ResourceScope::User);

    let tags: HashMap<String, String> = label_map
        .iter()
        .filter_map(|(key, value)| {
            key.strip_prefix(labels::LABEL_TAG_PREFIX)
                .map(|tag| (tag.to_owned(), value.clone()))
        })
        .collect();

    let annotations = service.metadata.annotations.as_ref();
    // The team id label is hashed; the raw value only exists here.
    let team_id = annotations
        .and_then(|a| a.get(labels::ANNOTATION_TEAM_ID))
        .filter(|v| !v.is_empty())
        .cloned();
    let agent_type = annotations
        .and_then(|a| a.get(labels::ANNOTATION_AGENT_TYPE))
        .cloned();
    let created_at = parse_rfc3339(annotations.and_then(|a| a.get(labels::ANNOTATION_CREATED_AT)));
    let updated_at = parse_rfc3339(annotations.and_then(|a| a.get(labels::ANNOTATION_UPDATED_AT)));

    let service_port = service
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_ref())
        .and_then(|ports| ports.first())
        .map_or(default_port, |port| port.port);

    Some(RestoredParts {
        id,
        user_id,
        scope,
        team_id,
        tags,
        agent_type,
        created_at,
        updated_at,
        service_port,
    })
}

impl RestoredParts {
    /// Rehydrate the request snapshot. Fields that never reach cluster state
    /// (environment, slack params, oneshot settings) are gone by design; the
    /// objects that needed them were materialized at creation.
    pub fn into_request(self, initial_message: Option<String>) -> (String, SessionRequest) {
        let request = SessionRequest {
            user_id: self.user_id,
            team_id: self.team_id,
            scope: self.scope,
            tags: self.tags,
            agent_type: self.agent_type,
            initial_message,
            ..Default::default()
        };
        (self.id, request)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::api::core::v1::{ServicePort, ServiceSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

    use super::*;

    fn session_service() -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some("agentapi-session-s2-svc".into()),
                labels: Some(BTreeMap::from([
                    ("agentapi.proxy/session-id".to_owned(), "s2".to_owned()),
                    ("agentapi.proxy/user-id".to_owned(), "alice".to_owned()),
                    ("agentapi.proxy/scope".to_owned(), "team".to_owned()),
                    ("agentapi.proxy/tag-env".to_owned(), "prod".to_owned()),
                    ("agentapi.proxy/tag-run".to_owned(), "nightly".to_owned()),
                ])),
                annotations: Some(BTreeMap::from([
                    (
                        "agentapi.proxy/team-id".to_owned(),
                        "org/team-a".to_owned(),
                    ),
                    (
                        "agentapi.proxy/created-at".to_owned(),
                        "2026-07-01T10:00:00+00:00".to_owned(),
                    ),
                    (
                        "agentapi.proxy/updated-at".to_owned(),
                        "2026-07-01T10:05:00+00:00".to_owned(),
                    ),
                ])),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                ports: Some(vec![ServicePort {
                    port: 9000,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn restores_identity_scope_tags_and_team() {
        let parts = parse_service(&session_service(), 8080).unwrap();
        assert_eq!(parts.id, "s2");
        assert_eq!(parts.user_id, "alice");
        assert_eq!(parts.scope, ResourceScope::Team);
        assert_eq!(parts.team_id.as_deref(), Some("org/team-a"));
        assert_eq!(parts.tags["env"], "prod");
        assert_eq!(parts.tags["run"], "nightly");
        assert_eq!(parts.service_port, 9000);
        assert_eq!(parts.created_at.to_rfc3339(), "2026-07-01T10:00:00+00:00");
    }

    #[test]
    fn deletion_timestamped_service_is_not_restored() {
        let mut service = session_service();
        service.metadata.deletion_timestamp = Some(Time(k8s_openapi::jiff::Timestamp::now()));
        assert!(parse_service(&service, 8080).is_none());
    }

    #[test]
    fn missing_scope_label_defaults_to_user() {
        let mut service = session_service();
        service
            .metadata
            .labels
            .as_mut()
            .unwrap()
            .remove("agentapi.proxy/scope");
        let parts = parse_service(&service, 8080).unwrap();
        assert_eq!(parts.scope, ResourceScope::User);
    }

    #[test]
    fn empty_team_annotation_means_no_team() {
        let mut service = session_service();
        service
            .metadata
            .annotations
            .as_mut()
            .unwrap()
            .insert("agentapi.proxy/team-id".to_owned(), String::new());
        let parts = parse_service(&service, 8080).unwrap();
        assert!(parts.team_id.is_none());
    }

    #[test]
    fn malformed_timestamps_fall_back_to_now() {
        let mut service = session_service();
        service
            .metadata
            .annotations
            .as_mut()
            .unwrap()
            .insert("agentapi.proxy/created-at".to_owned(), "yesterday".to_owned());
        let before = Utc::now();
        let parts = parse_service(&service, 8080).unwrap();
        assert!(parts.created_at >= before);
    }

    #[test]
    fn non_session_service_is_ignored() {
        let service = Service::default();
        assert!(parse_service(&service, 8080).is_none());
    }

    #[test]
    fn missing_ports_fall_back_to_default() {
        let mut service = session_service();
        service.spec = None;
        let parts = parse_service(&service, 8080).unwrap();
        assert_eq!(parts.service_port, 8080);
    }
}
