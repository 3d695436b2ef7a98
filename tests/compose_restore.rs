//! The composed Service must carry everything restoration needs: dropping
//! every in-memory handle and re-reading the cluster objects has to
//! reproduce the session's identity, scope, tags, and team.

use std::collections::HashMap;

use agentapi_proxy::config::Config;
use agentapi_proxy::session::deployment::{build_deployment, build_service};
use agentapi_proxy::session::restore::parse_service;
use agentapi_proxy::session::watcher::status_from_deployment;
use agentapi_proxy::session::{ResourceScope, Session, SessionRequest, SessionStatus};
use k8s_openapi::api::apps::v1::DeploymentStatus;

fn team_session() -> Session {
    Session::new(
        "s2",
        SessionRequest {
            user_id: "alice".into(),
            scope: ResourceScope::Team,
            team_id: Some("org/team-a".into()),
            teams: vec!["org/team-a".into()],
            tags: HashMap::from([
                ("env".to_owned(), "prod".to_owned()),
                ("run".to_owned(), "nightly".to_owned()),
            ]),
            agent_type: Some("claude-agentapi".into()),
            initial_message: Some("hi".into()),
            ..Default::default()
        },
        "agentapi-proxy",
        9000,
        None,
    )
}

#[test]
fn restored_parts_match_composed_service() {
    let config = Config::default();
    let session = team_session();
    let service = build_service(&config, &session);

    let parts = parse_service(&service, config.base_port).expect("service must be restorable");

    assert_eq!(parts.id, session.id);
    assert_eq!(parts.user_id, "alice");
    assert_eq!(parts.scope, ResourceScope::Team);
    // Raw team id survives through the annotation even though the label
    // carries only the hash.
    assert_eq!(parts.team_id.as_deref(), Some("org/team-a"));
    assert_eq!(parts.tags["env"], "prod");
    assert_eq!(parts.tags["run"], "nightly");
    assert_eq!(parts.agent_type.as_deref(), Some("claude-agentapi"));
    assert_eq!(parts.service_port, 9000);
    assert_eq!(parts.created_at, session.started_at);
}

#[test]
fn restored_request_rehydrates_identity() {
    let config = Config::default();
    let session = team_session();
    let service = build_service(&config, &session);
    let parts = parse_service(&service, config.base_port).unwrap();

    let (id, request) = parts.into_request(Some("hi".into()));
    assert_eq!(id, "s2");
    assert_eq!(request.user_id, "alice");
    assert_eq!(request.scope, ResourceScope::Team);
    assert_eq!(request.team_id.as_deref(), Some("org/team-a"));
    assert_eq!(request.initial_message.as_deref(), Some("hi"));
}

#[test]
fn user_session_roundtrips_with_empty_team() {
    let config = Config::default();
    let session = Session::new(
        "s1",
        SessionRequest {
            user_id: "user@example.com".into(),
            ..Default::default()
        },
        "agentapi-proxy",
        9000,
        None,
    );
    let service = build_service(&config, &session);
    let parts = parse_service(&service, config.base_port).unwrap();

    assert_eq!(parts.scope, ResourceScope::User);
    assert!(parts.team_id.is_none());
    // The user id label was sanitized on write; restoration sees that form.
    assert_eq!(parts.user_id, "user-example.com");
}

#[test]
fn composed_deployment_status_drives_session_status() {
    let config = Config::default();
    let session = team_session();
    let mut deployment = build_deployment(&config, &session);

    deployment.status = Some(DeploymentStatus {
        replicas: Some(1),
        ready_replicas: Some(1),
        ..Default::default()
    });
    assert_eq!(
        status_from_deployment(Some(&deployment)),
        SessionStatus::Active
    );

    deployment.status = Some(DeploymentStatus {
        replicas: Some(1),
        ready_replicas: Some(0),
        ..Default::default()
    });
    assert_eq!(
        status_from_deployment(Some(&deployment)),
        SessionStatus::Starting
    );

    assert_eq!(status_from_deployment(None), SessionStatus::Stopped);
}

#[test]
fn deployment_and_service_share_session_labels() {
    let config = Config::default();
    let session = team_session();
    let deployment = build_deployment(&config, &session);
    let service = build_service(&config, &session);

    let deployment_labels = deployment.metadata.labels.unwrap();
    let service_labels = service.metadata.labels.unwrap();
    for key in [
        "app.kubernetes.io/name",
        "app.kubernetes.io/managed-by",
        "agentapi.proxy/session-id",
        "agentapi.proxy/user-id",
        "agentapi.proxy/scope",
        "agentapi.proxy/team-id-hash",
    ] {
        assert_eq!(deployment_labels.get(key), service_labels.get(key), "{key}");
    }
}
