//! Composes the session's Kubernetes object graph: Deployment (with the full
//! sidecar family), Service, and PVC. Builders are pure; nothing here talks
//! to the API server.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, EnvFromSource, EnvVar,
    EnvVarSource, HTTPGetAction, KeyToPath, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeClaimVolumeSource, PodSecurityContext, PodSpec, PodTemplateSpec, Probe,
    ProjectedVolumeSource, ResourceRequirements, Secret, SecretEnvSource, SecretKeySelector,
    SecretProjection, SecretVolumeSource, Service, ServicePort, ServiceSpec, Toleration, Volume,
    VolumeMount, VolumeProjection, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::config::Config;
use crate::k8s::labels::{self, tag_label_key};
use crate::k8s::names;
use crate::settings::mcp::MCP_SERVERS_KEY;

use super::{ResourceScope, Session};

pub const SESSION_SERVICE_ACCOUNT: &str = "agentapi-proxy-session";

/// Key under which the live credential file is stored, both in the user's
/// live Secret and in the seed volume mounted into the Pod.
pub const CREDENTIALS_FILE_KEY: &str = "credentials.json";

// ---------------------------------------------------------------------------
// Labels and annotations
// ---------------------------------------------------------------------------

/// Standard label set stamped on the Deployment, Pod template, Service, and
/// PVC of one session.
pub fn session_labels(session: &Session) -> BTreeMap<String, String> {
    let request = &session.request;
    let mut out = BTreeMap::from([
        (
            labels::LABEL_APP_NAME.to_owned(),
            labels::APP_NAME_SESSION.to_owned(),
        ),
        (labels::LABEL_APP_INSTANCE.to_owned(), session.id.clone()),
        (
            labels::LABEL_APP_MANAGED_BY.to_owned(),
            labels::MANAGED_BY_PROXY.to_owned(),
        ),
        (labels::LABEL_SESSION_ID.to_owned(), session.id.clone()),
        (
            labels::LABEL_USER_ID.to_owned(),
            names::sanitize_label_value(&request.user_id),
        ),
        (
            labels::LABEL_SCOPE.to_owned(),
            request.scope.as_str().to_owned(),
        ),
    ]);
    if let Some(team_id) = &request.team_id {
        out.insert(
            labels::LABEL_TEAM_ID_HASH.to_owned(),
            names::hash_team_id(team_id),
        );
    }
    for (key, value) in &request.tags {
        out.insert(tag_label_key(key), names::sanitize_label_value(value));
    }
    out
}

/// Annotations carry what labels cannot: the raw team id and RFC3339 times.
pub fn session_annotations(config: &Config, session: &Session) -> BTreeMap<String, String> {
    let request = &session.request;
    let mut out = BTreeMap::from([
        (
            labels::ANNOTATION_TEAM_ID.to_owned(),
            request.team_id.clone().unwrap_or_default(),
        ),
        (
            labels::ANNOTATION_CREATED_AT.to_owned(),
            session.started_at.to_rfc3339(),
        ),
        (
            labels::ANNOTATION_UPDATED_AT.to_owned(),
            session.updated_at().to_rfc3339(),
        ),
    ]);
    if let Some(agent_type) = &request.agent_type {
        out.insert(labels::ANNOTATION_AGENT_TYPE.to_owned(), agent_type.clone());
    }
    if config.otel_collector_enabled {
        out.insert(
            labels::ANNOTATION_PROMETHEUS_SCRAPE.to_owned(),
            "true".to_owned(),
        );
        out.insert(
            labels::ANNOTATION_PROMETHEUS_PORT.to_owned(),
            config.otel_collector_exporter_port.to_string(),
        );
        out.insert(
            labels::ANNOTATION_PROMETHEUS_PATH.to_owned(),
            "/metrics".to_owned(),
        );
    }
    out
}

/// Label set for Secrets owned by one session.
pub fn owned_secret_labels(session: &Session, kind: &str) -> BTreeMap<String, String> {
    let request = &session.request;
    let mut out = BTreeMap::from([
        (labels::LABEL_SESSION_ID.to_owned(), session.id.clone()),
        (
            labels::LABEL_USER_ID.to_owned(),
            names::sanitize_label_value(&request.user_id),
        ),
        (labels::LABEL_RESOURCE.to_owned(), kind.to_owned()),
        (
            labels::LABEL_MANAGED_BY.to_owned(),
            labels::MANAGED_BY_SESSION_MANAGER.to_owned(),
        ),
    ]);
    if let Some(team_id) = &request.team_id {
        out.insert(
            labels::LABEL_TEAM_ID_HASH.to_owned(),
            names::hash_team_id(team_id),
        );
    }
    for (key, value) in &request.tags {
        out.insert(tag_label_key(key), names::sanitize_label_value(value));
    }
    out
}

// ---------------------------------------------------------------------------
// envFrom ordering
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EnvSecretRef {
    pub name: String,
    pub optional: bool,
}

/// Ordered env Secrets the main container consumes. The order is the
/// precedence contract: later entries shadow earlier ones.
pub(crate) fn env_from_secrets(config: &Config, session: &Session) -> Vec<EnvSecretRef> {
    let request = &session.request;
    let mut out = Vec::new();

    if request.github_token.is_some() {
        // The caller supplied a plain token. The cluster-wide GitHub Secret
        // carries the App PEM; mounting it here would leak it.
        if let Some(name) = &config.github_config_secret_name {
            out.push(EnvSecretRef {
                name: name.clone(),
                optional: true,
            });
        }
        out.push(EnvSecretRef {
            name: names::github_token_secret_name(&session.service_name),
            optional: false,
        });
    } else {
        if let Some(name) = &config.github_secret_name {
            out.push(EnvSecretRef {
                name: name.clone(),
                optional: true,
            });
        }
        if let Some(name) = &config.github_config_secret_name {
            out.push(EnvSecretRef {
                name: name.clone(),
                optional: true,
            });
        }
    }

    if request.scope == ResourceScope::User {
        out.push(EnvSecretRef {
            name: names::personal_api_key_secret_name(&session.service_name),
            optional: true,
        });
    }

    match request.scope {
        ResourceScope::Team => {
            if let Some(team_id) = &request.team_id {
                out.push(EnvSecretRef {
                    name: names::agent_env_secret_name(team_id),
                    optional: true,
                });
            }
            out.push(EnvSecretRef {
                name: names::team_env_secret_name(&session.id),
                optional: true,
            });
        }
        ResourceScope::User => {
            for team in &request.teams {
                out.push(EnvSecretRef {
                    name: names::agent_env_secret_name(team),
                    optional: true,
                });
            }
            // User secret last: highest precedence.
            out.push(EnvSecretRef {
                name: names::agent_env_secret_name(&request.user_id),
                optional: true,
            });
        }
    }

    out
}

fn env_from_sources(config: &Config, session: &Session) -> Vec<EnvFromSource> {
    env_from_secrets(config, session)
        .into_iter()
        .map(|entry| EnvFromSource {
            secret_ref: Some(SecretEnvSource {
                name: entry.name,
                optional: Some(entry.optional),
            }),
            ..Default::default()
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Containers
// ---------------------------------------------------------------------------

fn env_var(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.into(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn quantity_map(cpu: &str, memory: &str) -> BTreeMap<String, Quantity> {
    BTreeMap::from([
        ("cpu".to_owned(), Quantity(cpu.into())),
        ("memory".to_owned(), Quantity(memory.into())),
    ])
}

fn http_probe(port: i32, path: &str, initial_delay: i32, period: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.into()),
            port: IntOrString::Int(port),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay),
        period_seconds: Some(period),
        ..Default::default()
    }
}

fn main_startup_script(config: &Config) -> String {
    format!(
        concat!(
            "set -e\n",
            "mkdir -p /home/agentapi/.claude\n",
            "if [ -f /tmp/claude-credentials/{key} ]; then\n",
            "  cp /tmp/claude-credentials/{key} /home/agentapi/.claude/.credentials.json\n",
            "fi\n",
            "exec agentapi server --port {port} --settings /etc/agentapi/settings/settings.yaml\n",
        ),
        key = CREDENTIALS_FILE_KEY,
        port = config.base_port,
    )
}

fn build_main_container(config: &Config, session: &Session) -> Container {
    let has_repository = session.request.repository.is_some();
    let mut mounts = vec![
        VolumeMount {
            name: "workdir".into(),
            mount_path: if has_repository {
                "/workdir".into()
            } else {
                "/home/agentapi/workdir".into()
            },
            ..Default::default()
        },
        VolumeMount {
            name: "dot-claude".into(),
            mount_path: "/home/agentapi/.claude".into(),
            ..Default::default()
        },
        VolumeMount {
            name: "claude-credentials".into(),
            mount_path: "/tmp/claude-credentials".into(),
            read_only: Some(true),
            ..Default::default()
        },
        VolumeMount {
            name: "session-settings".into(),
            mount_path: "/etc/agentapi/settings".into(),
            read_only: Some(true),
            ..Default::default()
        },
        VolumeMount {
            name: "notification-subscriptions-source".into(),
            mount_path: "/etc/agentapi/subscriptions".into(),
            read_only: Some(true),
            ..Default::default()
        },
        VolumeMount {
            name: "claude-agentapi-history".into(),
            mount_path: "/home/agentapi/.agentapi".into(),
            ..Default::default()
        },
    ];
    if config.mcp_servers_enabled {
        mounts.push(VolumeMount {
            name: "mcp-config-source".into(),
            mount_path: "/etc/agentapi/mcp".into(),
            read_only: Some(true),
            ..Default::default()
        });
    }
    if session.webhook_payload.is_some() {
        mounts.push(VolumeMount {
            name: "webhook-payload".into(),
            mount_path: "/etc/agentapi/webhook".into(),
            read_only: Some(true),
            ..Default::default()
        });
    }

    Container {
        name: "agentapi".into(),
        image: Some(config.image.clone()),
        image_pull_policy: Some(config.image_pull_policy.clone()),
        working_dir: Some(if has_repository {
            "/workdir/repo".into()
        } else {
            "/home/agentapi/workdir".into()
        }),
        command: Some(vec!["sh".into(), "-c".into(), main_startup_script(config)]),
        ports: Some(vec![ContainerPort {
            name: Some("http".into()),
            container_port: config.base_port,
            protocol: Some("TCP".into()),
            ..Default::default()
        }]),
        env_from: Some(env_from_sources(config, session)),
        liveness_probe: Some(http_probe(config.base_port, "/status", 30, 10)),
        readiness_probe: Some(http_probe(config.base_port, "/status", 5, 5)),
        resources: Some(ResourceRequirements {
            requests: Some(quantity_map(&config.cpu_request, &config.memory_request)),
            limits: Some(quantity_map(&config.cpu_limit, &config.memory_limit)),
            ..Default::default()
        }),
        volume_mounts: Some(mounts),
        ..Default::default()
    }
}

fn credentials_sync_script(config: &Config, session: &Session) -> String {
    // kubectl create, then replace on AlreadyExists: the sidecar's service
    // account has create/update but no get on Secrets.
    format!(
        concat!(
            "CRED_FILE=/home/agentapi/.claude/.credentials.json\n",
            "last=\"\"\n",
            "while true; do\n",
            "  if [ -f \"$CRED_FILE\" ]; then\n",
            "    sum=$(sha256sum \"$CRED_FILE\" | cut -d' ' -f1)\n",
            "    if [ \"$sum\" != \"$last\" ]; then\n",
            "      encoded=$(base64 -w0 < \"$CRED_FILE\")\n",
            "      cat > /tmp/live-secret.yaml <<EOF\n",
            "apiVersion: v1\n",
            "kind: Secret\n",
            "metadata:\n",
            "  name: {secret}\n",
            "  namespace: {namespace}\n",
            "data:\n",
            "  {key}: $encoded\n",
            "EOF\n",
            "      if kubectl create -f /tmp/live-secret.yaml 2>/dev/null || \\\n",
            "         kubectl replace -f /tmp/live-secret.yaml; then\n",
            "        last=\"$sum\"\n",
            "      fi\n",
            "    fi\n",
            "  fi\n",
            "  sleep 10\n",
            "done\n",
        ),
        secret = names::live_agent_env_secret_name(&session.request.user_id),
        namespace = session.namespace,
        key = CREDENTIALS_FILE_KEY,
    )
}

fn build_credentials_sync_container(config: &Config, session: &Session) -> Container {
    Container {
        name: "credentials-sync".into(),
        image: Some(config.credentials_sync_image.clone()),
        command: Some(vec![
            "sh".into(),
            "-c".into(),
            credentials_sync_script(config, session),
        ]),
        volume_mounts: Some(vec![VolumeMount {
            name: "dot-claude".into(),
            mount_path: "/home/agentapi/.claude".into(),
            read_only: Some(true),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

fn initial_message_script(config: &Config) -> String {
    format!(
        concat!(
            "MARKER=/var/run/initial-message-state/sent\n",
            "MESSAGE_FILE=/etc/initial-message/message\n",
            "BASE=http://localhost:{port}\n",
            "if [ -f \"$MARKER\" ]; then\n",
            "  sleep infinity\n",
            "fi\n",
            "i=0\n",
            "until curl -fs \"$BASE/status\" > /dev/null; do\n",
            "  i=$((i+1)); [ $i -ge 120 ] && exit 1\n",
            "  sleep 0.5\n",
            "done\n",
            "i=0\n",
            "until curl -fs \"$BASE/status\" | grep -q '\"stable\"'; do\n",
            "  i=$((i+1)); [ $i -ge 60 ] && exit 1\n",
            "  sleep 1\n",
            "done\n",
            "if curl -fs \"$BASE/messages\" | grep -q '\"role\":\"user\"'; then\n",
            "  touch \"$MARKER\"\n",
            "  sleep infinity\n",
            "fi\n",
            "attempt=0\n",
            "while [ $attempt -lt 5 ]; do\n",
            "  body=$(printf '{{\"content\":%s,\"type\":\"user\"}}' \\\n",
            "    \"$(python3 -c 'import json,sys;print(json.dumps(sys.stdin.read()))' < \"$MESSAGE_FILE\" 2>/dev/null \\\n",
            "       || sed -e 's/\\\\/\\\\\\\\/g' -e 's/\"/\\\\\"/g' -e 's/^/\"/' -e 's/$/\"/' \"$MESSAGE_FILE\")\")\n",
            "  if curl -fs -X POST -H 'Content-Type: application/json' -d \"$body\" \"$BASE/message\"; then\n",
            "    touch \"$MARKER\"\n",
            "    sleep infinity\n",
            "  fi\n",
            "  attempt=$((attempt+1))\n",
            "  sleep 1\n",
            "  until curl -fs \"$BASE/status\" | grep -q '\"stable\"'; do sleep 1; done\n",
            "done\n",
            "exit 1\n",
        ),
        port = config.base_port,
    )
}

fn build_initial_message_container(config: &Config) -> Container {
    Container {
        name: "initial-message-sender".into(),
        image: Some(config.image.clone()),
        command: Some(vec!["sh".into(), "-c".into(), initial_message_script(config)]),
        volume_mounts: Some(vec![
            VolumeMount {
                name: "initial-message".into(),
                mount_path: "/etc/initial-message".into(),
                read_only: Some(true),
                ..Default::default()
            },
            VolumeMount {
                name: "initial-message-state".into(),
                mount_path: "/var/run/initial-message-state".into(),
                ..Default::default()
            },
        ]),
        ..Default::default()
    }
}

fn build_slack_container(config: &Config, session: &Session, channel: &str) -> Option<Container> {
    let token_secret = config.slack_bot_token_secret_name.as_ref()?;
    let thread_ts = session
        .request
        .slack
        .as_ref()
        .and_then(|p| p.thread_ts.clone())
        .unwrap_or_default();

    Some(Container {
        name: "slack-integration".into(),
        image: Some(config.slack_integration_image.clone()),
        env: Some(vec![
            EnvVar {
                name: "SLACK_BOT_TOKEN".into(),
                value_from: Some(EnvVarSource {
                    secret_key_ref: Some(SecretKeySelector {
                        name: token_secret.clone(),
                        key: config.slack_bot_token_secret_key.clone(),
                        optional: Some(false),
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            },
            env_var("SLACK_CHANNEL_ID", channel),
            env_var("SLACK_THREAD_TS", &thread_ts),
        ]),
        volume_mounts: Some(vec![VolumeMount {
            name: "claude-agentapi-history".into(),
            mount_path: "/home/agentapi/.agentapi".into(),
            read_only: Some(true),
            ..Default::default()
        }]),
        ..Default::default()
    })
}

fn placeholder(value: Option<&String>) -> String {
    match value {
        Some(v) if !v.is_empty() => v.clone(),
        _ => "-".to_owned(),
    }
}

fn build_otelcol_container(config: &Config, session: &Session) -> Container {
    let request = &session.request;
    Container {
        name: "otelcol".into(),
        image: Some(config.otel_collector_image.clone()),
        args: Some(vec!["--config=/etc/otelcol/config.yaml".into()]),
        // The shared ConfigMap references these through ${env:...}; empty
        // values get "-" so the transform processor always has an attribute.
        env: Some(vec![
            env_var("AGENTAPI_SESSION_ID", &session.id),
            env_var("AGENTAPI_USER_ID", &request.user_id),
            env_var("AGENTAPI_TEAM_ID", &placeholder(request.team_id.as_ref())),
            env_var(
                "AGENTAPI_SCHEDULE_ID",
                &placeholder(request.tags.get("schedule-id")),
            ),
            env_var(
                "AGENTAPI_WEBHOOK_ID",
                &placeholder(request.tags.get("webhook-id")),
            ),
            env_var(
                "AGENTAPI_AGENT_TYPE",
                &placeholder(request.agent_type.as_ref()),
            ),
        ]),
        ports: Some(vec![ContainerPort {
            name: Some("metrics".into()),
            container_port: config.otel_collector_exporter_port,
            protocol: Some("TCP".into()),
            ..Default::default()
        }]),
        resources: Some(ResourceRequirements {
            requests: Some(quantity_map(
                &config.otel_collector_cpu_request,
                &config.otel_collector_memory_request,
            )),
            limits: Some(quantity_map(
                &config.otel_collector_cpu_limit,
                &config.otel_collector_memory_limit,
            )),
            ..Default::default()
        }),
        volume_mounts: Some(vec![VolumeMount {
            name: "otelcol-config".into(),
            mount_path: "/etc/otelcol".into(),
            read_only: Some(true),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// Volumes
// ---------------------------------------------------------------------------

fn secret_volume(name: &str, secret_name: &str, optional: bool) -> Volume {
    Volume {
        name: name.into(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret_name.to_owned()),
            optional: Some(optional),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn empty_dir_volume(name: &str) -> Volume {
    Volume {
        name: name.into(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }
}

/// Projected volume unioning base/team/user MCP bundles under distinct
/// subpaths; EmptyDir fallback when no source exists.
fn mcp_config_volume(config: &Config, session: &Session) -> Volume {
    let mut sources = Vec::new();
    let mut project = |secret_name: String, subdir: String| {
        sources.push(VolumeProjection {
            secret: Some(SecretProjection {
                name: secret_name,
                optional: Some(true),
                items: Some(vec![KeyToPath {
                    key: MCP_SERVERS_KEY.into(),
                    path: format!("{subdir}/{MCP_SERVERS_KEY}"),
                    ..Default::default()
                }]),
            }),
            ..Default::default()
        });
    };

    if let Some(base) = &config.mcp_servers_base_secret {
        project(base.clone(), "base".into());
    }
    for (index, team) in session.request.teams.iter().enumerate() {
        project(names::mcp_servers_secret_name(team), format!("team-{index}"));
    }
    project(
        names::mcp_servers_secret_name(&session.request.user_id),
        "user".into(),
    );

    if sources.is_empty() {
        return empty_dir_volume("mcp-config-source");
    }
    Volume {
        name: "mcp-config-source".into(),
        projected: Some(ProjectedVolumeSource {
            sources: Some(sources),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn build_volumes(config: &Config, session: &Session) -> Vec<Volume> {
    let request = &session.request;
    let mut volumes = Vec::new();

    if config.pvc_enabled {
        volumes.push(Volume {
            name: "workdir".into(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: session.pvc_name.clone(),
                ..Default::default()
            }),
            ..Default::default()
        });
    } else {
        volumes.push(empty_dir_volume("workdir"));
    }

    // Team-scope sessions have no per-user live credential Secret.
    if request.scope == ResourceScope::User {
        volumes.push(secret_volume(
            "claude-credentials",
            &names::live_agent_env_secret_name(&request.user_id),
            true,
        ));
    } else {
        volumes.push(empty_dir_volume("claude-credentials"));
    }

    volumes.push(empty_dir_volume("dot-claude"));
    volumes.push(secret_volume(
        "notification-subscriptions-source",
        &names::notification_subscriptions_secret_name(&request.user_id),
        true,
    ));
    volumes.push(secret_volume(
        "session-settings",
        &names::session_settings_secret_name(&session.id),
        false,
    ));

    if request.initial_message.is_some() {
        volumes.push(secret_volume(
            "initial-message",
            &names::initial_message_secret_name(&session.service_name),
            false,
        ));
        volumes.push(empty_dir_volume("initial-message-state"));
    }
    if session.webhook_payload.is_some() {
        volumes.push(secret_volume(
            "webhook-payload",
            &names::webhook_payload_secret_name(&session.service_name),
            false,
        ));
    }
    if config.mcp_servers_enabled {
        volumes.push(mcp_config_volume(config, session));
    }
    if config.otel_collector_enabled {
        volumes.push(Volume {
            name: "otelcol-config".into(),
            config_map: Some(ConfigMapVolumeSource {
                name: super::otel::OTEL_CONFIG_MAP_NAME.to_owned(),
                ..Default::default()
            }),
            ..Default::default()
        });
    }
    volumes.push(empty_dir_volume("claude-agentapi-history"));

    volumes
}

// ---------------------------------------------------------------------------
// Top-level objects
// ---------------------------------------------------------------------------

fn parse_tolerations(config: &Config) -> Option<Vec<Toleration>> {
    let raw = config.tolerations_json.as_ref()?;
    match serde_json::from_str(raw) {
        Ok(tolerations) => Some(tolerations),
        Err(e) => {
            tracing::warn!(error = %e, "ignoring unparseable tolerations config");
            None
        }
    }
}

pub fn build_deployment(config: &Config, session: &Session) -> Deployment {
    let request = &session.request;

    let mut containers = vec![build_main_container(config, session)];
    if request.scope == ResourceScope::User {
        containers.push(build_credentials_sync_container(config, session));
    }
    if request.initial_message.is_some() {
        containers.push(build_initial_message_container(config));
    }
    if let Some(slack) = &request.slack
        && !slack.channel.is_empty()
        && let Some(container) = build_slack_container(config, session, &slack.channel)
    {
        containers.push(container);
    }
    if config.otel_collector_enabled {
        containers.push(build_otelcol_container(config, session));
    }

    let node_selector: BTreeMap<String, String> = config.node_selector.iter().cloned().collect();

    Deployment {
        metadata: ObjectMeta {
            name: Some(session.deployment_name.clone()),
            namespace: Some(session.namespace.clone()),
            labels: Some(session_labels(session)),
            annotations: Some(session_annotations(config, session)),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(BTreeMap::from([(
                    labels::LABEL_SESSION_ID.to_owned(),
                    session.id.clone(),
                )])),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(session_labels(session)),
                    annotations: Some(session_annotations(config, session)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(SESSION_SERVICE_ACCOUNT.into()),
                    security_context: Some(PodSecurityContext {
                        run_as_user: Some(999),
                        run_as_group: Some(999),
                        fs_group: Some(999),
                        ..Default::default()
                    }),
                    containers,
                    volumes: Some(build_volumes(config, session)),
                    node_selector: (!node_selector.is_empty()).then_some(node_selector),
                    tolerations: parse_tolerations(config),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn build_service(config: &Config, session: &Session) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(session.service_name.clone()),
            namespace: Some(session.namespace.clone()),
            labels: Some(session_labels(session)),
            annotations: Some(session_annotations(config, session)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".into()),
            selector: Some(BTreeMap::from([(
                labels::LABEL_SESSION_ID.to_owned(),
                session.id.clone(),
            )])),
            ports: Some(vec![ServicePort {
                name: Some("http".into()),
                port: config.base_port,
                target_port: Some(IntOrString::Int(config.base_port)),
                protocol: Some("TCP".into()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn build_pvc(config: &Config, session: &Session) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(session.pvc_name.clone()),
            namespace: Some(session.namespace.clone()),
            labels: Some(session_labels(session)),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".into()]),
            storage_class_name: config.pvc_storage_class.clone(),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_owned(),
                    Quantity(config.pvc_storage_size.clone()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build the session-owned Secret holding one opaque payload.
pub fn build_owned_secret(
    session: &Session,
    name: &str,
    kind: &str,
    data: BTreeMap<String, String>,
) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            namespace: Some(session.namespace.clone()),
            labels: Some(owned_secret_labels(session, kind)),
            ..Default::default()
        },
        string_data: Some(data),
        ..Default::default()
    }
}
