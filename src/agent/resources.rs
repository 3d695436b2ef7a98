//! Pure builders for the long-lived agent template: a headless Service and a
//! StatefulSet with a per-replica volume claim.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, EnvVar, EnvVarSource,
    HTTPGetAction, ObjectFieldSelector, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PodSpec, PodTemplateSpec, Probe, ResourceRequirements, SecretVolumeSource, Service,
    ServicePort, ServiceSpec, Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::k8s::names;

use super::AgentConfig;

const AGENT_PORT: i32 = 8080;

fn agent_selector(config: &AgentConfig) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_owned(), "agentapi-proxy".to_owned()),
        ("component".to_owned(), "agent".to_owned()),
        ("agent-id".to_owned(), config.agent_id.clone()),
    ])
}

/// Headless Service fronting the StatefulSet's stable network identity.
pub fn build_agent_service(config: &AgentConfig) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(names::agent_headless_service_name(&config.agent_id)),
            namespace: Some(config.namespace.clone()),
            labels: Some(agent_selector(config)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".into()),
            selector: Some(agent_selector(config)),
            ports: Some(vec![ServicePort {
                name: Some("http".into()),
                port: AGENT_PORT,
                target_port: Some(IntOrString::Int(AGENT_PORT)),
                protocol: Some("TCP".into()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn field_ref_env(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.into(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: field_path.into(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

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

/// Init container seeding the shared config/env dirs; both copies are
/// best-effort because the source ConfigMap/Secret may not exist yet.
fn build_setup_container() -> Container {
    Container {
        name: "setup".into(),
        image: Some("busybox:1.36".into()),
        command: Some(vec![
            "sh".into(),
            "-c".into(),
            concat!(
                "cp -r /config/. /shared/config/ 2>/dev/null || true; ",
                "cp -r /secret/. /shared/env/ 2>/dev/null || true",
            )
            .into(),
        ]),
        volume_mounts: Some(vec![
            VolumeMount {
                name: "config-volume".into(),
                mount_path: "/config".into(),
                read_only: Some(true),
                ..Default::default()
            },
            VolumeMount {
                name: "secret-volume".into(),
                mount_path: "/secret".into(),
                read_only: Some(true),
                ..Default::default()
            },
            VolumeMount {
                name: "shared-config".into(),
                mount_path: "/shared/config".into(),
                ..Default::default()
            },
            VolumeMount {
                name: "shared-env".into(),
                mount_path: "/shared/env".into(),
                ..Default::default()
            },
        ]),
        ..Default::default()
    }
}

fn build_agent_container(config: &AgentConfig) -> Container {
    Container {
        name: "agent".into(),
        image: Some(config.image.clone()),
        ports: Some(vec![ContainerPort {
            name: Some("http".into()),
            container_port: AGENT_PORT,
            protocol: Some("TCP".into()),
            ..Default::default()
        }]),
        env: Some(vec![
            env_var("AGENT_ID", &config.agent_id),
            env_var("SESSION_ID", &config.session_id),
            env_var("USER_ID", &config.user_id),
            field_ref_env("POD_NAME", "metadata.name"),
            field_ref_env("POD_NAMESPACE", "metadata.namespace"),
            field_ref_env("POD_IP", "status.podIP"),
            env_var("SESSION_PROVIDER", "kubernetes"),
            env_var("K8S_NAMESPACE", &config.namespace),
            env_var("USER_CONFIG_PATH", "/shared/config"),
            env_var("USER_ENV_PATH", "/shared/env"),
        ]),
        resources: Some(ResourceRequirements {
            requests: Some(quantity_map(&config.cpu_request, &config.memory_request)),
            limits: Some(quantity_map(&config.cpu_limit, &config.memory_limit)),
            ..Default::default()
        }),
        liveness_probe: Some(Probe {
            http_get: Some(HTTPGetAction {
                path: Some("/health".into()),
                port: IntOrString::Int(AGENT_PORT),
                ..Default::default()
            }),
            initial_delay_seconds: Some(30),
            period_seconds: Some(10),
            ..Default::default()
        }),
        readiness_probe: Some(Probe {
            http_get: Some(HTTPGetAction {
                path: Some("/ready".into()),
                port: IntOrString::Int(AGENT_PORT),
                ..Default::default()
            }),
            initial_delay_seconds: Some(5),
            period_seconds: Some(5),
            ..Default::default()
        }),
        volume_mounts: Some(vec![
            VolumeMount {
                name: "data".into(),
                mount_path: "/data".into(),
                ..Default::default()
            },
            VolumeMount {
                name: "shared-config".into(),
                mount_path: "/shared/config".into(),
                read_only: Some(true),
                ..Default::default()
            },
            VolumeMount {
                name: "shared-env".into(),
                mount_path: "/shared/env".into(),
                read_only: Some(true),
                ..Default::default()
            },
        ]),
        ..Default::default()
    }
}

pub fn build_agent_stateful_set(config: &AgentConfig) -> StatefulSet {
    let mut pod_labels = agent_selector(config);
    pod_labels.insert("session-id".to_owned(), config.session_id.clone());

    StatefulSet {
        metadata: ObjectMeta {
            name: Some(names::agent_stateful_set_name(&config.agent_id)),
            namespace: Some(config.namespace.clone()),
            labels: Some(agent_selector(config)),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(1),
            service_name: Some(names::agent_headless_service_name(&config.agent_id)),
            selector: LabelSelector {
                match_labels: Some(agent_selector(config)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pod_labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("Always".into()),
                    init_containers: Some(vec![build_setup_container()]),
                    containers: vec![build_agent_container(config)],
                    volumes: Some(vec![
                        Volume {
                            name: "config-volume".into(),
                            config_map: Some(ConfigMapVolumeSource {
                                name: format!("user-{}-notifications", config.user_id),
                                optional: Some(true),
                                ..Default::default()
                            }),
                            ..Default::default()
                        },
                        Volume {
                            name: "secret-volume".into(),
                            secret: Some(SecretVolumeSource {
                                secret_name: Some(format!("user-{}-env", config.user_id)),
                                optional: Some(true),
                                ..Default::default()
                            }),
                            ..Default::default()
                        },
                        Volume {
                            name: "shared-config".into(),
                            empty_dir: Some(EmptyDirVolumeSource::default()),
                            ..Default::default()
                        },
                        Volume {
                            name: "shared-env".into(),
                            empty_dir: Some(EmptyDirVolumeSource::default()),
                            ..Default::default()
                        },
                    ]),
                    ..Default::default()
                }),
            },
            volume_claim_templates: Some(vec![PersistentVolumeClaim {
                metadata: ObjectMeta {
                    name: Some("data".into()),
                    ..Default::default()
                },
                spec: Some(PersistentVolumeClaimSpec {
                    access_modes: Some(vec!["ReadWriteOnce".into()]),
                    resources: Some(VolumeResourceRequirements {
                        requests: Some(BTreeMap::from([(
                            "storage".to_owned(),
                            Quantity(config.storage_size.clone()),
                        )])),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
