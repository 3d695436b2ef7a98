use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Api;
use kube::api::PostParams;

use super::labels::{LABEL_APP_MANAGED_BY, MANAGED_BY_PROXY};
use super::{is_already_exists, names};

/// Best-effort pre-creation of per-team service accounts. A failure here
/// never fails a session create; the Pod surfaces a missing account itself.
#[async_trait]
pub trait ServiceAccountEnsurer: Send + Sync {
    async fn ensure_for_team(&self, team_id: &str);
}

pub struct KubeServiceAccountEnsurer {
    api: Api<ServiceAccount>,
    namespace: String,
}

impl KubeServiceAccountEnsurer {
    pub fn new(client: kube::Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            namespace: namespace.to_owned(),
        }
    }
}

#[async_trait]
impl ServiceAccountEnsurer for KubeServiceAccountEnsurer {
    async fn ensure_for_team(&self, team_id: &str) {
        let name = names::team_service_account_name(team_id);
        let account = ServiceAccount {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(self.namespace.clone()),
                labels: Some(BTreeMap::from([(
                    LABEL_APP_MANAGED_BY.to_owned(),
                    MANAGED_BY_PROXY.to_owned(),
                )])),
                ..Default::default()
            },
            ..Default::default()
        };
        match self.api.create(&PostParams::default(), &account).await {
            Ok(_) => {
                tracing::info!(team_id, service_account = %name, "created team service account");
            }
            Err(e) if is_already_exists(&e) => {}
            Err(e) => {
                tracing::warn!(team_id, service_account = %name, error = %e, "service account creation failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn team_service_account_name_is_sanitized() {
        assert_eq!(
            names::team_service_account_name("org/team-a"),
            "agentapi-proxy-team-org-team-a"
        );
    }
}
