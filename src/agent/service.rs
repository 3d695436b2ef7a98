use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Service;
use kube::Api;
use kube::api::{DeleteParams, PostParams};

use crate::k8s::{is_already_exists, is_not_found, names};

use super::AgentConfig;
use super::resources::{build_agent_service, build_agent_stateful_set};

/// Port for long-lived agent provisioning. Consumed by embedders running the
/// durable-agent flavor; the per-request session manager does not use it.
#[async_trait]
pub trait AgentService: Send + Sync {
    async fn ensure_agent(&self, config: &AgentConfig) -> anyhow::Result<()>;
    async fn delete_agent(&self, agent_id: &str, namespace: &str) -> anyhow::Result<()>;
}

pub struct AgentServiceImpl {
    client: kube::Client,
}

impl AgentServiceImpl {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AgentService for AgentServiceImpl {
    #[tracing::instrument(skip(self, config), fields(agent_id = %config.agent_id), err)]
    async fn ensure_agent(&self, config: &AgentConfig) -> anyhow::Result<()> {
        let services: Api<Service> = Api::namespaced(self.client.clone(), &config.namespace);
        match services
            .create(&PostParams::default(), &build_agent_service(config))
            .await
        {
            Ok(_) => {}
            Err(e) if is_already_exists(&e) => {}
            Err(e) => return Err(e.into()),
        }

        let sets: Api<StatefulSet> = Api::namespaced(self.client.clone(), &config.namespace);
        match sets
            .create(&PostParams::default(), &build_agent_stateful_set(config))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_already_exists(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    #[tracing::instrument(skip(self), err)]
    async fn delete_agent(&self, agent_id: &str, namespace: &str) -> anyhow::Result<()> {
        // StatefulSet first so Pods stop resolving the headless name mid-teardown.
        let sets: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        match sets
            .delete(
                &names::agent_stateful_set_name(agent_id),
                &DeleteParams::default(),
            )
            .await
        {
            Ok(_) => {}
            Err(e) if is_not_found(&e) => {}
            Err(e) => return Err(e.into()),
        }

        let services: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        match services
            .delete(
                &names::agent_headless_service_name(agent_id),
                &DeleteParams::default(),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::mock::MockAgentService;
    use super::*;

    #[tokio::test]
    async fn mock_records_lifecycle_calls() {
        let service = MockAgentService::default();
        service
            .ensure_agent(&AgentConfig::new("a1", "s1", "alice"))
            .await
            .unwrap();
        service.delete_agent("a1", "agentapi-proxy").await.unwrap();
        assert_eq!(*service.ensured.lock().unwrap(), vec!["a1"]);
        assert_eq!(*service.deleted.lock().unwrap(), vec!["a1"]);
    }
}
