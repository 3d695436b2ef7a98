use std::sync::Arc;

use crate::config::Config;
use crate::encryption::registry::Registry;
use crate::k8s::service_account::{KubeServiceAccountEnsurer, ServiceAccountEnsurer};
use crate::session::manager::SessionManager;
use crate::settings::credentials::CredentialsSyncer;
use crate::settings::mcp::McpSyncer;
use crate::settings::subscriptions::SubscriptionsSyncer;
use crate::teams::TeamConfigRepository;

#[derive(Clone)]
pub struct AppState {
    pub kube: kube::Client,
    pub config: Arc<Config>,
    pub sessions: Arc<SessionManager>,
    pub credentials_syncer: Arc<CredentialsSyncer>,
    pub mcp_syncer: Arc<McpSyncer>,
    pub subscriptions_syncer: Arc<SubscriptionsSyncer>,
    pub encryption: Arc<Registry>,
}

impl AppState {
    pub fn new(
        kube: kube::Client,
        config: Config,
        teams: Option<Arc<dyn TeamConfigRepository>>,
        encryption: Arc<Registry>,
    ) -> Self {
        let config = Arc::new(config);
        let namespace = config.namespace.clone();
        let service_accounts: Arc<dyn ServiceAccountEnsurer> =
            Arc::new(KubeServiceAccountEnsurer::new(kube.clone(), &namespace));
        let sessions = Arc::new(SessionManager::new(
            kube.clone(),
            config.clone(),
            teams,
            encryption.clone(),
            Some(service_accounts),
        ));
        Self {
            credentials_syncer: Arc::new(CredentialsSyncer::new(kube.clone(), &namespace)),
            mcp_syncer: Arc::new(McpSyncer::new(kube.clone(), &namespace)),
            subscriptions_syncer: Arc::new(SubscriptionsSyncer::new(kube.clone(), &namespace)),
            kube,
            config,
            sessions,
            encryption,
        }
    }
}
