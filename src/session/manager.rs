//! Session lifecycle: create, get, list, delete, message proxy, and
//! restart-safe restoration.
//!
//! The in-memory map is a cache; the cluster is authoritative. One `RwLock`
//! guards the map and is never held across an API call.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use k8s_openapi::ByteString;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Api;
use kube::api::{DeleteParams, ListParams, PostParams, PropagationPolicy};
use serde::Deserialize;

use crate::config::Config;
use crate::credentials::ProviderChain;
use crate::encryption::registry::Registry;
use crate::k8s::labels::{
    self, APP_NAME_SESSION, LABEL_APP_MANAGED_BY, LABEL_APP_NAME, MANAGED_BY_PROXY,
    MANAGED_BY_SESSION_MANAGER,
};
use crate::k8s::service_account::ServiceAccountEnsurer;
use crate::k8s::{is_already_exists, is_not_found, names};
use crate::settings::decoded_data;
use crate::teams::TeamConfigRepository;

use super::error::SessionError;
use super::restore::{RestoredParts, parse_service};
use super::{
    ResourceScope, Session, SessionRequest, SessionStatus, compiler, deployment as composer,
    watcher,
};

const BASE_SECRET_TIMEOUT: Duration = Duration::from_secs(30);
const MESSAGE_ATTEMPTS: usize = 3;
const MESSAGE_RETRY_DELAY: Duration = Duration::from_secs(1);

const USER_KEY_CIPHERTEXT: &str = "key.enc";
const USER_KEY_METADATA: &str = "metadata.json";

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub user_id: Option<String>,
    pub scope: Option<ResourceScope>,
    /// Exact team match against the raw annotation.
    pub team_id: Option<String>,
    /// Membership filter: session's team must be one of these.
    pub team_ids: Vec<String>,
    pub tags: HashMap<String, String>,
}

/// Server-side label selector for the filter. The scope label is only added
/// for team queries: legacy user sessions predate the label and must keep
/// listing.
pub fn label_selector(filter: &SessionFilter) -> String {
    let mut parts = vec![
        format!("{LABEL_APP_MANAGED_BY}={MANAGED_BY_PROXY}"),
        format!("{LABEL_APP_NAME}={APP_NAME_SESSION}"),
    ];
    if let Some(user_id) = &filter.user_id {
        parts.push(format!(
            "{}={}",
            labels::LABEL_USER_ID,
            names::sanitize_label_value(user_id)
        ));
    }
    if filter.scope == Some(ResourceScope::Team) {
        parts.push(format!("{}=team", labels::LABEL_SCOPE));
    }
    if let Some(team_id) = &filter.team_id {
        parts.push(format!(
            "{}={}",
            labels::LABEL_TEAM_ID_HASH,
            names::hash_team_id(team_id)
        ));
    }
    parts.join(",")
}

/// Client-side filters the label selector cannot express exactly.
pub(crate) fn matches_filter(parts: &RestoredParts, filter: &SessionFilter) -> bool {
    if let Some(scope) = filter.scope
        && parts.scope != scope
    {
        return false;
    }
    if let Some(team_id) = &filter.team_id
        && parts.team_id.as_ref() != Some(team_id)
    {
        return false;
    }
    if !filter.team_ids.is_empty() {
        match &parts.team_id {
            Some(team_id) if filter.team_ids.contains(team_id) => {}
            _ => return false,
        }
    }
    // Tag labels were sanitized on write; sanitize the query the same way.
    for (key, value) in &filter.tags {
        let sanitized_key = names::sanitize_label_key_suffix(key);
        if parts.tags.get(&sanitized_key) != Some(&names::sanitize_label_value(value)) {
            return false;
        }
    }
    true
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

pub struct SessionManager {
    client: kube::Client,
    config: Arc<Config>,
    http: reqwest::Client,
    teams: Option<Arc<dyn TeamConfigRepository>>,
    credentials: ProviderChain,
    encryption: Arc<Registry>,
    service_accounts: Option<Arc<dyn ServiceAccountEnsurer>>,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionManager {
    pub fn new(
        client: kube::Client,
        config: Arc<Config>,
        teams: Option<Arc<dyn TeamConfigRepository>>,
        encryption: Arc<Registry>,
        service_accounts: Option<Arc<dyn ServiceAccountEnsurer>>,
    ) -> Self {
        Self {
            client,
            config,
            http: reqwest::Client::new(),
            teams,
            credentials: ProviderChain::default_chain(),
            encryption,
            service_accounts,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    fn secrets(&self) -> Api<Secret> {
        Api::namespaced(self.client.clone(), &self.config.namespace)
    }

    fn deployments(&self) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), &self.config.namespace)
    }

    fn services(&self) -> Api<Service> {
        Api::namespaced(self.client.clone(), &self.config.namespace)
    }

    fn pvcs(&self) -> Api<PersistentVolumeClaim> {
        Api::namespaced(self.client.clone(), &self.config.namespace)
    }

    fn insert(&self, session: Arc<Session>) {
        self.sessions
            .write()
            .expect("session map lock poisoned")
            .insert(session.id.clone(), session);
    }

    fn remove(&self, id: &str) {
        self.sessions
            .write()
            .expect("session map lock poisoned")
            .remove(id);
    }

    fn get_cached(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions
            .read()
            .expect("session map lock poisoned")
            .get(id)
            .cloned()
    }

    fn spawn_watcher(&self, session: &Arc<Session>) {
        tokio::spawn(watcher::run(
            self.client.clone(),
            session.clone(),
            self.config.pod_start_timeout,
        ));
    }

    // -----------------------------------------------------------------------
    // Create
    // -----------------------------------------------------------------------

    #[tracing::instrument(skip(self, request, webhook_payload), fields(session_id = %id, user_id = %request.user_id), err)]
    pub async fn create_session(
        &self,
        id: &str,
        request: SessionRequest,
        webhook_payload: Option<Vec<u8>>,
    ) -> Result<Arc<Session>, SessionError> {
        let session = Arc::new(Session::new(
            id,
            request,
            &self.config.namespace,
            self.config.base_port,
            webhook_payload,
        ));
        self.insert(session.clone());

        if let Err(e) = self.ensure_base_secret(&session.request.user_id).await {
            self.remove(id);
            return Err(e);
        }

        let mut pvc_created = false;
        if self.config.pvc_enabled {
            let pvc = composer::build_pvc(&self.config, &session);
            if let Err(e) = self.pvcs().create(&PostParams::default(), &pvc).await {
                self.remove(id);
                return Err(SessionError::ResourceCreateFailed {
                    kind: "PersistentVolumeClaim",
                    source: e,
                });
            }
            pvc_created = true;
        }

        let mut created_secrets = Vec::new();
        if let Err(e) = self
            .create_session_secrets(&session, &mut created_secrets)
            .await
        {
            self.compensate(&session, pvc_created, &created_secrets, false)
                .await;
            self.remove(id);
            return Err(e);
        }

        // Best-effort: a missing service account surfaces as a Pod event, not
        // a failed create.
        if session.request.scope == ResourceScope::Team
            && let Some(team_id) = &session.request.team_id
            && let Some(ensurer) = &self.service_accounts
        {
            ensurer.ensure_for_team(team_id).await;
        }

        let deployment = composer::build_deployment(&self.config, &session);
        if let Err(e) = self
            .deployments()
            .create(&PostParams::default(), &deployment)
            .await
        {
            self.compensate(&session, pvc_created, &created_secrets, false)
                .await;
            self.remove(id);
            return Err(SessionError::ResourceCreateFailed {
                kind: "Deployment",
                source: e,
            });
        }

        let service = composer::build_service(&self.config, &session);
        if let Err(e) = self
            .services()
            .create(&PostParams::default(), &service)
            .await
        {
            self.compensate(&session, pvc_created, &created_secrets, true)
                .await;
            self.remove(id);
            return Err(SessionError::ResourceCreateFailed {
                kind: "Service",
                source: e,
            });
        }

        self.spawn_watcher(&session);
        tracing::info!(
            session_id = %session.id,
            user_id = %session.request.user_id,
            scope = %session.request.scope,
            "session started"
        );
        Ok(session)
    }

    /// Idempotently ensure the base Claude-config Secret, seeding its
    /// credential file from the provider chain when one resolves. A
    /// concurrent create by another replica is accepted.
    async fn ensure_base_secret(&self, user_id: &str) -> Result<(), SessionError> {
        // Best-effort seed: an empty base secret is still valid.
        let credential_file = match self.credentials.load(user_id).await {
            Ok(Some(credentials)) => Some(credentials.raw_json.unwrap_or_else(|| {
                serde_json::json!({
                    "accessToken": credentials.access_token,
                    "refreshToken": credentials.refresh_token,
                    "expiresAt": credentials.expires_at,
                })
                .to_string()
            })),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "credential provider chain failed, creating empty base secret");
                None
            }
        };

        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(self.config.claude_config_base_secret.clone()),
                namespace: Some(self.config.namespace.clone()),
                labels: Some(BTreeMap::from([(
                    LABEL_APP_MANAGED_BY.to_owned(),
                    MANAGED_BY_PROXY.to_owned(),
                )])),
                ..Default::default()
            },
            string_data: credential_file.map(|raw| {
                BTreeMap::from([(composer::CREDENTIALS_FILE_KEY.to_owned(), raw)])
            }),
            ..Default::default()
        };
        let api = self.secrets();
        let post_params = PostParams::default();
        let create = api.create(&post_params, &secret);
        match tokio::time::timeout(BASE_SECRET_TIMEOUT, create).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) if is_already_exists(&e) => Ok(()),
            Ok(Err(e)) => Err(SessionError::ResourceCreateFailed {
                kind: "Secret",
                source: e,
            }),
            Err(_) => Err(SessionError::Other(anyhow::anyhow!(
                "timed out ensuring base claude config secret"
            ))),
        }
    }

    async fn create_owned_secret(
        &self,
        session: &Session,
        name: &str,
        kind: &'static str,
        data: BTreeMap<String, String>,
        created: &mut Vec<String>,
    ) -> Result<(), SessionError> {
        let secret = composer::build_owned_secret(session, name, kind, data);
        match self.secrets().create(&PostParams::default(), &secret).await {
            Ok(_) => {
                created.push(name.to_owned());
                Ok(())
            }
            Err(e) => Err(SessionError::ResourceCreateFailed {
                kind: "Secret",
                source: e,
            }),
        }
    }

    async fn create_session_secrets(
        &self,
        session: &Arc<Session>,
        created: &mut Vec<String>,
    ) -> Result<(), SessionError> {
        let request = &session.request;
        let service_name = &session.service_name;

        if let Some(message) = &request.initial_message {
            self.create_owned_secret(
                session,
                &names::initial_message_secret_name(service_name),
                "initial-message",
                BTreeMap::from([("message".to_owned(), message.clone())]),
                created,
            )
            .await?;
        }

        if let Some(token) = &request.github_token {
            self.create_owned_secret(
                session,
                &names::github_token_secret_name(service_name),
                "github-token",
                BTreeMap::from([("GITHUB_TOKEN".to_owned(), token.clone())]),
                created,
            )
            .await?;
        }

        // Best-effort: the payload is informational for the agent.
        if let Some(payload) = &session.webhook_payload {
            let name = names::webhook_payload_secret_name(service_name);
            let mut secret =
                composer::build_owned_secret(session, &name, "webhook-payload", BTreeMap::new());
            secret.string_data = None;
            secret.data = Some(BTreeMap::from([(
                "payload.json".to_owned(),
                ByteString(payload.clone()),
            )]));
            match self.secrets().create(&PostParams::default(), &secret).await {
                Ok(_) => created.push(name),
                Err(e) => {
                    tracing::warn!(session_id = %session.id, error = %e, "failed to write webhook payload secret");
                }
            }
        }

        // Best-effort: a team without configuration still gets a session.
        if request.scope == ResourceScope::Team {
            self.create_team_env_secret(session, created).await;
        }

        if request.scope == ResourceScope::User {
            match self.ensure_user_api_key(session).await {
                Ok(key) => {
                    self.create_owned_secret(
                        session,
                        &names::personal_api_key_secret_name(service_name),
                        "personal-api-key",
                        BTreeMap::from([("AGENTAPI_KEY".to_owned(), key)]),
                        created,
                    )
                    .await?;
                }
                Err(e) => {
                    return Err(SessionError::Other(
                        e.context("failed to provision personal api key"),
                    ));
                }
            }
        }

        if request.oneshot {
            let overlay = request
                .oneshot_settings
                .as_ref()
                .map_or_else(|| "{}".to_owned(), ToString::to_string);
            self.create_owned_secret(
                session,
                &names::oneshot_settings_secret_name(service_name),
                "oneshot-settings",
                BTreeMap::from([("settings.json".to_owned(), overlay)]),
                created,
            )
            .await?;
        }

        let settings = compiler::compile(&self.client, &self.config, session)
            .await
            .map_err(SessionError::Other)?;
        let payload = compiler::to_yaml(&settings).map_err(SessionError::Other)?;
        self.create_owned_secret(
            session,
            &names::session_settings_secret_name(&session.id),
            "session-settings",
            BTreeMap::from([(compiler::SETTINGS_KEY.to_owned(), payload)]),
            created,
        )
        .await?;

        Ok(())
    }

    async fn create_team_env_secret(&self, session: &Arc<Session>, created: &mut Vec<String>) {
        let Some(teams) = &self.teams else {
            return;
        };
        let Some(team_id) = &session.request.team_id else {
            return;
        };
        let team = match teams.get_team(team_id).await {
            Ok(Some(team)) => team,
            Ok(None) => {
                tracing::debug!(team_id, "no team config, skipping team env secret");
                return;
            }
            Err(e) => {
                tracing::warn!(team_id, error = %e, "team config lookup failed");
                return;
            }
        };

        let data: BTreeMap<String, String> = team.env.into_iter().collect();
        let name = names::team_env_secret_name(&session.id);
        if let Err(e) = self
            .create_owned_secret(session, &name, "team-env", data, created)
            .await
        {
            tracing::warn!(session_id = %session.id, error = %e, "failed to write team env secret");
        }
    }

    /// Per-user API key, generated once (`ap_<64 hex>`) and persisted
    /// encrypted in the user-level Secret for reuse across sessions.
    async fn ensure_user_api_key(&self, session: &Session) -> anyhow::Result<String> {
        let api = self.secrets();
        let name = names::user_api_key_secret_name(&session.request.user_id);

        if let Some(existing) = api.get_opt(&name).await? {
            let data = decoded_data(&existing);
            if let Some(key) = self.decrypt_user_api_key(&data) {
                return Ok(key);
            }
            tracing::warn!(secret = %name, "stored api key unreadable, regenerating");
            api.delete(&name, &DeleteParams::default()).await.ok();
        }

        let key = generate_api_key();
        let (ciphertext, metadata) = self.encryption.for_encryption().encrypt(key.as_bytes())?;
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(self.config.namespace.clone()),
                labels: Some(BTreeMap::from([
                    (
                        labels::LABEL_USER_ID.to_owned(),
                        names::sanitize_label_value(&session.request.user_id),
                    ),
                    (
                        labels::LABEL_MANAGED_BY.to_owned(),
                        MANAGED_BY_SESSION_MANAGER.to_owned(),
                    ),
                ])),
                ..Default::default()
            },
            string_data: Some(BTreeMap::from([
                (USER_KEY_CIPHERTEXT.to_owned(), BASE64.encode(&ciphertext)),
                (
                    USER_KEY_METADATA.to_owned(),
                    serde_json::to_string(&metadata)?,
                ),
            ])),
            ..Default::default()
        };
        match api.create(&PostParams::default(), &secret).await {
            Ok(_) => {}
            // Another create raced us; their key wins next time, ours serves
            // this session.
            Err(e) if is_already_exists(&e) => {}
            Err(e) => return Err(e.into()),
        }
        Ok(key)
    }

    fn decrypt_user_api_key(&self, data: &BTreeMap<String, String>) -> Option<String> {
        let ciphertext = BASE64.decode(data.get(USER_KEY_CIPHERTEXT)?).ok()?;
        let metadata = serde_json::from_str(data.get(USER_KEY_METADATA)?).ok()?;
        let plaintext = self
            .encryption
            .for_decryption(&metadata)
            .decrypt(&ciphertext, &metadata)
            .ok()?;
        String::from_utf8(plaintext).ok()
    }

    /// Compensating deletes for a failed create. Failures here are logged and
    /// never mask the root error.
    async fn compensate(
        &self,
        session: &Session,
        pvc_created: bool,
        created_secrets: &[String],
        deployment_created: bool,
    ) {
        if deployment_created
            && let Err(e) = self
                .deployments()
                .delete(&session.deployment_name, &DeleteParams::default())
                .await
            && !is_not_found(&e)
        {
            tracing::warn!(session_id = %session.id, error = %e, "rollback: deployment delete failed");
        }
        if pvc_created
            && let Err(e) = self
                .pvcs()
                .delete(&session.pvc_name, &DeleteParams::default())
                .await
            && !is_not_found(&e)
        {
            tracing::warn!(session_id = %session.id, error = %e, "rollback: pvc delete failed");
        }
        for name in created_secrets {
            if let Err(e) = self.secrets().delete(name, &DeleteParams::default()).await
                && !is_not_found(&e)
            {
                tracing::warn!(session_id = %session.id, secret = %name, error = %e, "rollback: secret delete failed");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Get / List
    // -----------------------------------------------------------------------

    pub async fn get_session(&self, id: &str) -> Result<Option<Arc<Session>>, SessionError> {
        if let Some(session) = self.get_cached(id) {
            return Ok(Some(session));
        }

        let Some(service) = self.services().get_opt(&names::service_name(id)).await? else {
            return Ok(None);
        };
        let Some(parts) = parse_service(&service, self.config.base_port) else {
            return Ok(None);
        };
        let deployment = self.deployments().get_opt(&names::deployment_name(id)).await?;
        Ok(Some(self.restore(parts, deployment.as_ref()).await?))
    }

    pub async fn list_sessions(
        &self,
        filter: &SessionFilter,
    ) -> Result<Vec<Arc<Session>>, SessionError> {
        let selector = label_selector(filter);
        let params = ListParams::default().labels(&selector);

        let services = self.services().list(&params).await?.items;
        let deployments = self.deployments().list(&params).await?.items;

        // O(1) join by session id.
        let mut by_session: HashMap<String, Deployment> = deployments
            .into_iter()
            .filter_map(|deployment| {
                let id = deployment
                    .metadata
                    .labels
                    .as_ref()?
                    .get(labels::LABEL_SESSION_ID)?
                    .clone();
                Some((id, deployment))
            })
            .collect();

        let mut sessions = Vec::new();
        for service in &services {
            let Some(parts) = parse_service(service, self.config.base_port) else {
                continue;
            };
            if !matches_filter(&parts, filter) {
                continue;
            }
            let session = match self.get_cached(&parts.id) {
                Some(session) => session,
                None => {
                    let deployment = by_session.remove(&parts.id);
                    self.restore(parts, deployment.as_ref()).await?
                }
            };
            sessions.push(session);
        }

        sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(sessions)
    }

    /// Build a fresh handle from cluster state, install it, start a watcher.
    async fn restore(
        &self,
        parts: RestoredParts,
        deployment: Option<&Deployment>,
    ) -> Result<Arc<Session>, SessionError> {
        let service_name = names::service_name(&parts.id);
        let initial_message = match self
            .secrets()
            .get_opt(&names::initial_message_secret_name(&service_name))
            .await?
        {
            Some(secret) => decoded_data(&secret).remove("message"),
            None => None,
        };

        let status = match deployment {
            Some(deployment) => watcher::status_from_deployment(Some(deployment)),
            None => {
                let fetched = self
                    .deployments()
                    .get_opt(&names::deployment_name(&parts.id))
                    .await?;
                watcher::status_from_deployment(fetched.as_ref())
            }
        };

        let created_at = parts.created_at;
        let updated_at = parts.updated_at;
        let service_port = parts.service_port;
        let (id, request) = parts.into_request(initial_message);
        let session = Arc::new(Session::with_timestamps(
            &id,
            request,
            &self.config.namespace,
            service_port,
            None,
            created_at,
            updated_at,
        ));
        session.set_status(status);

        // Another task may have restored concurrently; first install wins and
        // owns the watcher.
        {
            let mut map = self.sessions.write().expect("session map lock poisoned");
            if let Some(existing) = map.get(&id) {
                return Ok(existing.clone());
            }
            map.insert(id.clone(), session.clone());
        }
        self.spawn_watcher(&session);
        tracing::info!(session_id = %id, "session restored from cluster state");
        Ok(session)
    }

    // -----------------------------------------------------------------------
    // Delete / shutdown
    // -----------------------------------------------------------------------

    #[tracing::instrument(skip(self), err)]
    pub async fn delete_session(&self, id: &str) -> Result<(), SessionError> {
        let Some(session) = self.get_session(id).await? else {
            return Err(SessionError::SessionNotFound);
        };

        session.cancellation().cancel();

        let deletion = self.delete_session_objects(&session);
        let errors = match tokio::time::timeout(self.config.pod_stop_timeout, deletion).await {
            Ok(errors) => errors,
            Err(_) => vec![format!(
                "deletion timed out after {:?}",
                self.config.pod_stop_timeout
            )],
        };

        self.remove(id);
        tracing::info!(
            session_id = %id,
            user_id = %session.request.user_id,
            scope = %session.request.scope,
            "session ended"
        );

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SessionError::DeletionFailed(errors))
        }
    }

    /// Reverse-dependency delete: Service → Deployment (foreground) → PVC →
    /// Secrets. Not-found is success everywhere.
    async fn delete_session_objects(&self, session: &Session) -> Vec<String> {
        let mut errors = Vec::new();
        let mut record = |kind: &str, name: &str, result: Result<(), kube::Error>| {
            if let Err(e) = result
                && !is_not_found(&e)
            {
                errors.push(format!("{kind} {name}: {e}"));
            }
        };

        record(
            "service",
            &session.service_name,
            self.services()
                .delete(&session.service_name, &DeleteParams::default())
                .await
                .map(|_| ()),
        );

        let foreground = DeleteParams {
            propagation_policy: Some(PropagationPolicy::Foreground),
            ..Default::default()
        };
        record(
            "deployment",
            &session.deployment_name,
            self.deployments()
                .delete(&session.deployment_name, &foreground)
                .await
                .map(|_| ()),
        );

        if self.config.pvc_enabled {
            record(
                "persistentvolumeclaim",
                &session.pvc_name,
                self.pvcs()
                    .delete(&session.pvc_name, &DeleteParams::default())
                    .await
                    .map(|_| ()),
            );
        }

        let service_name = &session.service_name;
        let secret_names = [
            names::initial_message_secret_name(service_name),
            names::github_token_secret_name(service_name),
            names::webhook_payload_secret_name(service_name),
            names::team_env_secret_name(&session.id),
            names::session_settings_secret_name(&session.id),
            names::personal_api_key_secret_name(service_name),
            names::oneshot_settings_secret_name(service_name),
        ];
        for name in &secret_names {
            record(
                "secret",
                name,
                self.secrets()
                    .delete(name, &DeleteParams::default())
                    .await
                    .map(|_| ()),
            );
        }

        errors
    }

    /// Drop all in-memory handles. Cluster objects stay; sessions are
    /// restored from them on the next start.
    pub fn shutdown(&self) {
        let mut map = self.sessions.write().expect("session map lock poisoned");
        let count = map.len();
        map.clear();
        tracing::info!(sessions = count, "session manager shut down");
    }

    // -----------------------------------------------------------------------
    // In-Pod HTTP proxy
    // -----------------------------------------------------------------------

    fn session_base_url(&self, session: &Session) -> String {
        format!(
            "http://{}.{}.svc.cluster.local:{}",
            session.service_name, session.namespace, session.service_port
        )
    }

    #[tracing::instrument(skip(self, content), err)]
    pub async fn send_message(&self, id: &str, content: &str) -> Result<(), SessionError> {
        let Some(session) = self.get_session(id).await? else {
            return Err(SessionError::SessionNotFound);
        };
        ensure_messageable(session.status())?;
        post_message(&self.http, &self.session_base_url(&session), content).await
    }

    #[tracing::instrument(skip(self), err)]
    pub async fn get_messages(&self, id: &str) -> Result<Vec<AgentMessage>, SessionError> {
        let Some(session) = self.get_session(id).await? else {
            return Err(SessionError::SessionNotFound);
        };
        fetch_messages(&self.http, &self.session_base_url(&session)).await
    }
}

/// Messages require a live session. A session whose Deployment never became
/// ready surfaces as the distinct timeout error, not a generic status error.
fn ensure_messageable(status: SessionStatus) -> Result<(), SessionError> {
    if status == SessionStatus::Timeout {
        return Err(SessionError::Timeout);
    }
    if !status.accepts_messages() {
        return Err(SessionError::InvalidSessionStatus(status));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Agent HTTP contract
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct AgentMessage {
    pub role: String,
    pub content: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    messages: Vec<AgentMessage>,
}

/// POST the message with retries; fixed 1 s pause between attempts.
pub async fn post_message(
    http: &reqwest::Client,
    base_url: &str,
    content: &str,
) -> Result<(), SessionError> {
    let body = serde_json::json!({ "content": content, "type": "user" });
    let mut last_error = None;
    for attempt in 1..=MESSAGE_ATTEMPTS {
        match http
            .post(format!("{base_url}/message"))
            .json(&body)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
        {
            Ok(_) => return Ok(()),
            Err(e) => {
                tracing::warn!(attempt, error = %e, "message delivery failed");
                last_error = Some(e);
                if attempt < MESSAGE_ATTEMPTS {
                    tokio::time::sleep(MESSAGE_RETRY_DELAY).await;
                }
            }
        }
    }
    Err(SessionError::AgentRequest(
        last_error.expect("at least one attempt"),
    ))
}

pub async fn fetch_messages(
    http: &reqwest::Client,
    base_url: &str,
) -> Result<Vec<AgentMessage>, SessionError> {
    let response = http
        .get(format!("{base_url}/messages"))
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(SessionError::AgentRequest)?;
    let decoded: MessagesResponse = response
        .json()
        .await
        .map_err(SessionError::AgentRequest)?;
    Ok(decoded.messages)
}

fn generate_api_key() -> String {
    let mut bytes = [0u8; 32];
    rand::fill(&mut bytes);
    format!("ap_{}", hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_base_set_always_present() {
        let selector = label_selector(&SessionFilter::default());
        assert_eq!(
            selector,
            "app.kubernetes.io/managed-by=agentapi-proxy,app.kubernetes.io/name=agentapi-session"
        );
    }

    #[test]
    fn selector_adds_sanitized_user() {
        let filter = SessionFilter {
            user_id: Some("user@example.com".into()),
            ..Default::default()
        };
        assert!(label_selector(&filter).contains("agentapi.proxy/user-id=user-example.com"));
    }

    #[test]
    fn selector_adds_scope_only_for_team() {
        // User-scope queries must not add the label: legacy sessions without
        // a scope label still belong in the result.
        let filter = SessionFilter {
            scope: Some(ResourceScope::User),
            ..Default::default()
        };
        assert!(!label_selector(&filter).contains("agentapi.proxy/scope"));

        let filter = SessionFilter {
            scope: Some(ResourceScope::Team),
            ..Default::default()
        };
        assert!(label_selector(&filter).contains("agentapi.proxy/scope=team"));
    }

    #[test]
    fn selector_hashes_team_filter() {
        let filter = SessionFilter {
            team_id: Some("org/team-a".into()),
            ..Default::default()
        };
        assert!(label_selector(&filter).contains(&format!(
            "agentapi.proxy/team-id-hash={}",
            names::hash_team_id("org/team-a")
        )));
    }

    fn parts(scope: ResourceScope, team_id: Option<&str>) -> RestoredParts {
        RestoredParts {
            id: "s1".into(),
            user_id: "alice".into(),
            scope,
            team_id: team_id.map(String::from),
            tags: HashMap::from([("env".to_owned(), "prod".to_owned())]),
            agent_type: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            service_port: 9000,
        }
    }

    #[test]
    fn filter_scope_mismatch_rejects() {
        let filter = SessionFilter {
            scope: Some(ResourceScope::Team),
            ..Default::default()
        };
        assert!(!matches_filter(&parts(ResourceScope::User, None), &filter));
        assert!(matches_filter(
            &parts(ResourceScope::Team, Some("t")),
            &filter
        ));
    }

    #[test]
    fn filter_team_exact_match() {
        let filter = SessionFilter {
            team_id: Some("org/team-a".into()),
            ..Default::default()
        };
        assert!(matches_filter(
            &parts(ResourceScope::Team, Some("org/team-a")),
            &filter
        ));
        assert!(!matches_filter(
            &parts(ResourceScope::Team, Some("org/team-b")),
            &filter
        ));
        assert!(!matches_filter(&parts(ResourceScope::Team, None), &filter));
    }

    #[test]
    fn filter_team_membership() {
        let filter = SessionFilter {
            team_ids: vec!["org/a".into(), "org/b".into()],
            ..Default::default()
        };
        assert!(matches_filter(
            &parts(ResourceScope::Team, Some("org/b")),
            &filter
        ));
        assert!(!matches_filter(
            &parts(ResourceScope::Team, Some("org/c")),
            &filter
        ));
    }

    #[test]
    fn filter_tags_compare_sanitized() {
        // Stored tag values went through label sanitization; the query value
        // must be sanitized before comparing.
        let mut restored = parts(ResourceScope::User, None);
        restored
            .tags
            .insert("branch".to_owned(), "feature-x".to_owned());
        let filter = SessionFilter {
            tags: HashMap::from([("branch".to_owned(), "feature/x".to_owned())]),
            ..Default::default()
        };
        assert!(matches_filter(&restored, &filter));

        let filter = SessionFilter {
            tags: HashMap::from([("branch".to_owned(), "other".to_owned())]),
            ..Default::default()
        };
        assert!(!matches_filter(&restored, &filter));
    }

    #[test]
    fn live_sessions_accept_messages() {
        assert!(ensure_messageable(SessionStatus::Starting).is_ok());
        assert!(ensure_messageable(SessionStatus::Active).is_ok());
    }

    #[test]
    fn timed_out_session_surfaces_timeout_error() {
        assert!(matches!(
            ensure_messageable(SessionStatus::Timeout),
            Err(SessionError::Timeout)
        ));
    }

    #[test]
    fn other_terminal_statuses_surface_status_error() {
        for status in [
            SessionStatus::Unhealthy,
            SessionStatus::Stopped,
            SessionStatus::Unknown,
        ] {
            assert!(matches!(
                ensure_messageable(status),
                Err(SessionError::InvalidSessionStatus(s)) if s == status
            ));
        }
    }

    #[test]
    fn api_key_format() {
        let key = generate_api_key();
        assert!(key.starts_with("ap_"));
        assert_eq!(key.len(), 3 + 64);
        assert!(key[3..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(key, generate_api_key());
    }
}
