//! Folds the request, process environment, and cluster-side Secrets into the
//! single `settings.yaml` the session Pod consumes.
//!
//! The session Pod's service account cannot read Secrets; the controller
//! dereferences them here, at creation time. The compiled Secret must stay
//! under the same RBAC protection as the sources.

use std::collections::BTreeMap;
use std::env;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::Api;
use serde::Serialize;
use serde_json::Value;

use crate::config::Config;
use crate::k8s::names;
use crate::settings::mcp::{McpServerDefinition, McpServersDocument};
use crate::settings::{decoded_data, merge};

use super::deployment::env_from_secrets;
use super::{RepositoryInfo, ResourceScope, Session};

pub const SETTINGS_KEY: &str = "settings.yaml";
const SETTINGS_JSON_KEY: &str = "settings.json";
const CLAUDE_JSON_KEY: &str = "claude.json";

/// Agent type whose server needs HOST/PORT in its environment.
pub const AGENT_TYPE_CLAUDE_AGENTAPI: &str = "claude-agentapi";

// ---------------------------------------------------------------------------
// Document shape
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSettings {
    pub session: SessionSection,
    pub env: BTreeMap<String, String>,
    pub claude: ClaudeSection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<RepositoryInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_message: Option<String>,
    /// Base64 of the raw webhook body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_payload: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github: Option<GithubSection>,
    pub startup: StartupSection,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSection {
    pub id: String,
    pub user_id: String,
    pub scope: ResourceScope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    pub oneshot: bool,
    pub teams: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaudeSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claude_json: Option<Value>,
    pub settings_json: Value,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub mcp_servers: BTreeMap<String, McpServerDefinition>,
}

#[derive(Debug, Serialize)]
pub struct GithubSection {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct StartupSection {
    pub command: String,
    pub args: Vec<String>,
}

// ---------------------------------------------------------------------------
// Process-environment inputs
// ---------------------------------------------------------------------------

/// Values the compiler forwards from the orchestrator's own environment.
#[derive(Debug, Clone, Default)]
pub struct ProcessEnv {
    pub claude_args: Option<String>,
    pub vapid_public_key: Option<String>,
    pub vapid_private_key: Option<String>,
    pub vapid_contact_email: Option<String>,
}

impl ProcessEnv {
    pub fn from_env() -> Self {
        let read = |key: &str| env::var(key).ok().filter(|v| !v.is_empty());
        Self {
            claude_args: read("CLAUDE_ARGS"),
            vapid_public_key: read("VAPID_PUBLIC_KEY"),
            vapid_private_key: read("VAPID_PRIVATE_KEY"),
            vapid_contact_email: read("VAPID_CONTACT_EMAIL"),
        }
    }
}

// ---------------------------------------------------------------------------
// Env compilation
// ---------------------------------------------------------------------------

/// Fold the environment map for one session. Precedence is a contract: each
/// numbered block overrides everything before it, and within the final secret
/// expansion the mount order decides.
pub(crate) fn compile_env(
    config: &Config,
    session: &Session,
    process_env: &ProcessEnv,
    secret_envs: &[(String, BTreeMap<String, String>)],
) -> BTreeMap<String, String> {
    let request = &session.request;
    let mut env = BTreeMap::new();

    // 1. System-provided.
    env.insert("AGENTAPI_PORT".to_owned(), config.base_port.to_string());
    env.insert("AGENTAPI_SESSION_ID".to_owned(), session.id.clone());
    env.insert("AGENTAPI_USER_ID".to_owned(), request.user_id.clone());
    env.insert("HOME".to_owned(), "/home/agentapi".to_owned());
    env.insert(
        "GITHUB_APP_PEM_PATH".to_owned(),
        "/tmp/github-app/app.pem".to_owned(),
    );

    // 2. Telemetry.
    if config.otel_collector_enabled {
        env.insert("CLAUDE_CODE_ENABLE_TELEMETRY".to_owned(), "1".to_owned());
        env.insert("OTEL_METRICS_EXPORTER".to_owned(), "prometheus".to_owned());
    }

    // 3. Team scope.
    if request.scope == ResourceScope::Team
        && let Some(team_id) = &request.team_id
    {
        env.insert("AGENTAPI_TEAM_ID".to_owned(), team_id.clone());
    }

    // 4. Agent type.
    if let Some(agent_type) = &request.agent_type {
        env.insert("AGENTAPI_AGENT_TYPE".to_owned(), agent_type.clone());
        if agent_type == AGENT_TYPE_CLAUDE_AGENTAPI {
            env.insert("HOST".to_owned(), "0.0.0.0".to_owned());
            env.insert("PORT".to_owned(), config.base_port.to_string());
        }
    }

    // 5. CLAUDE_ARGS: request wins over process environment.
    if let Some(args) = request
        .environment
        .get("CLAUDE_ARGS")
        .cloned()
        .or_else(|| process_env.claude_args.clone())
    {
        env.insert("CLAUDE_ARGS".to_owned(), args);
    }

    // 6. Repository info.
    if let Some(repo) = &request.repository {
        env.insert("AGENTAPI_REPO_URL".to_owned(), repo.url.clone());
        if let Some(branch) = &repo.branch {
            env.insert("AGENTAPI_REPO_BRANCH".to_owned(), branch.clone());
        }
    }

    // 7. Remaining request environment.
    for (key, value) in &request.environment {
        if key == "CLAUDE_ARGS" {
            continue;
        }
        env.insert(key.clone(), value.clone());
    }

    // 8. Push-notification keys.
    let vapid = [
        ("VAPID_PUBLIC_KEY", &process_env.vapid_public_key),
        ("VAPID_PRIVATE_KEY", &process_env.vapid_private_key),
        ("VAPID_CONTACT_EMAIL", &process_env.vapid_contact_email),
    ];
    for (key, value) in vapid {
        if let Some(value) = value {
            env.insert(key.to_owned(), value.clone());
        }
    }

    // 9. Secret expansion in mount order; duplicates override.
    for (_, data) in secret_envs {
        for (key, value) in data {
            env.insert(key.clone(), value.clone());
        }
    }

    env
}

// ---------------------------------------------------------------------------
// Layered document merging
// ---------------------------------------------------------------------------

async fn read_secret_key(
    api: &Api<Secret>,
    secret_name: &str,
    key: &str,
) -> anyhow::Result<Option<String>> {
    let Some(secret) = api.get_opt(secret_name).await? else {
        return Ok(None);
    };
    Ok(decoded_data(&secret).remove(key))
}

/// Read a JSON document from a secret key; missing secrets are skipped
/// silently, existing-but-malformed ones are warned about and skipped.
async fn read_json_layer(
    api: &Api<Secret>,
    secret_name: &str,
    key: &str,
) -> anyhow::Result<Option<Value>> {
    let Some(raw) = read_secret_key(api, secret_name, key).await? else {
        return Ok(None);
    };
    match serde_json::from_str(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            tracing::warn!(secret = secret_name, key, error = %e, "skipping malformed settings layer");
            Ok(None)
        }
    }
}

/// User-level Claude config overlay from the per-user ConfigMap
/// (`<claudeConfigUserConfigMapPrefix><sanitized user>`), merged over the
/// base Secret's document.
async fn read_user_claude_config(
    client: &kube::Client,
    config: &Config,
    session: &Session,
) -> anyhow::Result<Option<Value>> {
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), &session.namespace);
    let name = format!(
        "{}{}",
        config.claude_config_user_config_map_prefix,
        names::sanitize_secret_name(&session.request.user_id)
    );
    let Some(config_map) = api.get_opt(&name).await? else {
        return Ok(None);
    };
    let Some(raw) = config_map
        .data
        .and_then(|mut data| data.remove(CLAUDE_JSON_KEY))
    else {
        return Ok(None);
    };
    match serde_json::from_str(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            tracing::warn!(config_map = %name, error = %e, "skipping malformed user claude config");
            Ok(None)
        }
    }
}

/// Layer order shared by the settings and MCP merges:
/// base → teams (declared order) → user → oneshot.
fn overlay_owners(session: &Session) -> Vec<String> {
    let mut owners: Vec<String> = session.request.teams.clone();
    owners.push(session.request.user_id.clone());
    owners
}

async fn merge_settings_json(
    api: &Api<Secret>,
    config: &Config,
    session: &Session,
) -> anyhow::Result<Value> {
    let mut layers = Vec::new();
    if let Some(base) = &config.settings_base_secret {
        layers.push(read_json_layer(api, base, SETTINGS_JSON_KEY).await?);
    }
    for owner in overlay_owners(session) {
        let name = names::settings_overlay_secret_name(&owner);
        layers.push(read_json_layer(api, &name, SETTINGS_JSON_KEY).await?);
    }
    if session.request.oneshot {
        let name = names::oneshot_settings_secret_name(&session.service_name);
        layers.push(read_json_layer(api, &name, SETTINGS_JSON_KEY).await?);
    }
    Ok(merge::merge_layers(layers))
}

async fn merge_mcp_servers(
    api: &Api<Secret>,
    config: &Config,
    session: &Session,
) -> anyhow::Result<BTreeMap<String, McpServerDefinition>> {
    if !config.mcp_servers_enabled {
        return Ok(BTreeMap::new());
    }

    let mut secret_names = Vec::new();
    if let Some(base) = &config.mcp_servers_base_secret {
        secret_names.push(base.clone());
    }
    for owner in overlay_owners(session) {
        secret_names.push(names::mcp_servers_secret_name(&owner));
    }

    // Equal names override, later wins.
    let mut merged = BTreeMap::new();
    for secret_name in secret_names {
        let Some(raw) = read_secret_key(api, &secret_name, crate::settings::mcp::MCP_SERVERS_KEY)
            .await?
        else {
            continue;
        };
        match serde_json::from_str::<McpServersDocument>(&raw) {
            Ok(document) => merged.extend(document.mcp_servers),
            Err(e) => {
                tracing::warn!(secret = %secret_name, error = %e, "skipping malformed mcp bundle");
            }
        }
    }
    Ok(merged)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Compile the full settings document for a session from the in-cluster
/// state at creation time.
#[tracing::instrument(skip_all, fields(session_id = %session.id), err)]
pub async fn compile(
    client: &kube::Client,
    config: &Config,
    session: &Session,
) -> anyhow::Result<SessionSettings> {
    let api: Api<Secret> = Api::namespaced(client.clone(), &session.namespace);
    let request = &session.request;

    let settings_json = merge_settings_json(&api, config, session).await?;
    let mcp_servers = merge_mcp_servers(&api, config, session).await?;
    let base_claude_json =
        read_json_layer(&api, &config.claude_config_base_secret, CLAUDE_JSON_KEY).await?;
    let user_claude_json = read_user_claude_config(client, config, session).await?;
    let claude_json = match (base_claude_json, user_claude_json) {
        (None, None) => None,
        (base, user) => Some(merge::merge_layers(vec![base, user])),
    };

    // Dereference every env Secret the Pod will consume, in mount order.
    let mut secret_envs = Vec::new();
    for entry in env_from_secrets(config, session) {
        if let Some(secret) = api.get_opt(&entry.name).await? {
            secret_envs.push((entry.name, decoded_data(&secret)));
        } else if !entry.optional {
            anyhow::bail!("required secret {} is missing", entry.name);
        }
    }

    let env = compile_env(config, session, &ProcessEnv::from_env(), &secret_envs);

    Ok(SessionSettings {
        session: SessionSection {
            id: session.id.clone(),
            user_id: request.user_id.clone(),
            scope: request.scope,
            team_id: request.team_id.clone(),
            agent_type: request.agent_type.clone(),
            oneshot: request.oneshot,
            teams: request.teams.clone(),
        },
        env,
        claude: ClaudeSection {
            claude_json,
            settings_json,
            mcp_servers,
        },
        repository: request.repository.clone(),
        initial_message: request.initial_message.clone(),
        webhook_payload: session
            .webhook_payload
            .as_ref()
            .map(|payload| BASE64.encode(payload)),
        github: request
            .github_token
            .clone()
            .map(|token| GithubSection { token }),
        startup: StartupSection {
            command: "agentapi".to_owned(),
            args: vec![
                "server".to_owned(),
                "--port".to_owned(),
                config.base_port.to_string(),
            ],
        },
    })
}

/// Render the document as the `settings.yaml` payload.
pub fn to_yaml(settings: &SessionSettings) -> anyhow::Result<String> {
    Ok(serde_yaml::to_string(settings)?)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::session::SessionRequest;

    fn session_with(request: SessionRequest) -> Session {
        Session::new("s1", request, "agentapi-proxy", 9000, None)
    }

    fn user_request() -> SessionRequest {
        SessionRequest {
            user_id: "alice".into(),
            teams: vec!["t1".into(), "t2".into()],
            ..Default::default()
        }
    }

    #[test]
    fn system_env_always_present() {
        let session = session_with(user_request());
        let env = compile_env(&Config::default(), &session, &ProcessEnv::default(), &[]);
        assert_eq!(env["AGENTAPI_PORT"], "9000");
        assert_eq!(env["AGENTAPI_SESSION_ID"], "s1");
        assert_eq!(env["AGENTAPI_USER_ID"], "alice");
        assert_eq!(env["HOME"], "/home/agentapi");
        assert_eq!(env["GITHUB_APP_PEM_PATH"], "/tmp/github-app/app.pem");
        assert!(!env.contains_key("CLAUDE_CODE_ENABLE_TELEMETRY"));
    }

    #[test]
    fn telemetry_env_follows_otel_flag() {
        let mut config = Config::default();
        config.otel_collector_enabled = true;
        let session = session_with(user_request());
        let env = compile_env(&config, &session, &ProcessEnv::default(), &[]);
        assert_eq!(env["CLAUDE_CODE_ENABLE_TELEMETRY"], "1");
        assert_eq!(env["OTEL_METRICS_EXPORTER"], "prometheus");
    }

    #[test]
    fn team_scope_exports_team_id() {
        let mut request = user_request();
        request.scope = ResourceScope::Team;
        request.team_id = Some("org/team-a".into());
        let session = session_with(request);
        let env = compile_env(&Config::default(), &session, &ProcessEnv::default(), &[]);
        assert_eq!(env["AGENTAPI_TEAM_ID"], "org/team-a");
    }

    #[test]
    fn claude_agentapi_variant_gets_host_and_port() {
        let mut request = user_request();
        request.agent_type = Some(AGENT_TYPE_CLAUDE_AGENTAPI.into());
        let session = session_with(request);
        let env = compile_env(&Config::default(), &session, &ProcessEnv::default(), &[]);
        assert_eq!(env["AGENTAPI_AGENT_TYPE"], AGENT_TYPE_CLAUDE_AGENTAPI);
        assert_eq!(env["HOST"], "0.0.0.0");
        assert_eq!(env["PORT"], "9000");

        let mut other = user_request();
        other.agent_type = Some("goose".into());
        let env = compile_env(
            &Config::default(),
            &session_with(other),
            &ProcessEnv::default(),
            &[],
        );
        assert!(!env.contains_key("HOST"));
    }

    #[test]
    fn claude_args_prefers_request_over_process() {
        let mut request = user_request();
        request
            .environment
            .insert("CLAUDE_ARGS".into(), "--from-request".into());
        let process = ProcessEnv {
            claude_args: Some("--from-process".into()),
            ..Default::default()
        };
        let env = compile_env(&Config::default(), &session_with(request), &process, &[]);
        assert_eq!(env["CLAUDE_ARGS"], "--from-request");

        let env = compile_env(
            &Config::default(),
            &session_with(user_request()),
            &process,
            &[],
        );
        assert_eq!(env["CLAUDE_ARGS"], "--from-process");
    }

    #[test]
    fn request_environment_overrides_earlier_steps() {
        let mut request = user_request();
        request.environment = HashMap::from([("HOME".to_owned(), "/custom".to_owned())]);
        let env = compile_env(
            &Config::default(),
            &session_with(request),
            &ProcessEnv::default(),
            &[],
        );
        assert_eq!(env["HOME"], "/custom");
    }

    #[test]
    fn secret_expansion_is_last_and_ordered() {
        // Scenario: t1 then t2 then alice; the user secret must win.
        let session = session_with(user_request());
        let secret_envs = vec![
            (
                "agent-env-t1".to_owned(),
                BTreeMap::from([("AWS_REGION".to_owned(), "us-east-1".to_owned())]),
            ),
            (
                "agent-env-t2".to_owned(),
                BTreeMap::from([("AWS_REGION".to_owned(), "eu-west-1".to_owned())]),
            ),
            (
                "agent-env-alice".to_owned(),
                BTreeMap::from([("AWS_REGION".to_owned(), "ap-northeast-1".to_owned())]),
            ),
        ];
        let env = compile_env(
            &Config::default(),
            &session,
            &ProcessEnv::default(),
            &secret_envs,
        );
        assert_eq!(env["AWS_REGION"], "ap-northeast-1");
    }

    #[test]
    fn vapid_keys_forwarded_when_present() {
        let process = ProcessEnv {
            vapid_public_key: Some("pub".into()),
            vapid_private_key: Some("priv".into()),
            vapid_contact_email: Some("ops@example.com".into()),
            ..Default::default()
        };
        let env = compile_env(
            &Config::default(),
            &session_with(user_request()),
            &process,
            &[],
        );
        assert_eq!(env["VAPID_PUBLIC_KEY"], "pub");
        assert_eq!(env["VAPID_PRIVATE_KEY"], "priv");
        assert_eq!(env["VAPID_CONTACT_EMAIL"], "ops@example.com");
    }

    #[test]
    fn repository_env_and_section() {
        let mut request = user_request();
        request.repository = Some(RepositoryInfo {
            url: "https://github.com/org/repo".into(),
            branch: Some("main".into()),
        });
        let env = compile_env(
            &Config::default(),
            &session_with(request),
            &ProcessEnv::default(),
            &[],
        );
        assert_eq!(env["AGENTAPI_REPO_URL"], "https://github.com/org/repo");
        assert_eq!(env["AGENTAPI_REPO_BRANCH"], "main");
    }

    #[test]
    fn yaml_rendering_uses_camel_case_sections() {
        let session = session_with(user_request());
        let settings = SessionSettings {
            session: SessionSection {
                id: session.id.clone(),
                user_id: "alice".into(),
                scope: ResourceScope::User,
                team_id: None,
                agent_type: None,
                oneshot: false,
                teams: vec!["t1".into()],
            },
            env: BTreeMap::from([("A".to_owned(), "1".to_owned())]),
            claude: ClaudeSection {
                claude_json: None,
                settings_json: serde_json::json!({"model": "default"}),
                mcp_servers: BTreeMap::new(),
            },
            repository: None,
            initial_message: Some("hi".into()),
            webhook_payload: None,
            github: None,
            startup: StartupSection {
                command: "agentapi".into(),
                args: vec!["server".into()],
            },
        };
        let yaml = to_yaml(&settings).unwrap();
        assert!(yaml.contains("userId: alice"));
        assert!(yaml.contains("initialMessage: hi"));
        assert!(yaml.contains("settingsJson:"));
        assert!(!yaml.contains("claudeJson"));
    }
}
