use std::env;
use std::time::Duration;

/// Orchestrator configuration, loaded from the process environment.
///
/// Every knob here has an observable effect on the composed objects or the
/// lifecycle manager; none is decorative.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,

    /// All Secrets/Deployments/Services/PVCs are created here.
    pub namespace: String,
    /// Main agent HTTP port and Service target port.
    pub base_port: i32,

    pub image: String,
    pub image_pull_policy: String,
    pub cpu_request: String,
    pub cpu_limit: String,
    pub memory_request: String,
    pub memory_limit: String,

    pub pvc_enabled: bool,
    pub pvc_storage_size: String,
    pub pvc_storage_class: Option<String>,

    /// Phase-1 watcher timeout (Deployment never became ready).
    pub pod_start_timeout: Duration,
    /// Deletion timeout.
    pub pod_stop_timeout: Duration,

    /// Base Claude-config Secret ensured on startup.
    pub claude_config_base_secret: String,
    /// Prefix for per-user notification ConfigMaps.
    pub claude_config_user_config_map_prefix: String,

    pub github_secret_name: Option<String>,
    pub github_config_secret_name: Option<String>,

    pub mcp_servers_enabled: bool,
    pub mcp_servers_base_secret: Option<String>,
    pub settings_base_secret: Option<String>,

    pub otel_collector_enabled: bool,
    pub otel_collector_image: String,
    pub otel_collector_scrape_interval: String,
    pub otel_collector_claude_code_port: i32,
    pub otel_collector_exporter_port: i32,
    pub otel_collector_cpu_request: String,
    pub otel_collector_cpu_limit: String,
    pub otel_collector_memory_request: String,
    pub otel_collector_memory_limit: String,

    pub slack_bot_token_secret_name: Option<String>,
    pub slack_bot_token_secret_key: String,
    pub slack_integration_image: String,

    /// kubectl-bearing image for the credentials-sync sidecar.
    pub credentials_sync_image: String,

    pub node_selector: Vec<(String, String)>,
    /// Raw JSON array of tolerations, passed through to the Pod spec.
    pub tolerations_json: Option<String>,
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.into())
}

fn var_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn var_bool(key: &str, default: bool) -> bool {
    env::var(key).map_or(default, |v| matches!(v.as_str(), "1" | "true" | "yes"))
}

fn var_i32(key: &str, default: i32) -> i32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn var_secs(key: &str, default: u64) -> Duration {
    Duration::from_secs(
        env::var(key)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default),
    )
}

/// `node-role=agent,zone=a` → `[("node-role","agent"), ("zone","a")]`
fn parse_selector(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            if k.trim().is_empty() {
                return None;
            }
            Some((k.trim().to_owned(), v.trim().to_owned()))
        })
        .collect()
}

impl Config {
    pub fn load() -> Self {
        Self {
            listen: var_or("AGENTAPI_LISTEN", "0.0.0.0:8080"),
            namespace: var_or("AGENTAPI_NAMESPACE", "agentapi-proxy"),
            base_port: var_i32("AGENTAPI_BASE_PORT", 9000),
            image: var_or("AGENTAPI_IMAGE", "agentapi-proxy:latest"),
            image_pull_policy: var_or("AGENTAPI_IMAGE_PULL_POLICY", "IfNotPresent"),
            cpu_request: var_or("AGENTAPI_CPU_REQUEST", "100m"),
            cpu_limit: var_or("AGENTAPI_CPU_LIMIT", "500m"),
            memory_request: var_or("AGENTAPI_MEMORY_REQUEST", "256Mi"),
            memory_limit: var_or("AGENTAPI_MEMORY_LIMIT", "512Mi"),
            pvc_enabled: var_bool("AGENTAPI_PVC_ENABLED", true),
            pvc_storage_size: var_or("AGENTAPI_PVC_STORAGE_SIZE", "1Gi"),
            pvc_storage_class: var_opt("AGENTAPI_PVC_STORAGE_CLASS"),
            pod_start_timeout: var_secs("AGENTAPI_POD_START_TIMEOUT", 300),
            pod_stop_timeout: var_secs("AGENTAPI_POD_STOP_TIMEOUT", 60),
            claude_config_base_secret: var_or(
                "AGENTAPI_CLAUDE_CONFIG_BASE_SECRET",
                "agentapi-claude-config-base",
            ),
            claude_config_user_config_map_prefix: var_or(
                "AGENTAPI_CLAUDE_CONFIG_USER_CONFIGMAP_PREFIX",
                "user-",
            ),
            github_secret_name: var_opt("AGENTAPI_GITHUB_SECRET_NAME"),
            github_config_secret_name: var_opt("AGENTAPI_GITHUB_CONFIG_SECRET_NAME"),
            mcp_servers_enabled: var_bool("AGENTAPI_MCP_SERVERS_ENABLED", false),
            mcp_servers_base_secret: var_opt("AGENTAPI_MCP_SERVERS_BASE_SECRET"),
            settings_base_secret: var_opt("AGENTAPI_SETTINGS_BASE_SECRET"),
            otel_collector_enabled: var_bool("AGENTAPI_OTEL_COLLECTOR_ENABLED", false),
            otel_collector_image: var_or(
                "AGENTAPI_OTEL_COLLECTOR_IMAGE",
                "otel/opentelemetry-collector-contrib:latest",
            ),
            otel_collector_scrape_interval: var_or(
                "AGENTAPI_OTEL_COLLECTOR_SCRAPE_INTERVAL",
                "15s",
            ),
            otel_collector_claude_code_port: var_i32(
                "AGENTAPI_OTEL_COLLECTOR_CLAUDE_CODE_PORT",
                9464,
            ),
            otel_collector_exporter_port: var_i32("AGENTAPI_OTEL_COLLECTOR_EXPORTER_PORT", 9090),
            otel_collector_cpu_request: var_or("AGENTAPI_OTEL_COLLECTOR_CPU_REQUEST", "50m"),
            otel_collector_cpu_limit: var_or("AGENTAPI_OTEL_COLLECTOR_CPU_LIMIT", "200m"),
            otel_collector_memory_request: var_or("AGENTAPI_OTEL_COLLECTOR_MEMORY_REQUEST", "64Mi"),
            otel_collector_memory_limit: var_or("AGENTAPI_OTEL_COLLECTOR_MEMORY_LIMIT", "256Mi"),
            slack_bot_token_secret_name: var_opt("AGENTAPI_SLACK_BOT_TOKEN_SECRET_NAME"),
            slack_bot_token_secret_key: var_or("AGENTAPI_SLACK_BOT_TOKEN_SECRET_KEY", "token"),
            slack_integration_image: var_or(
                "AGENTAPI_SLACK_INTEGRATION_IMAGE",
                "agentapi-slack-integration:latest",
            ),
            credentials_sync_image: var_or(
                "AGENTAPI_CREDENTIALS_SYNC_IMAGE",
                "bitnami/kubectl:latest",
            ),
            node_selector: env::var("AGENTAPI_NODE_SELECTOR")
                .map(|raw| parse_selector(&raw))
                .unwrap_or_default(),
            tolerations_json: var_opt("AGENTAPI_TOLERATIONS"),
        }
    }
}

impl Default for Config {
    /// Documented defaults without touching the environment; used by tests.
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".into(),
            namespace: "agentapi-proxy".into(),
            base_port: 9000,
            image: "agentapi-proxy:latest".into(),
            image_pull_policy: "IfNotPresent".into(),
            cpu_request: "100m".into(),
            cpu_limit: "500m".into(),
            memory_request: "256Mi".into(),
            memory_limit: "512Mi".into(),
            pvc_enabled: true,
            pvc_storage_size: "1Gi".into(),
            pvc_storage_class: None,
            pod_start_timeout: Duration::from_secs(300),
            pod_stop_timeout: Duration::from_secs(60),
            claude_config_base_secret: "agentapi-claude-config-base".into(),
            claude_config_user_config_map_prefix: "user-".into(),
            github_secret_name: None,
            github_config_secret_name: None,
            mcp_servers_enabled: false,
            mcp_servers_base_secret: None,
            settings_base_secret: None,
            otel_collector_enabled: false,
            otel_collector_image: "otel/opentelemetry-collector-contrib:latest".into(),
            otel_collector_scrape_interval: "15s".into(),
            otel_collector_claude_code_port: 9464,
            otel_collector_exporter_port: 9090,
            otel_collector_cpu_request: "50m".into(),
            otel_collector_cpu_limit: "200m".into(),
            otel_collector_memory_request: "64Mi".into(),
            otel_collector_memory_limit: "256Mi".into(),
            slack_bot_token_secret_name: None,
            slack_bot_token_secret_key: "token".into(),
            slack_integration_image: "agentapi-slack-integration:latest".into(),
            credentials_sync_image: "bitnami/kubectl:latest".into(),
            node_selector: Vec::new(),
            tolerations_json: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_parsing() {
        assert_eq!(
            parse_selector("node-role=agent,zone=a"),
            vec![
                ("node-role".to_owned(), "agent".to_owned()),
                ("zone".to_owned(), "a".to_owned())
            ]
        );
        assert!(parse_selector("").is_empty());
        assert!(parse_selector("no-equals").is_empty());
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.namespace, "agentapi-proxy");
        assert_eq!(cfg.base_port, 9000);
        assert!(cfg.pvc_enabled);
        assert_eq!(cfg.pvc_storage_size, "1Gi");
        assert_eq!(cfg.pod_stop_timeout, Duration::from_secs(60));
    }
}
