//! Exact label and annotation keys written onto every owned object.
//!
//! Labels drive listing and ownership gating; annotations carry values that
//! do not fit the label domain (raw team ids, RFC3339 timestamps).

use std::collections::BTreeMap;

use super::names;

// Standard Kubernetes app labels.
pub const LABEL_APP_NAME: &str = "app.kubernetes.io/name";
pub const LABEL_APP_INSTANCE: &str = "app.kubernetes.io/instance";
pub const LABEL_APP_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

pub const APP_NAME_SESSION: &str = "agentapi-session";
pub const MANAGED_BY_PROXY: &str = "agentapi-proxy";

// Session-owned object labels.
pub const LABEL_SESSION_ID: &str = "agentapi.proxy/session-id";
pub const LABEL_USER_ID: &str = "agentapi.proxy/user-id";
pub const LABEL_SCOPE: &str = "agentapi.proxy/scope";
pub const LABEL_TEAM_ID_HASH: &str = "agentapi.proxy/team-id-hash";
pub const LABEL_TAG_PREFIX: &str = "agentapi.proxy/tag-";
pub const LABEL_RESOURCE: &str = "agentapi.proxy/resource";

// Ownership gate.
pub const LABEL_MANAGED_BY: &str = "agentapi.proxy/managed-by";
pub const MANAGED_BY_SETTINGS: &str = "settings";
pub const MANAGED_BY_SESSION_MANAGER: &str = "session-manager";

// Settings-managed secret kinds. `env` is the canonical credentials kind;
// `credentials` is the legacy kind the migrator retires.
pub const LABEL_ENV: &str = "agentapi.proxy/env";
pub const LABEL_CREDENTIALS: &str = "agentapi.proxy/credentials";
pub const LABEL_MCP_SERVERS: &str = "agentapi.proxy/mcp-servers";
pub const LABEL_SUBSCRIPTIONS: &str = "agentapi.proxy/subscriptions";
pub const LABEL_RESOURCE_NAME: &str = "agentapi.proxy/resource-name";

// Annotations.
pub const ANNOTATION_CREATED_AT: &str = "agentapi.proxy/created-at";
pub const ANNOTATION_UPDATED_AT: &str = "agentapi.proxy/updated-at";
pub const ANNOTATION_TEAM_ID: &str = "agentapi.proxy/team-id";
pub const ANNOTATION_AGENT_TYPE: &str = "agentapi.proxy/agent-type";

pub const ANNOTATION_PROMETHEUS_SCRAPE: &str = "prometheus.io/scrape";
pub const ANNOTATION_PROMETHEUS_PORT: &str = "prometheus.io/port";
pub const ANNOTATION_PROMETHEUS_PATH: &str = "prometheus.io/path";

/// Full label key for a caller-provided tag.
pub fn tag_label_key(tag_key: &str) -> String {
    format!(
        "{LABEL_TAG_PREFIX}{}",
        names::sanitize_label_key_suffix(tag_key)
    )
}

/// Ownership label set for a settings-managed Secret:
/// `{<kind>=true, resource-name=<sanitized>, managed-by=settings}`.
pub fn settings_owned_labels(kind_label: &str, resource_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (kind_label.to_owned(), "true".into()),
        (
            LABEL_RESOURCE_NAME.to_owned(),
            names::sanitize_label_value(resource_name),
        ),
        (LABEL_MANAGED_BY.to_owned(), MANAGED_BY_SETTINGS.into()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_key_is_sanitized() {
        assert_eq!(tag_label_key("env"), "agentapi.proxy/tag-env");
        assert_eq!(tag_label_key("a b"), "agentapi.proxy/tag-a-b");
    }

    #[test]
    fn settings_labels_carry_gate() {
        let labels = settings_owned_labels(LABEL_ENV, "org/team");
        assert_eq!(labels[LABEL_ENV], "true");
        assert_eq!(labels[LABEL_MANAGED_BY], MANAGED_BY_SETTINGS);
        assert_eq!(labels[LABEL_RESOURCE_NAME], "org-team");
    }
}
