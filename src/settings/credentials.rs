use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use kube::Api;
use serde::{Deserialize, Serialize};

use crate::k8s::labels::{LABEL_CREDENTIALS, LABEL_ENV, settings_owned_labels};
use crate::k8s::names;

use super::{
    SyncOutcome, apply_owned_secret, decoded_data, delete_owned_secret, list_managed_secrets,
};

pub const KEY_OAUTH_TOKEN: &str = "CLAUDE_CODE_OAUTH_TOKEN";
pub const KEY_USE_BEDROCK: &str = "CLAUDE_CODE_USE_BEDROCK";
pub const KEY_ATTRIBUTION_HEADER: &str = "CLAUDE_CODE_ATTRIBUTION_HEADER";

/// Bedrock keys that OAuth secrets must shadow with explicit empty strings.
///
/// Session Pods mount several env Secrets in precedence order; an absent key
/// in the user secret would let a team-level Bedrock value leak through, so
/// OAuth mode writes every Bedrock key as `""`.
const BEDROCK_OVERRIDE_KEYS: [&str; 5] = [
    "ANTHROPIC_MODEL",
    "AWS_ACCESS_KEY_ID",
    "AWS_SECRET_ACCESS_KEY",
    "AWS_ROLE_ARN",
    "AWS_PROFILE",
];

// ---------------------------------------------------------------------------
// Settings types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    OAuth,
    Bedrock,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OAuthSettings {
    pub token: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BedrockSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    #[serde(default)]
    pub role_arn: Option<String>,
    #[serde(default)]
    pub profile: Option<String>,
}

/// Agent credentials for one user or team, reconciled into
/// `agent-env-<sanitized name>`.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentCredentialsSettings {
    pub name: String,
    #[serde(default)]
    pub auth_mode: Option<AuthMode>,
    #[serde(default)]
    pub oauth: Option<OAuthSettings>,
    #[serde(default)]
    pub bedrock: Option<BedrockSettings>,
}

impl AgentCredentialsSettings {
    /// Unset mode with Bedrock enabled falls back to Bedrock: older callers
    /// never sent `auth_mode`.
    fn effective_mode(&self) -> AuthMode {
        if let Some(mode) = self.auth_mode {
            return mode;
        }
        if self.bedrock.as_ref().is_some_and(|b| b.enabled) {
            AuthMode::Bedrock
        } else {
            AuthMode::OAuth
        }
    }
}

/// Secret payload for the given settings.
pub fn build_data(settings: &AgentCredentialsSettings) -> anyhow::Result<BTreeMap<String, String>> {
    let mut data = BTreeMap::new();
    match settings.effective_mode() {
        AuthMode::OAuth => {
            let oauth = settings
                .oauth
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("oauth mode requires an oauth token"))?;
            data.insert(KEY_OAUTH_TOKEN.to_owned(), oauth.token.clone());
            data.insert(KEY_USE_BEDROCK.to_owned(), "0".to_owned());
            for key in BEDROCK_OVERRIDE_KEYS {
                data.insert(key.to_owned(), String::new());
            }
        }
        AuthMode::Bedrock => {
            let bedrock = settings.bedrock.clone().unwrap_or_default();
            data.insert(KEY_USE_BEDROCK.to_owned(), "1".to_owned());
            data.insert(KEY_ATTRIBUTION_HEADER.to_owned(), "0".to_owned());
            let optional = [
                ("ANTHROPIC_MODEL", bedrock.model),
                ("AWS_ACCESS_KEY_ID", bedrock.access_key_id),
                ("AWS_SECRET_ACCESS_KEY", bedrock.secret_access_key),
                ("AWS_ROLE_ARN", bedrock.role_arn),
                ("AWS_PROFILE", bedrock.profile),
            ];
            for (key, value) in optional {
                if let Some(value) = value
                    && !value.is_empty()
                {
                    data.insert(key.to_owned(), value);
                }
            }
        }
    }
    Ok(data)
}

fn is_oauth_data(data: &BTreeMap<String, String>) -> bool {
    data.get(KEY_USE_BEDROCK).map(String::as_str) != Some("1")
        && data.contains_key(KEY_OAUTH_TOKEN)
}

fn is_bedrock_data(data: &BTreeMap<String, String>) -> bool {
    data.get(KEY_USE_BEDROCK).map(String::as_str) == Some("1")
}

// ---------------------------------------------------------------------------
// Syncer
// ---------------------------------------------------------------------------

/// Owns `agent-env-*` Secrets.
pub struct CredentialsSyncer {
    api: Api<Secret>,
    namespace: String,
}

impl CredentialsSyncer {
    pub fn new(client: kube::Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            namespace: namespace.to_owned(),
        }
    }

    #[tracing::instrument(skip(self, settings), fields(name = %settings.name), err)]
    pub async fn sync(&self, settings: &AgentCredentialsSettings) -> anyhow::Result<SyncOutcome> {
        let name = names::agent_env_secret_name(&settings.name);
        let labels = settings_owned_labels(LABEL_ENV, &settings.name);
        let data = build_data(settings)?;
        apply_owned_secret(&self.api, &self.namespace, &name, &labels, &data).await
    }

    #[tracing::instrument(skip(self), err)]
    pub async fn delete(&self, name: &str) -> anyhow::Result<()> {
        delete_owned_secret(&self.api, &names::agent_env_secret_name(name)).await
    }

    /// Add the explicit empty Bedrock override keys to OAuth secrets written
    /// before the override scheme existed. Idempotent.
    #[tracing::instrument(skip(self), err)]
    pub async fn resync_secrets_for_oauth_mode(&self) -> anyhow::Result<usize> {
        let mut patched = 0;
        for secret in list_managed_secrets(&self.api).await? {
            let Some(name) = secret.metadata.name.clone() else {
                continue;
            };
            if !name.starts_with("agent-env-") {
                continue;
            }
            let mut data = decoded_data(&secret);
            if !is_oauth_data(&data) {
                continue;
            }
            let missing: Vec<&str> = BEDROCK_OVERRIDE_KEYS
                .into_iter()
                .filter(|key| !data.contains_key(*key))
                .collect();
            if missing.is_empty() {
                continue;
            }
            for key in missing {
                data.insert(key.to_owned(), String::new());
            }
            data.insert(KEY_USE_BEDROCK.to_owned(), "0".to_owned());
            let labels = secret.metadata.labels.clone().unwrap_or_default();
            apply_owned_secret(&self.api, &self.namespace, &name, &labels, &data).await?;
            patched += 1;
            tracing::info!(secret = %name, "added bedrock override keys to oauth secret");
        }
        Ok(patched)
    }

    /// Ensure Bedrock secrets carry `CLAUDE_CODE_ATTRIBUTION_HEADER=0`; OAuth
    /// secrets never receive the key. Idempotent.
    #[tracing::instrument(skip(self), err)]
    pub async fn resync_secrets_for_attribution_header(&self) -> anyhow::Result<usize> {
        let mut patched = 0;
        for secret in list_managed_secrets(&self.api).await? {
            let Some(name) = secret.metadata.name.clone() else {
                continue;
            };
            if !name.starts_with("agent-env-") {
                continue;
            }
            let mut data = decoded_data(&secret);
            if !is_bedrock_data(&data) || data.contains_key(KEY_ATTRIBUTION_HEADER) {
                continue;
            }
            data.insert(KEY_ATTRIBUTION_HEADER.to_owned(), "0".to_owned());
            let labels = secret.metadata.labels.clone().unwrap_or_default();
            apply_owned_secret(&self.api, &self.namespace, &name, &labels, &data).await?;
            patched += 1;
            tracing::info!(secret = %name, "added attribution header to bedrock secret");
        }
        Ok(patched)
    }

    /// Move legacy `agent-credentials-*` Secrets (label
    /// `agentapi.proxy/credentials=true`) to the canonical `agent-env-*`
    /// name and label schema, then remove the legacy Secret.
    #[tracing::instrument(skip(self), err)]
    pub async fn migrate_legacy_credentials(&self) -> anyhow::Result<usize> {
        let mut migrated = 0;
        for secret in list_managed_secrets(&self.api).await? {
            let Some(name) = secret.metadata.name.clone() else {
                continue;
            };
            let Some(suffix) = name.strip_prefix("agent-credentials-") else {
                continue;
            };
            let has_legacy_kind = secret
                .metadata
                .labels
                .as_ref()
                .and_then(|l| l.get(LABEL_CREDENTIALS))
                .is_some_and(|v| v == "true");
            if !has_legacy_kind {
                continue;
            }

            let data = decoded_data(&secret);
            let new_name = names::agent_env_secret_name(suffix);
            let labels = settings_owned_labels(LABEL_ENV, suffix);
            apply_owned_secret(&self.api, &self.namespace, &new_name, &labels, &data).await?;
            delete_owned_secret(&self.api, &name).await?;
            migrated += 1;
            tracing::info!(from = %name, to = %new_name, "migrated legacy credentials secret");
        }
        Ok(migrated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oauth_settings(name: &str, token: &str) -> AgentCredentialsSettings {
        AgentCredentialsSettings {
            name: name.into(),
            auth_mode: Some(AuthMode::OAuth),
            oauth: Some(OAuthSettings {
                token: token.into(),
            }),
            bedrock: None,
        }
    }

    #[test]
    fn oauth_shape_shadows_bedrock_keys() {
        let data = build_data(&oauth_settings("alice", "tok")).unwrap();
        assert_eq!(data[KEY_OAUTH_TOKEN], "tok");
        assert_eq!(data[KEY_USE_BEDROCK], "0");
        for key in BEDROCK_OVERRIDE_KEYS {
            assert_eq!(data[key], "", "{key} must be an explicit empty string");
        }
        assert!(!data.contains_key(KEY_ATTRIBUTION_HEADER));
    }

    #[test]
    fn bedrock_shape_emits_only_non_empty_values() {
        let settings = AgentCredentialsSettings {
            name: "org/team-a".into(),
            auth_mode: Some(AuthMode::Bedrock),
            oauth: None,
            bedrock: Some(BedrockSettings {
                enabled: true,
                model: Some("claude-sonnet-4-5".into()),
                access_key_id: Some("K".into()),
                secret_access_key: None,
                role_arn: Some(String::new()),
                profile: None,
            }),
        };
        let data = build_data(&settings).unwrap();
        assert_eq!(data[KEY_USE_BEDROCK], "1");
        assert_eq!(data[KEY_ATTRIBUTION_HEADER], "0");
        assert_eq!(data["ANTHROPIC_MODEL"], "claude-sonnet-4-5");
        assert_eq!(data["AWS_ACCESS_KEY_ID"], "K");
        assert!(!data.contains_key("AWS_SECRET_ACCESS_KEY"));
        assert!(!data.contains_key("AWS_ROLE_ARN"));
        assert!(!data.contains_key("AWS_PROFILE"));
    }

    #[test]
    fn unset_mode_with_bedrock_enabled_falls_back_to_bedrock() {
        let settings = AgentCredentialsSettings {
            name: "alice".into(),
            auth_mode: None,
            oauth: None,
            bedrock: Some(BedrockSettings {
                enabled: true,
                access_key_id: Some("K".into()),
                ..Default::default()
            }),
        };
        let data = build_data(&settings).unwrap();
        assert_eq!(data[KEY_USE_BEDROCK], "1");
    }

    #[test]
    fn unset_mode_without_bedrock_is_oauth() {
        let settings = AgentCredentialsSettings {
            name: "alice".into(),
            auth_mode: None,
            oauth: Some(OAuthSettings { token: "t".into() }),
            bedrock: Some(BedrockSettings {
                enabled: false,
                ..Default::default()
            }),
        };
        let data = build_data(&settings).unwrap();
        assert_eq!(data[KEY_USE_BEDROCK], "0");
    }

    #[test]
    fn oauth_mode_without_token_is_an_error() {
        let settings = AgentCredentialsSettings {
            name: "alice".into(),
            auth_mode: Some(AuthMode::OAuth),
            oauth: None,
            bedrock: None,
        };
        assert!(build_data(&settings).is_err());
    }

    #[test]
    fn data_classification() {
        let oauth = build_data(&oauth_settings("a", "t")).unwrap();
        assert!(is_oauth_data(&oauth));
        assert!(!is_bedrock_data(&oauth));

        let bedrock = build_data(&AgentCredentialsSettings {
            name: "a".into(),
            auth_mode: Some(AuthMode::Bedrock),
            oauth: None,
            bedrock: None,
        })
        .unwrap();
        assert!(is_bedrock_data(&bedrock));
        assert!(!is_oauth_data(&bedrock));
    }
}
