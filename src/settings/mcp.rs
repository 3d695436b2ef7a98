use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use kube::Api;
use serde::{Deserialize, Serialize};

use crate::k8s::labels::{LABEL_MCP_SERVERS, settings_owned_labels};
use crate::k8s::names;

use super::{SyncOutcome, apply_owned_secret, delete_owned_secret};

pub const MCP_SERVERS_KEY: &str = "mcp-servers.json";

/// One MCP server definition; shape mirrors the agent's `mcp-servers.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServerDefinition {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServersDocument {
    #[serde(rename = "mcpServers")]
    pub mcp_servers: BTreeMap<String, McpServerDefinition>,
}

/// MCP bundle for one user or team.
#[derive(Debug, Clone, Deserialize)]
pub struct McpServersSettings {
    pub name: String,
    #[serde(default)]
    pub servers: BTreeMap<String, McpServerDefinition>,
}

/// Owns `mcp-servers-*` Secrets.
pub struct McpSyncer {
    api: Api<Secret>,
    namespace: String,
}

impl McpSyncer {
    pub fn new(client: kube::Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            namespace: namespace.to_owned(),
        }
    }

    /// An empty server set means the bundle is gone: delete instead of
    /// writing an empty document the Pod would still mount.
    #[tracing::instrument(skip(self, settings), fields(name = %settings.name), err)]
    pub async fn sync(&self, settings: &McpServersSettings) -> anyhow::Result<SyncOutcome> {
        if settings.servers.is_empty() {
            self.delete(&settings.name).await?;
            return Ok(SyncOutcome::Unchanged);
        }

        let document = McpServersDocument {
            mcp_servers: settings.servers.clone(),
        };
        let payload = serde_json::to_string_pretty(&document)?;
        let name = names::mcp_servers_secret_name(&settings.name);
        let labels = settings_owned_labels(LABEL_MCP_SERVERS, &settings.name);
        let data = BTreeMap::from([(MCP_SERVERS_KEY.to_owned(), payload)]);
        apply_owned_secret(&self.api, &self.namespace, &name, &labels, &data).await
    }

    #[tracing::instrument(skip(self), err)]
    pub async fn delete(&self, name: &str) -> anyhow::Result<()> {
        delete_owned_secret(&self.api, &names::mcp_servers_secret_name(name)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_serializes_under_mcp_servers_key() {
        let document = McpServersDocument {
            mcp_servers: BTreeMap::from([(
                "github".to_owned(),
                McpServerDefinition {
                    kind: Some("http".into()),
                    url: Some("https://mcp.example.com".into()),
                    headers: Some(BTreeMap::from([(
                        "Authorization".to_owned(),
                        "Bearer x".to_owned(),
                    )])),
                    ..Default::default()
                },
            )]),
        };
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&document).unwrap()).unwrap();
        assert_eq!(json["mcpServers"]["github"]["type"], "http");
        assert_eq!(json["mcpServers"]["github"]["url"], "https://mcp.example.com");
        // Unset fields stay out of the payload entirely.
        assert!(json["mcpServers"]["github"].get("command").is_none());
    }

    #[test]
    fn stdio_server_roundtrips() {
        let raw = r#"{"mcpServers":{"local":{"command":"npx","args":["-y","server"],"env":{"DEBUG":"1"}}}}"#;
        let document: McpServersDocument = serde_json::from_str(raw).unwrap();
        let local = &document.mcp_servers["local"];
        assert_eq!(local.command.as_deref(), Some("npx"));
        assert_eq!(local.args.as_ref().unwrap().len(), 2);
        assert_eq!(local.env.as_ref().unwrap()["DEBUG"], "1");
    }
}
