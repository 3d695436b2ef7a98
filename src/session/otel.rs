//! Namespace-wide ConfigMap for the otelcol sidecar.
//!
//! One ConfigMap serves every session Pod: per-session values flow in through
//! `${env:...}` substitution, which is why the composer gives the sidecar
//! `AGENTAPI_*` env vars with `-` placeholders for empties.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Api;
use kube::api::PostParams;

use crate::config::Config;
use crate::k8s::is_already_exists;
use crate::k8s::labels::{LABEL_APP_MANAGED_BY, MANAGED_BY_PROXY};

pub const OTEL_CONFIG_MAP_NAME: &str = "agentapi-otelcol-config";
pub const OTEL_CONFIG_KEY: &str = "config.yaml";

/// Render the collector pipeline: scrape Claude Code's prometheus endpoint,
/// rewrite identifying attributes, re-export for the cluster scraper.
pub fn render_config(config: &Config) -> String {
    format!(
        r#"receivers:
  prometheus:
    config:
      scrape_configs:
        - job_name: claude-code
          scrape_interval: {interval}
          static_configs:
            - targets: ["localhost:{claude_port}"]

processors:
  transform:
    metric_statements:
      - context: datapoint
        statements:
          - set(attributes["claude_user_id"], attributes["user_id"]) where attributes["user_id"] != nil
          - set(attributes["claude_session_id"], attributes["session_id"]) where attributes["session_id"] != nil
          - delete_key(attributes, "user_id")
          - delete_key(attributes, "session_id")
          - delete_key(attributes, "user_email")
          - set(attributes["agentapi_session_id"], "${{env:AGENTAPI_SESSION_ID}}")
          - set(attributes["agentapi_user_id"], "${{env:AGENTAPI_USER_ID}}")
          - set(attributes["agentapi_team_id"], "${{env:AGENTAPI_TEAM_ID}}")
          - set(attributes["agentapi_schedule_id"], "${{env:AGENTAPI_SCHEDULE_ID}}")
          - set(attributes["agentapi_webhook_id"], "${{env:AGENTAPI_WEBHOOK_ID}}")
          - set(attributes["agentapi_agent_type"], "${{env:AGENTAPI_AGENT_TYPE}}")

exporters:
  prometheus:
    endpoint: "0.0.0.0:{exporter_port}"

service:
  pipelines:
    metrics:
      receivers: [prometheus]
      processors: [transform]
      exporters: [prometheus]
"#,
        interval = config.otel_collector_scrape_interval,
        claude_port = config.otel_collector_claude_code_port,
        exporter_port = config.otel_collector_exporter_port,
    )
}

pub fn build_config_map(config: &Config) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(OTEL_CONFIG_MAP_NAME.to_owned()),
            namespace: Some(config.namespace.clone()),
            labels: Some(BTreeMap::from([(
                LABEL_APP_MANAGED_BY.to_owned(),
                MANAGED_BY_PROXY.to_owned(),
            )])),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            OTEL_CONFIG_KEY.to_owned(),
            render_config(config),
        )])),
        ..Default::default()
    }
}

/// Idempotently ensure the ConfigMap; an existing one is refreshed in place.
#[tracing::instrument(skip_all, err)]
pub async fn ensure_config_map(client: &kube::Client, config: &Config) -> anyhow::Result<()> {
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), &config.namespace);
    let desired = build_config_map(config);
    match api.create(&PostParams::default(), &desired).await {
        Ok(_) => {
            tracing::info!(name = OTEL_CONFIG_MAP_NAME, "created otelcol config map");
            Ok(())
        }
        Err(e) if is_already_exists(&e) => {
            let existing = api.get(OTEL_CONFIG_MAP_NAME).await?;
            if existing.data == desired.data {
                return Ok(());
            }
            let mut replacement = desired;
            replacement.metadata.resource_version = existing.metadata.resource_version;
            api.replace(OTEL_CONFIG_MAP_NAME, &PostParams::default(), &replacement)
                .await?;
            tracing::info!(name = OTEL_CONFIG_MAP_NAME, "refreshed otelcol config map");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_renders_ports_and_interval() {
        let mut config = Config::default();
        config.otel_collector_scrape_interval = "30s".into();
        config.otel_collector_claude_code_port = 9464;
        config.otel_collector_exporter_port = 9191;
        let rendered = render_config(&config);
        assert!(rendered.contains("scrape_interval: 30s"));
        assert!(rendered.contains(r#"targets: ["localhost:9464"]"#));
        assert!(rendered.contains(r#"endpoint: "0.0.0.0:9191""#));
    }

    #[test]
    fn config_renames_and_deletes_claude_attributes() {
        let rendered = render_config(&Config::default());
        assert!(rendered.contains(r#"set(attributes["claude_user_id"], attributes["user_id"])"#));
        assert!(rendered.contains(
            r#"set(attributes["claude_session_id"], attributes["session_id"])"#
        ));
        assert!(rendered.contains(r#"delete_key(attributes, "user_email")"#));
        assert!(rendered.contains("${env:AGENTAPI_SESSION_ID}"));
        assert!(rendered.contains("${env:AGENTAPI_WEBHOOK_ID}"));
    }

    #[test]
    fn config_map_shape() {
        let cm = build_config_map(&Config::default());
        assert_eq!(cm.metadata.name.as_deref(), Some(OTEL_CONFIG_MAP_NAME));
        assert_eq!(cm.metadata.namespace.as_deref(), Some("agentapi-proxy"));
        assert!(cm.data.unwrap().contains_key(OTEL_CONFIG_KEY));
    }

    #[test]
    fn rendered_config_is_valid_yaml() {
        let rendered = render_config(&Config::default());
        let parsed: serde_yaml::Value = serde_yaml::from_str(&rendered).unwrap();
        assert!(parsed.get("receivers").is_some());
        assert!(parsed.get("service").is_some());
    }
}
