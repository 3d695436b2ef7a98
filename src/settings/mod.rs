//! User/team-level configuration reconciled into owned Secrets.
//!
//! Every syncer follows one ownership protocol: Secrets are created with the
//! `agentapi.proxy/managed-by=settings` label, and no write or delete
//! happens unless that label is present. An operator who hand-curates a
//! Secret under one of our names takes it out of our hands permanently.

pub mod credentials;
pub mod mcp;
pub mod merge;
pub mod subscriptions;

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Api;
use kube::api::{DeleteParams, ListParams, PostParams};

use crate::k8s::labels::{LABEL_MANAGED_BY, MANAGED_BY_SETTINGS};
use crate::k8s::{is_already_exists, is_conflict, is_not_found};

/// What a `Sync` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Created,
    Updated,
    Unchanged,
    /// The name is taken by a Secret we do not own; left untouched.
    SkippedForeign,
}

pub fn is_settings_managed(secret: &Secret) -> bool {
    secret
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(LABEL_MANAGED_BY))
        .is_some_and(|v| v == MANAGED_BY_SETTINGS)
}

/// Decode `data` (and `string_data`, which wins) into UTF-8 strings.
pub fn decoded_data(secret: &Secret) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    if let Some(data) = &secret.data {
        for (k, v) in data {
            out.insert(k.clone(), String::from_utf8_lossy(&v.0).into_owned());
        }
    }
    if let Some(string_data) = &secret.string_data {
        for (k, v) in string_data {
            out.insert(k.clone(), v.clone());
        }
    }
    out
}

/// Pure update decision for an existing Secret, factored out of the API path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UpdateDecision {
    Foreign,
    Unchanged,
    Update,
}

pub(crate) fn decide_update(existing: &Secret, desired: &BTreeMap<String, String>) -> UpdateDecision {
    if !is_settings_managed(existing) {
        return UpdateDecision::Foreign;
    }
    if decoded_data(existing) == *desired {
        UpdateDecision::Unchanged
    } else {
        UpdateDecision::Update
    }
}

fn owned_secret(
    namespace: &str,
    name: &str,
    labels: &BTreeMap<String, String>,
    data: &BTreeMap<String, String>,
    resource_version: Option<String>,
) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            namespace: Some(namespace.to_owned()),
            labels: Some(labels.clone()),
            resource_version,
            ..Default::default()
        },
        string_data: Some(data.clone()),
        ..Default::default()
    }
}

/// Create-or-update an owned Secret.
///
/// Create first; on `AlreadyExists` fetch, verify the ownership gate, diff,
/// and replace preserving the resource version. A version conflict is retried
/// once from a fresh read.
pub(crate) async fn apply_owned_secret(
    api: &Api<Secret>,
    namespace: &str,
    name: &str,
    labels: &BTreeMap<String, String>,
    data: &BTreeMap<String, String>,
) -> anyhow::Result<SyncOutcome> {
    let desired = owned_secret(namespace, name, labels, data, None);
    match api.create(&PostParams::default(), &desired).await {
        Ok(_) => return Ok(SyncOutcome::Created),
        Err(e) if is_already_exists(&e) => {}
        Err(e) => return Err(e.into()),
    }

    for attempt in 0..2 {
        let existing = api.get(name).await?;
        match decide_update(&existing, data) {
            UpdateDecision::Foreign => {
                tracing::warn!(
                    secret = name,
                    "refusing to update secret not managed by settings"
                );
                return Ok(SyncOutcome::SkippedForeign);
            }
            UpdateDecision::Unchanged => return Ok(SyncOutcome::Unchanged),
            UpdateDecision::Update => {}
        }

        let mut merged_labels = existing.metadata.labels.clone().unwrap_or_default();
        merged_labels.extend(labels.clone());
        let updated = owned_secret(
            namespace,
            name,
            &merged_labels,
            data,
            existing.metadata.resource_version.clone(),
        );
        match api.replace(name, &PostParams::default(), &updated).await {
            Ok(_) => return Ok(SyncOutcome::Updated),
            Err(e) if is_conflict(&e) && attempt == 0 => {
                tracing::debug!(secret = name, "resource version conflict, retrying once");
            }
            Err(e) => return Err(e.into()),
        }
    }
    unreachable!("conflict retry loop returns on second attempt")
}

/// Delete an owned Secret. Missing is success; foreign is skipped.
pub(crate) async fn delete_owned_secret(api: &Api<Secret>, name: &str) -> anyhow::Result<()> {
    let existing = match api.get(name).await {
        Ok(secret) => secret,
        Err(e) if is_not_found(&e) => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    if !is_settings_managed(&existing) {
        tracing::warn!(
            secret = name,
            "refusing to delete secret not managed by settings"
        );
        return Ok(());
    }
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(e) if is_not_found(&e) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// All settings-managed Secrets in the namespace.
pub(crate) async fn list_managed_secrets(api: &Api<Secret>) -> anyhow::Result<Vec<Secret>> {
    let params =
        ListParams::default().labels(&format!("{LABEL_MANAGED_BY}={MANAGED_BY_SETTINGS}"));
    Ok(api.list(&params).await?.items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::labels::settings_owned_labels;

    fn secret_with(labels: Option<BTreeMap<String, String>>, data: BTreeMap<String, String>) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some("agent-env-alice".into()),
                labels,
                ..Default::default()
            },
            string_data: Some(data),
            ..Default::default()
        }
    }

    #[test]
    fn foreign_secret_is_never_updated() {
        // Label present but no managed-by gate: still foreign.
        let existing = secret_with(
            Some(BTreeMap::from([(
                "agentapi.proxy/credentials".to_owned(),
                "true".to_owned(),
            )])),
            BTreeMap::from([("CUSTOM_KEY".to_owned(), "keep".to_owned())]),
        );
        let desired = BTreeMap::from([("AWS_ACCESS_KEY_ID".to_owned(), "K".to_owned())]);
        assert_eq!(decide_update(&existing, &desired), UpdateDecision::Foreign);
    }

    #[test]
    fn unchanged_data_skips_write() {
        let data = BTreeMap::from([("A".to_owned(), "1".to_owned())]);
        let existing = secret_with(
            Some(settings_owned_labels(crate::k8s::labels::LABEL_ENV, "alice")),
            data.clone(),
        );
        assert_eq!(decide_update(&existing, &data), UpdateDecision::Unchanged);
    }

    #[test]
    fn changed_data_updates() {
        let existing = secret_with(
            Some(settings_owned_labels(crate::k8s::labels::LABEL_ENV, "alice")),
            BTreeMap::from([("A".to_owned(), "1".to_owned())]),
        );
        let desired = BTreeMap::from([("A".to_owned(), "2".to_owned())]);
        assert_eq!(decide_update(&existing, &desired), UpdateDecision::Update);
    }

    #[test]
    fn decoded_data_prefers_string_data() {
        let mut secret = secret_with(None, BTreeMap::from([("k".to_owned(), "new".to_owned())]));
        secret.data = Some(BTreeMap::from([(
            "k".to_owned(),
            k8s_openapi::ByteString(b"old".to_vec()),
        )]));
        assert_eq!(decoded_data(&secret)["k"], "new");
    }
}
