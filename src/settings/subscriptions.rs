use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use kube::Api;
use serde::{Deserialize, Serialize};

use crate::k8s::labels::{LABEL_SUBSCRIPTIONS, settings_owned_labels};
use crate::k8s::names;

use super::{SyncOutcome, apply_owned_secret, delete_owned_secret};

pub const SUBSCRIPTIONS_KEY: &str = "subscriptions.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushSubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushSubscription {
    pub endpoint: String,
    pub keys: PushSubscriptionKeys,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionsDocument {
    pub subscriptions: Vec<PushSubscription>,
}

/// Web-push subscriptions for one user, reconciled into
/// `notification-subscriptions-<sanitized user>`.
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationSubscriptionSettings {
    pub user_id: String,
    #[serde(default)]
    pub subscriptions: Vec<PushSubscription>,
}

/// Owns `notification-subscriptions-*` Secrets.
pub struct SubscriptionsSyncer {
    api: Api<Secret>,
    namespace: String,
}

impl SubscriptionsSyncer {
    pub fn new(client: kube::Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            namespace: namespace.to_owned(),
        }
    }

    #[tracing::instrument(skip(self, settings), fields(user_id = %settings.user_id), err)]
    pub async fn sync(
        &self,
        settings: &NotificationSubscriptionSettings,
    ) -> anyhow::Result<SyncOutcome> {
        let document = SubscriptionsDocument {
            subscriptions: settings.subscriptions.clone(),
        };
        let payload = serde_json::to_string_pretty(&document)?;
        let name = names::notification_subscriptions_secret_name(&settings.user_id);
        let labels = settings_owned_labels(LABEL_SUBSCRIPTIONS, &settings.user_id);
        let data = BTreeMap::from([(SUBSCRIPTIONS_KEY.to_owned(), payload)]);
        apply_owned_secret(&self.api, &self.namespace, &name, &labels, &data).await
    }

    #[tracing::instrument(skip(self), err)]
    pub async fn delete(&self, user_id: &str) -> anyhow::Result<()> {
        delete_owned_secret(&self.api, &names::notification_subscriptions_secret_name(user_id))
            .await
    }
}
