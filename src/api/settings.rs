use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::routing::{post, put};
use axum::{Json, Router};

use crate::error::ApiError;
use crate::settings::credentials::AgentCredentialsSettings;
use crate::settings::mcp::McpServersSettings;
use crate::settings::subscriptions::NotificationSubscriptionSettings;
use crate::store::AppState;

use super::identity::Identity;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/settings/credentials",
            put(put_credentials).delete(delete_credentials),
        )
        .route(
            "/api/settings/mcp-servers",
            put(put_mcp_servers).delete(delete_mcp_servers),
        )
        .route(
            "/api/settings/subscriptions",
            put(put_subscriptions).delete(delete_subscriptions),
        )
        .route("/api/settings/resync/oauth", post(resync_oauth))
        .route(
            "/api/settings/resync/attribution-header",
            post(resync_attribution_header),
        )
        .route(
            "/api/settings/migrate-legacy-credentials",
            post(migrate_legacy_credentials),
        )
}

/// Settings are keyed by user *or* team name; callers may only touch their
/// own name or a team they belong to.
fn authorize_name(identity: &Identity, name: &str) -> Result<(), ApiError> {
    if identity.admin || name == identity.user_id || identity.is_member_of(name) {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}

fn require_admin(identity: &Identity) -> Result<(), ApiError> {
    if identity.admin {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}

fn name_param(params: &HashMap<String, String>) -> Result<&str, ApiError> {
    params
        .get("name")
        .map(String::as_str)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing name parameter".into()))
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

#[tracing::instrument(skip(state, body), fields(user_id = %identity.user_id, name = %body.name), err)]
async fn put_credentials(
    State(state): State<AppState>,
    identity: Identity,
    Json(body): Json<AgentCredentialsSettings>,
) -> Result<Json<serde_json::Value>, ApiError> {
    authorize_name(&identity, &body.name)?;
    let outcome = state
        .credentials_syncer
        .sync(&body)
        .await
        .map_err(ApiError::Internal)?;
    Ok(Json(serde_json::json!({ "outcome": format!("{outcome:?}") })))
}

#[tracing::instrument(skip(state), fields(user_id = %identity.user_id), err)]
async fn delete_credentials(
    State(state): State<AppState>,
    identity: Identity,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let name = name_param(&params)?;
    authorize_name(&identity, name)?;
    state
        .credentials_syncer
        .delete(name)
        .await
        .map_err(ApiError::Internal)?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

// ---------------------------------------------------------------------------
// MCP servers
// ---------------------------------------------------------------------------

#[tracing::instrument(skip(state, body), fields(user_id = %identity.user_id, name = %body.name), err)]
async fn put_mcp_servers(
    State(state): State<AppState>,
    identity: Identity,
    Json(body): Json<McpServersSettings>,
) -> Result<Json<serde_json::Value>, ApiError> {
    authorize_name(&identity, &body.name)?;
    let outcome = state
        .mcp_syncer
        .sync(&body)
        .await
        .map_err(ApiError::Internal)?;
    Ok(Json(serde_json::json!({ "outcome": format!("{outcome:?}") })))
}

#[tracing::instrument(skip(state), fields(user_id = %identity.user_id), err)]
async fn delete_mcp_servers(
    State(state): State<AppState>,
    identity: Identity,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let name = name_param(&params)?;
    authorize_name(&identity, name)?;
    state
        .mcp_syncer
        .delete(name)
        .await
        .map_err(ApiError::Internal)?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

// ---------------------------------------------------------------------------
// Notification subscriptions
// ---------------------------------------------------------------------------

#[tracing::instrument(skip(state, body), fields(user_id = %identity.user_id), err)]
async fn put_subscriptions(
    State(state): State<AppState>,
    identity: Identity,
    Json(mut body): Json<NotificationSubscriptionSettings>,
) -> Result<Json<serde_json::Value>, ApiError> {
    // Subscriptions are strictly per-user.
    if !identity.admin {
        body.user_id = identity.user_id.clone();
    }
    let outcome = state
        .subscriptions_syncer
        .sync(&body)
        .await
        .map_err(ApiError::Internal)?;
    Ok(Json(serde_json::json!({ "outcome": format!("{outcome:?}") })))
}

#[tracing::instrument(skip(state), fields(user_id = %identity.user_id), err)]
async fn delete_subscriptions(
    State(state): State<AppState>,
    identity: Identity,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user_id = if identity.admin {
        params
            .get("name")
            .cloned()
            .unwrap_or_else(|| identity.user_id.clone())
    } else {
        identity.user_id.clone()
    };
    state
        .subscriptions_syncer
        .delete(&user_id)
        .await
        .map_err(ApiError::Internal)?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

// ---------------------------------------------------------------------------
// Reconciliation (admin)
// ---------------------------------------------------------------------------

#[tracing::instrument(skip(state), fields(user_id = %identity.user_id), err)]
async fn resync_oauth(
    State(state): State<AppState>,
    identity: Identity,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_admin(&identity)?;
    let patched = state
        .credentials_syncer
        .resync_secrets_for_oauth_mode()
        .await
        .map_err(ApiError::Internal)?;
    Ok(Json(serde_json::json!({ "patched": patched })))
}

#[tracing::instrument(skip(state), fields(user_id = %identity.user_id), err)]
async fn resync_attribution_header(
    State(state): State<AppState>,
    identity: Identity,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_admin(&identity)?;
    let patched = state
        .credentials_syncer
        .resync_secrets_for_attribution_header()
        .await
        .map_err(ApiError::Internal)?;
    Ok(Json(serde_json::json!({ "patched": patched })))
}

#[tracing::instrument(skip(state), fields(user_id = %identity.user_id), err)]
async fn migrate_legacy_credentials(
    State(state): State<AppState>,
    identity: Identity,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_admin(&identity)?;
    let migrated = state
        .credentials_syncer
        .migrate_legacy_credentials()
        .await
        .map_err(ApiError::Internal)?;
    Ok(Json(serde_json::json!({ "migrated": migrated })))
}
