use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::session::manager::SessionFilter;
use crate::session::{
    RepositoryInfo, ResourceScope, Session, SessionRequest, SessionStatus, SlackParams,
};
use crate::store::AppState;

use super::identity::Identity;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateSessionBody {
    #[serde(default)]
    pub scope: ResourceScope,
    #[serde(default)]
    pub team_id: Option<String>,
    /// Defaults to the caller's team memberships.
    #[serde(default)]
    pub teams: Option<Vec<String>>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    #[serde(default)]
    pub agent_type: Option<String>,
    #[serde(default)]
    pub repository: Option<RepositoryInfo>,
    #[serde(default)]
    pub initial_message: Option<String>,
    #[serde(default)]
    pub oneshot: bool,
    #[serde(default)]
    pub oneshot_settings: Option<serde_json::Value>,
    #[serde(default)]
    pub slack: Option<SlackParams>,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    #[serde(default)]
    pub github_token: Option<String>,
    /// Base64 webhook body, when the session originates from a webhook.
    #[serde(default)]
    pub webhook_payload: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageBody {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub id: String,
    pub user_id: String,
    pub scope: ResourceScope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    pub teams: Vec<String>,
    pub tags: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListSessionsResponse {
    pub sessions: Vec<SessionResponse>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub role: String,
    pub content: String,
}

fn session_to_response(session: &Session) -> SessionResponse {
    SessionResponse {
        id: session.id.clone(),
        user_id: session.request.user_id.clone(),
        scope: session.request.scope,
        team_id: session.request.team_id.clone(),
        teams: session.request.teams.clone(),
        tags: session.request.tags.clone(),
        agent_type: session.request.agent_type.clone(),
        status: session.status(),
        started_at: session.started_at,
        updated_at: session.updated_at(),
        description: session.description.clone(),
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/sessions", get(list_sessions).post(create_session))
        .route(
            "/api/sessions/{id}",
            get(get_session).delete(delete_session),
        )
        .route("/api/sessions/{id}/message", post(send_message))
        .route("/api/sessions/{id}/messages", get(get_messages))
}

// ---------------------------------------------------------------------------
// Authorization
// ---------------------------------------------------------------------------

/// Owner, team member (for team sessions), or admin.
fn authorize_session(identity: &Identity, session: &Session) -> Result<(), ApiError> {
    if identity.admin || session.request.user_id == identity.user_id {
        return Ok(());
    }
    if session.request.scope == ResourceScope::Team
        && let Some(team_id) = &session.request.team_id
        && identity.is_member_of(team_id)
    {
        return Ok(());
    }
    Err(ApiError::Forbidden)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[tracing::instrument(skip(state, body), fields(user_id = %identity.user_id), err)]
async fn create_session(
    State(state): State<AppState>,
    identity: Identity,
    Json(body): Json<CreateSessionBody>,
) -> Result<impl IntoResponse, ApiError> {
    if body.scope == ResourceScope::Team {
        let Some(team_id) = &body.team_id else {
            return Err(ApiError::BadRequest(
                "team scope requires a team_id".into(),
            ));
        };
        if !identity.admin && !identity.is_member_of(team_id) {
            return Err(ApiError::Forbidden);
        }
    }

    let webhook_payload = body
        .webhook_payload
        .as_deref()
        .map(|raw| BASE64.decode(raw))
        .transpose()
        .map_err(|e| ApiError::BadRequest(format!("invalid webhook payload base64: {e}")))?;

    let request = SessionRequest {
        user_id: identity.user_id.clone(),
        team_id: body.team_id,
        scope: body.scope,
        teams: body.teams.unwrap_or_else(|| identity.teams.clone()),
        tags: body.tags,
        agent_type: body.agent_type,
        repository: body.repository,
        initial_message: body.initial_message,
        oneshot: body.oneshot,
        oneshot_settings: body.oneshot_settings,
        slack: body.slack,
        environment: body.environment,
        github_token: body.github_token,
    };

    let id = Uuid::new_v4().to_string();
    let session = state
        .sessions
        .create_session(&id, request, webhook_payload)
        .await
        .map_err(ApiError::from)?;

    Ok((StatusCode::CREATED, Json(session_to_response(&session))))
}

async fn list_sessions(
    State(state): State<AppState>,
    identity: Identity,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<ListSessionsResponse>, ApiError> {
    let scope = params
        .get("scope")
        .map(|raw| {
            ResourceScope::parse(raw)
                .ok_or_else(|| ApiError::BadRequest(format!("unknown scope: {raw}")))
        })
        .transpose()?;
    let team_id = params.get("team_id").cloned();
    let tags: HashMap<String, String> = params
        .iter()
        .filter_map(|(key, value)| {
            key.strip_prefix("tags.")
                .map(|tag| (tag.to_owned(), value.clone()))
        })
        .collect();

    // Non-admin callers see their own sessions, plus their teams' sessions
    // when they query by team.
    let user_id = if identity.admin {
        params.get("user_id").cloned()
    } else if let Some(team_id) = &team_id {
        if !identity.is_member_of(team_id) {
            return Err(ApiError::Forbidden);
        }
        None
    } else {
        Some(identity.user_id.clone())
    };

    let filter = SessionFilter {
        user_id,
        scope,
        team_id,
        team_ids: Vec::new(),
        tags,
    };

    let sessions = state
        .sessions
        .list_sessions(&filter)
        .await
        .map_err(ApiError::from)?;
    let sessions: Vec<SessionResponse> = sessions
        .iter()
        .map(|session| session_to_response(session))
        .collect();
    let total = sessions.len();
    Ok(Json(ListSessionsResponse { sessions, total }))
}

async fn get_session(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = state
        .sessions
        .get_session(&id)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::NotFound("session".into()))?;
    authorize_session(&identity, &session)?;
    Ok(Json(session_to_response(&session)))
}

#[tracing::instrument(skip(state), fields(user_id = %identity.user_id, %id), err)]
async fn delete_session(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = state
        .sessions
        .get_session(&id)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::NotFound("session".into()))?;
    authorize_session(&identity, &session)?;

    state
        .sessions
        .delete_session(&id)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[tracing::instrument(skip(state, body), fields(user_id = %identity.user_id, %id), err)]
async fn send_message(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<String>,
    Json(body): Json<SendMessageBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = state
        .sessions
        .get_session(&id)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::NotFound("session".into()))?;
    authorize_session(&identity, &session)?;

    state
        .sessions
        .send_message(&id, &body.content)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

async fn get_messages(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<String>,
) -> Result<Json<Vec<MessageResponse>>, ApiError> {
    let session = state
        .sessions
        .get_session(&id)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::NotFound("session".into()))?;
    authorize_session(&identity, &session)?;

    let messages = state
        .sessions
        .get_messages(&id)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(
        messages
            .into_iter()
            .map(|message| MessageResponse {
                role: message.role,
                content: message.content,
            })
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(user: &str, teams: &[&str], admin: bool) -> Identity {
        Identity {
            user_id: user.into(),
            teams: teams.iter().map(|t| (*t).to_owned()).collect(),
            admin,
        }
    }

    fn team_session() -> Session {
        Session::new(
            "s1",
            SessionRequest {
                user_id: "alice".into(),
                scope: ResourceScope::Team,
                team_id: Some("org/a".into()),
                ..Default::default()
            },
            "ns",
            9000,
            None,
        )
    }

    #[test]
    fn owner_and_admin_are_authorized() {
        let session = team_session();
        assert!(authorize_session(&identity("alice", &[], false), &session).is_ok());
        assert!(authorize_session(&identity("root", &[], true), &session).is_ok());
    }

    #[test]
    fn team_member_is_authorized_for_team_sessions() {
        let session = team_session();
        assert!(authorize_session(&identity("bob", &["org/a"], false), &session).is_ok());
        assert!(matches!(
            authorize_session(&identity("bob", &["org/b"], false), &session),
            Err(ApiError::Forbidden)
        ));
    }

    #[test]
    fn team_membership_does_not_grant_user_sessions() {
        let session = Session::new(
            "s2",
            SessionRequest {
                user_id: "alice".into(),
                teams: vec!["org/a".into()],
                ..Default::default()
            },
            "ns",
            9000,
            None,
        );
        assert!(matches!(
            authorize_session(&identity("bob", &["org/a"], false), &session),
            Err(ApiError::Forbidden)
        ));
    }
}
