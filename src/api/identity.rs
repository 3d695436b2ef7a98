use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::ApiError;

pub const HEADER_USER: &str = "x-agentapi-user";
pub const HEADER_TEAMS: &str = "x-agentapi-teams";
pub const HEADER_ROLE: &str = "x-agentapi-role";

/// Caller identity forwarded by the authentication layer in front of us.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
    pub teams: Vec<String>,
    pub admin: bool,
}

impl Identity {
    pub fn is_member_of(&self, team_id: &str) -> bool {
        self.teams.iter().any(|team| team == team_id)
    }
}

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
        };

        let Some(user_id) = header(HEADER_USER) else {
            return Err(ApiError::Unauthorized);
        };
        let teams = header(HEADER_TEAMS)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|team| !team.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();
        let admin = header(HEADER_ROLE) == Some("admin");

        Ok(Self {
            user_id: user_id.to_owned(),
            teams,
            admin,
        })
    }
}
