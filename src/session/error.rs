use super::SessionStatus;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session not found")]
    SessionNotFound,

    #[error("session is {0}, messages require starting or active")]
    InvalidSessionStatus(SessionStatus),

    #[error("failed to create {kind}: {source}")]
    ResourceCreateFailed {
        kind: &'static str,
        #[source]
        source: kube::Error,
    },

    #[error("deployment never became ready")]
    Timeout,

    #[error("agent request failed after retries: {0}")]
    AgentRequest(#[from] reqwest::Error),

    /// Per-object failures collected during deletion.
    #[error("session deletion incomplete: {}", .0.join("; "))]
    DeletionFailed(Vec<String>),

    #[error(transparent)]
    Kube(#[from] kube::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
