//! Long-lived agent instances backed by a StatefulSet and headless Service.
//!
//! This is a separate code path from the per-request session Deployments and
//! is kept that way: the two lifecycles (durable agent with its own volume
//! claim vs. ephemeral session) do not share a template.

pub mod resources;
pub mod service;

/// Inputs for the agent resource builder, with the documented defaults.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub agent_id: String,
    pub session_id: String,
    pub user_id: String,
    pub image: String,
    pub cpu_request: String,
    pub memory_request: String,
    pub cpu_limit: String,
    pub memory_limit: String,
    pub storage_size: String,
    pub namespace: String,
}

impl AgentConfig {
    pub fn new(agent_id: &str, session_id: &str, user_id: &str) -> Self {
        Self {
            agent_id: agent_id.to_owned(),
            session_id: session_id.to_owned(),
            user_id: user_id.to_owned(),
            image: "agentapi-proxy:latest".into(),
            cpu_request: "100m".into(),
            memory_request: "256Mi".into(),
            cpu_limit: "500m".into(),
            memory_limit: "512Mi".into(),
            storage_size: "1Gi".into(),
            namespace: "agentapi-proxy".into(),
        }
    }
}
