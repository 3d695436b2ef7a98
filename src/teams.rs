use std::collections::HashMap;

use async_trait::async_trait;

/// Team-level configuration consumed by team-scoped sessions.
#[derive(Debug, Clone, Default)]
pub struct TeamConfig {
    /// Environment injected via the session's team-env Secret.
    pub env: HashMap<String, String>,
}

/// Lookup port for team configuration. The orchestrator only needs reads;
/// where the data lives (file, API, CRD) is the embedder's business.
#[async_trait]
pub trait TeamConfigRepository: Send + Sync {
    async fn get_team(&self, team_id: &str) -> anyhow::Result<Option<TeamConfig>>;
}

/// Fixed team map, loaded once at startup.
#[derive(Debug, Default)]
pub struct StaticTeamConfigRepository {
    teams: HashMap<String, TeamConfig>,
}

impl StaticTeamConfigRepository {
    pub fn new(teams: HashMap<String, TeamConfig>) -> Self {
        Self { teams }
    }
}

#[async_trait]
impl TeamConfigRepository for StaticTeamConfigRepository {
    async fn get_team(&self, team_id: &str) -> anyhow::Result<Option<TeamConfig>> {
        Ok(self.teams.get(team_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup_hits_and_misses() {
        let repo = StaticTeamConfigRepository::new(HashMap::from([(
            "org/team-a".to_owned(),
            TeamConfig {
                env: HashMap::from([("AWS_REGION".to_owned(), "us-east-1".to_owned())]),
            },
        )]));
        let team = repo.get_team("org/team-a").await.unwrap().unwrap();
        assert_eq!(team.env["AWS_REGION"], "us-east-1");
        assert!(repo.get_team("org/other").await.unwrap().is_none());
    }
}
