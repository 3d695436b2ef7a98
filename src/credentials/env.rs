use std::env;

use async_trait::async_trait;

use super::{Credentials, CredentialsProvider};

type EnvReader = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Reads credentials from process environment variables. Ignores the user id:
/// an env-provisioned token applies to every session this orchestrator runs.
pub struct EnvCredentialsProvider {
    read: EnvReader,
}

fn process_env(var: &str) -> Option<String> {
    env::var(var).ok().filter(|v| !v.is_empty())
}

impl EnvCredentialsProvider {
    pub fn new() -> Self {
        Self {
            read: Box::new(process_env),
        }
    }

    #[cfg(test)]
    fn with_reader(read: EnvReader) -> Self {
        Self { read }
    }
}

impl Default for EnvCredentialsProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialsProvider for EnvCredentialsProvider {
    fn name(&self) -> &str {
        "env"
    }

    async fn load(&self, _user_id: &str) -> anyhow::Result<Option<Credentials>> {
        let Some(access_token) = (self.read)("CLAUDE_ACCESS_TOKEN") else {
            return Ok(None);
        };
        Ok(Some(Credentials {
            access_token: Some(access_token),
            refresh_token: (self.read)("CLAUDE_REFRESH_TOKEN"),
            expires_at: (self.read)("CLAUDE_EXPIRES_AT"),
            raw_json: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn provider_with(vars: &[(&str, &str)]) -> EnvCredentialsProvider {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        EnvCredentialsProvider::with_reader(Box::new(move |key| {
            map.get(key).filter(|v| !v.is_empty()).cloned()
        }))
    }

    #[tokio::test]
    async fn absent_when_access_token_unset() {
        let provider = provider_with(&[]);
        assert!(provider.load("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reads_all_three_vars() {
        let provider = provider_with(&[
            ("CLAUDE_ACCESS_TOKEN", "tok"),
            ("CLAUDE_REFRESH_TOKEN", "ref"),
            ("CLAUDE_EXPIRES_AT", "2026-01-01T00:00:00Z"),
        ]);
        let creds = provider.load("alice").await.unwrap().unwrap();
        assert_eq!(creds.access_token.as_deref(), Some("tok"));
        assert_eq!(creds.refresh_token.as_deref(), Some("ref"));
        assert_eq!(creds.expires_at.as_deref(), Some("2026-01-01T00:00:00Z"));
        assert!(creds.raw_json.is_none());
    }

    #[tokio::test]
    async fn empty_access_token_is_absent() {
        let provider = provider_with(&[("CLAUDE_ACCESS_TOKEN", "")]);
        assert!(provider.load("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn access_token_alone_is_enough() {
        let provider = provider_with(&[("CLAUDE_ACCESS_TOKEN", "tok")]);
        let creds = provider.load("alice").await.unwrap().unwrap();
        assert_eq!(creds.access_token.as_deref(), Some("tok"));
        assert!(creds.refresh_token.is_none());
        assert!(creds.expires_at.is_none());
    }
}
