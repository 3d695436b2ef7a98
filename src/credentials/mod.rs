//! Agent credential acquisition.
//!
//! An ordered provider chain is consulted on demand at session creation;
//! the first provider that yields a credential wins.

pub mod env;
pub mod file;

use async_trait::async_trait;

/// Credentials for the agent process. Providers fill what they know; the
/// file provider deliberately keeps the raw JSON untouched so new credential
/// schemas pass through without a code change here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<String>,
    pub raw_json: Option<String>,
}

#[async_trait]
pub trait CredentialsProvider: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(None)` means "this provider has nothing for that user"; the chain
    /// moves on. An error stops the chain.
    async fn load(&self, user_id: &str) -> anyhow::Result<Option<Credentials>>;
}

/// Ordered lookup across providers. Not cached: credentials can change
/// between sessions (token refresh, mounted file rotation).
pub struct ProviderChain {
    providers: Vec<Box<dyn CredentialsProvider>>,
}

impl ProviderChain {
    pub fn new(providers: Vec<Box<dyn CredentialsProvider>>) -> Self {
        Self { providers }
    }

    /// Env provider first, then the default credential file path.
    pub fn default_chain() -> Self {
        Self::new(vec![
            Box::new(env::EnvCredentialsProvider::new()),
            Box::new(file::FileCredentialsProvider::new(
                "~/.claude/.credentials.json",
            )),
        ])
    }

    pub async fn load(&self, user_id: &str) -> anyhow::Result<Option<Credentials>> {
        for provider in &self.providers {
            match provider.load(user_id).await? {
                Some(credentials) => {
                    tracing::debug!(provider = provider.name(), user_id, "credentials resolved");
                    return Ok(Some(credentials));
                }
                None => continue,
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Option<Credentials>);

    #[async_trait]
    impl CredentialsProvider for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn load(&self, _user_id: &str) -> anyhow::Result<Option<Credentials>> {
            Ok(self.0.clone())
        }
    }

    struct Failing;

    #[async_trait]
    impl CredentialsProvider for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn load(&self, _user_id: &str) -> anyhow::Result<Option<Credentials>> {
            anyhow::bail!("backend unavailable")
        }
    }

    fn creds(token: &str) -> Credentials {
        Credentials {
            access_token: Some(token.into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn first_non_absent_wins() {
        let chain = ProviderChain::new(vec![
            Box::new(Fixed(None)),
            Box::new(Fixed(Some(creds("a")))),
            Box::new(Fixed(Some(creds("b")))),
        ]);
        let got = chain.load("alice").await.unwrap().unwrap();
        assert_eq!(got.access_token.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn all_absent_is_absent() {
        let chain = ProviderChain::new(vec![Box::new(Fixed(None)), Box::new(Fixed(None))]);
        assert!(chain.load("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn error_short_circuits() {
        let chain = ProviderChain::new(vec![
            Box::new(Failing),
            Box::new(Fixed(Some(creds("unreached")))),
        ]);
        assert!(chain.load("alice").await.is_err());
    }
}
