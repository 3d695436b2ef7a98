use std::path::PathBuf;

use async_trait::async_trait;

use super::{Credentials, CredentialsProvider};

/// Reads a credential file and returns its bytes untouched in `raw_json`.
///
/// The provider refuses to parse the file: forward compatibility with new
/// credential schemas is free when the contents stay opaque.
pub struct FileCredentialsProvider {
    path: String,
}

impl FileCredentialsProvider {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    fn resolved_path(&self) -> PathBuf {
        if let Some(rest) = self.path.strip_prefix("~/") {
            if let Ok(home) = std::env::var("HOME") {
                return PathBuf::from(home).join(rest);
            }
        }
        PathBuf::from(&self.path)
    }
}

#[async_trait]
impl CredentialsProvider for FileCredentialsProvider {
    fn name(&self) -> &str {
        "file"
    }

    async fn load(&self, _user_id: &str) -> anyhow::Result<Option<Credentials>> {
        let path = self.resolved_path();
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => Ok(Some(Credentials {
                raw_json: Some(raw),
                ..Default::default()
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(anyhow::anyhow!(
                "failed to read credential file {}: {e}",
                path.display()
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[tokio::test]
    async fn missing_file_is_absent() {
        let provider = FileCredentialsProvider::new("/nonexistent/credentials.json");
        assert!(provider.load("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn returns_raw_bytes_unparsed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        // Deliberately not a schema this crate knows about.
        write!(file, r#"{{"futureField": {{"nested": true}}}}"#).unwrap();

        let provider = FileCredentialsProvider::new(file.path().to_str().unwrap());
        let creds = provider.load("alice").await.unwrap().unwrap();
        assert_eq!(
            creds.raw_json.as_deref(),
            Some(r#"{"futureField": {"nested": true}}"#)
        );
        assert!(creds.access_token.is_none());
    }
}
