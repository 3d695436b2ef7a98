//! Encryption backends for out-of-band data at rest.
//!
//! Backends are capability sets: encrypt stamps [`EncryptionMetadata`] onto
//! every ciphertext so a future decrypt can locate a compatible backend in
//! the [`registry::Registry`] even after key rotation.

pub mod local;
pub mod noop;
pub mod registry;

use std::env;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Carried alongside every ciphertext; routes decryption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionMetadata {
    pub algorithm: String,
    pub key_id: String,
    pub version: u32,
    pub encrypted_at: DateTime<Utc>,
}

impl EncryptionMetadata {
    pub fn new(algorithm: &str, key_id: &str) -> Self {
        Self {
            algorithm: algorithm.to_owned(),
            key_id: key_id.to_owned(),
            version: 1,
            encrypted_at: Utc::now(),
        }
    }
}

/// One encryption backend. Algorithms are opaque strings to the rest of the
/// system (`noop`, `aes-256-gcm`, `aws-kms`, ...).
pub trait EncryptionService: Send + Sync {
    fn algorithm(&self) -> &str;
    fn key_id(&self) -> &str;
    fn encrypt(&self, plaintext: &[u8]) -> anyhow::Result<(Vec<u8>, EncryptionMetadata)>;
    fn decrypt(&self, ciphertext: &[u8], metadata: &EncryptionMetadata) -> anyhow::Result<Vec<u8>>;
}

/// Build the registry from the process environment.
///
/// Precedence: KMS (`AGENTAPI_ENCRYPTION_KMS_KEY_ID` +
/// `AGENTAPI_ENCRYPTION_KMS_REGION`) → local key file
/// (`AGENTAPI_ENCRYPTION_KEY_FILE`) → noop, falling back a level on each
/// failure.
pub fn registry_from_env() -> registry::Registry {
    if let Ok(key_id) = env::var("AGENTAPI_ENCRYPTION_KMS_KEY_ID")
        && !key_id.is_empty()
    {
        let region = env::var("AGENTAPI_ENCRYPTION_KMS_REGION").unwrap_or_default();
        // No KMS backend is linked into this binary; embedders register one
        // via `Registry::set_primary`. Treat as a failed probe and fall back.
        tracing::warn!(
            %key_id,
            %region,
            "aws-kms encryption requested but no KMS backend is available, falling back"
        );
    }

    if let Ok(path) = env::var("AGENTAPI_ENCRYPTION_KEY_FILE")
        && !path.is_empty()
    {
        match local::LocalKeyEncryptionService::from_key_file(&path) {
            Ok(svc) => {
                tracing::info!(%path, key_id = %svc.key_id(), "using aes-256-gcm encryption");
                return registry::Registry::new(Arc::new(svc));
            }
            Err(e) => {
                tracing::warn!(%path, error = %e, "failed to load local encryption key, falling back to noop");
            }
        }
    }

    registry::Registry::new(Arc::new(noop::NoopEncryptionService::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_roundtrips_through_json() {
        let meta = EncryptionMetadata::new("aes-256-gcm", "k1");
        let json = serde_json::to_string(&meta).unwrap();
        let back: EncryptionMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
    }
}
