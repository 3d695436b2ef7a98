use std::path::Path;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use sha2::{Digest, Sha256};

use super::{EncryptionMetadata, EncryptionService};

/// AES-256-GCM with a 32-byte key loaded from a local file.
/// Wire format: `nonce (12) || ciphertext || tag`.
pub struct LocalKeyEncryptionService {
    key: [u8; 32],
    key_id: String,
}

/// Parse a hex-encoded 32-byte key (64 hex chars).
fn parse_key(hex_str: &str) -> anyhow::Result<[u8; 32]> {
    let bytes =
        hex::decode(hex_str.trim()).map_err(|e| anyhow::anyhow!("invalid key file hex: {e}"))?;
    let key: [u8; 32] = bytes
        .try_into()
        .map_err(|v: Vec<u8>| anyhow::anyhow!("encryption key must be 32 bytes, got {}", v.len()))?;
    Ok(key)
}

impl LocalKeyEncryptionService {
    pub fn new(key: [u8; 32]) -> Self {
        // Key id is a fingerprint, never the key itself.
        let digest = Sha256::digest(key);
        let key_id = hex::encode(&digest[..8]);
        Self { key, key_id }
    }

    pub fn from_key_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("failed to read key file: {e}"))?;
        Ok(Self::new(parse_key(&contents)?))
    }
}

impl EncryptionService for LocalKeyEncryptionService {
    fn algorithm(&self) -> &str {
        "aes-256-gcm"
    }

    fn key_id(&self) -> &str {
        &self.key_id
    }

    fn encrypt(&self, plaintext: &[u8]) -> anyhow::Result<(Vec<u8>, EncryptionMetadata)> {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| anyhow::anyhow!("failed to create cipher: {e}"))?;

        let mut nonce_bytes = [0u8; 12];
        rand::fill(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| anyhow::anyhow!("encryption failed: {e}"))?;

        let mut out = Vec::with_capacity(12 + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok((out, EncryptionMetadata::new(self.algorithm(), &self.key_id)))
    }

    fn decrypt(&self, ciphertext: &[u8], _metadata: &EncryptionMetadata) -> anyhow::Result<Vec<u8>> {
        if ciphertext.len() < 12 {
            anyhow::bail!("ciphertext too short (need at least 12 bytes for nonce)");
        }

        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| anyhow::anyhow!("failed to create cipher: {e}"))?;

        let nonce = Nonce::from_slice(&ciphertext[..12]);
        cipher
            .decrypt(nonce, &ciphertext[12..])
            .map_err(|e| anyhow::anyhow!("decryption failed (wrong key or corrupted data): {e}"))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let svc = LocalKeyEncryptionService::new([42u8; 32]);
        let (ct, meta) = svc.encrypt(b"super-secret-value").unwrap();
        assert!(ct.len() > b"super-secret-value".len());
        assert_eq!(meta.algorithm, "aes-256-gcm");
        assert_eq!(meta.key_id, svc.key_id());
        assert_eq!(svc.decrypt(&ct, &meta).unwrap(), b"super-secret-value");
    }

    #[test]
    fn different_encryptions_differ() {
        let svc = LocalKeyEncryptionService::new([42u8; 32]);
        let (a, _) = svc.encrypt(b"same").unwrap();
        let (b, _) = svc.encrypt(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails() {
        let a = LocalKeyEncryptionService::new([1u8; 32]);
        let b = LocalKeyEncryptionService::new([2u8; 32]);
        let (ct, meta) = a.encrypt(b"secret").unwrap();
        assert!(b.decrypt(&ct, &meta).is_err());
    }

    #[test]
    fn corrupted_ciphertext_fails() {
        let svc = LocalKeyEncryptionService::new([42u8; 32]);
        let (mut ct, meta) = svc.encrypt(b"secret").unwrap();
        if let Some(byte) = ct.last_mut() {
            *byte ^= 0xFF;
        }
        assert!(svc.decrypt(&ct, &meta).is_err());
    }

    #[test]
    fn key_id_is_a_fingerprint() {
        let a = LocalKeyEncryptionService::new([1u8; 32]);
        let b = LocalKeyEncryptionService::new([1u8; 32]);
        let c = LocalKeyEncryptionService::new([2u8; 32]);
        assert_eq!(a.key_id(), b.key_id());
        assert_ne!(a.key_id(), c.key_id());
        assert_eq!(a.key_id().len(), 16);
    }

    #[test]
    fn loads_hex_key_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", "ab".repeat(32)).unwrap();
        let svc = LocalKeyEncryptionService::from_key_file(file.path()).unwrap();
        let (ct, meta) = svc.encrypt(b"x").unwrap();
        assert_eq!(svc.decrypt(&ct, &meta).unwrap(), b"x");
    }

    #[test]
    fn rejects_short_key_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "aabb").unwrap();
        assert!(LocalKeyEncryptionService::from_key_file(file.path()).is_err());
    }
}
