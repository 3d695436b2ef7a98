use super::{EncryptionMetadata, EncryptionService};

/// Plaintext passthrough. Ciphertexts are still stamped with metadata so a
/// later switch to a real backend leaves old values decryptable.
pub struct NoopEncryptionService;

impl NoopEncryptionService {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NoopEncryptionService {
    fn default() -> Self {
        Self::new()
    }
}

impl EncryptionService for NoopEncryptionService {
    fn algorithm(&self) -> &str {
        "noop"
    }

    fn key_id(&self) -> &str {
        "noop"
    }

    fn encrypt(&self, plaintext: &[u8]) -> anyhow::Result<(Vec<u8>, EncryptionMetadata)> {
        Ok((
            plaintext.to_vec(),
            EncryptionMetadata::new(self.algorithm(), self.key_id()),
        ))
    }

    fn decrypt(&self, ciphertext: &[u8], _metadata: &EncryptionMetadata) -> anyhow::Result<Vec<u8>> {
        Ok(ciphertext.to_vec())
    }
}
