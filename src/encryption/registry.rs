use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::{EncryptionMetadata, EncryptionService};

/// Routes encryption to a primary backend and decryption by
/// `(algorithm, key id)` with algorithm-level and primary fallbacks.
///
/// Keeping superseded backends registered lets a running system rotate keys
/// without losing the ability to decrypt ciphertexts under prior keys.
pub struct Registry {
    inner: RwLock<Inner>,
}

struct Inner {
    primary: Arc<dyn EncryptionService>,
    by_algorithm: HashMap<String, Arc<dyn EncryptionService>>,
    by_algorithm_and_key: HashMap<String, Arc<dyn EncryptionService>>,
}

fn composite_key(algorithm: &str, key_id: &str) -> String {
    format!("{algorithm}:{key_id}")
}

impl Registry {
    pub fn new(primary: Arc<dyn EncryptionService>) -> Self {
        let registry = Self {
            inner: RwLock::new(Inner {
                primary: primary.clone(),
                by_algorithm: HashMap::new(),
                by_algorithm_and_key: HashMap::new(),
            }),
        };
        registry.register(primary);
        registry
    }

    pub fn register(&self, service: Arc<dyn EncryptionService>) {
        let mut inner = self.inner.write().expect("encryption registry poisoned");
        inner.by_algorithm_and_key.insert(
            composite_key(service.algorithm(), service.key_id()),
            service.clone(),
        );
        // First registration wins per algorithm.
        inner
            .by_algorithm
            .entry(service.algorithm().to_owned())
            .or_insert(service);
    }

    pub fn set_primary(&self, service: Arc<dyn EncryptionService>) {
        {
            let mut inner = self.inner.write().expect("encryption registry poisoned");
            inner.primary = service.clone();
        }
        self.register(service);
    }

    pub fn for_encryption(&self) -> Arc<dyn EncryptionService> {
        self.inner
            .read()
            .expect("encryption registry poisoned")
            .primary
            .clone()
    }

    /// Exact `(algorithm, key)` match, then algorithm match, then primary.
    pub fn for_decryption(&self, metadata: &EncryptionMetadata) -> Arc<dyn EncryptionService> {
        let inner = self.inner.read().expect("encryption registry poisoned");
        inner
            .by_algorithm_and_key
            .get(&composite_key(&metadata.algorithm, &metadata.key_id))
            .or_else(|| inner.by_algorithm.get(&metadata.algorithm))
            .cloned()
            .unwrap_or_else(|| inner.primary.clone())
    }
}
