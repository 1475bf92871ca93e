//! Per-user data key management
//!
//! A user's key is generated once, wrapped by the device KEK and persisted
//! through a [`KeyStore`]. Every later session unwraps the same key, so
//! cached ciphertext written before a re-authentication stays readable.
//! Nothing here looks at session tokens.

use crate::aes_gcm::Aes256GcmEncryptor;
use crate::encryption::{EncryptedPayload, EncryptionResult, Encryptor};
use crate::envelope::KeyWrapper;
use crate::error::CryptoResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Current version stamped on newly generated user keys
pub const CURRENT_KEY_VERSION: u32 = 1;

/// Wrapped user key as persisted by a [`KeyStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredKey {
    pub user_id: String,
    pub wrapped_key: String,
    pub key_version: u32,
    pub created_at: DateTime<Utc>,
}

/// Persistence for wrapped user keys
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Load the wrapped key for a user, if one exists
    async fn load_key(&self, user_id: &str) -> CryptoResult<Option<StoredKey>>;

    /// Persist `key` unless the user already has one; returns whichever
    /// record is stored afterwards
    async fn insert_key_if_absent(&self, key: StoredKey) -> CryptoResult<StoredKey>;

    /// Remove a user's key
    async fn delete_key(&self, user_id: &str) -> CryptoResult<()>;
}

/// In-memory key store for tests and ephemeral sessions
#[derive(Default)]
pub struct MemoryKeyStore {
    keys: RwLock<HashMap<String, StoredKey>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn load_key(&self, user_id: &str) -> CryptoResult<Option<StoredKey>> {
        Ok(self.keys.read().get(user_id).cloned())
    }

    async fn insert_key_if_absent(&self, key: StoredKey) -> CryptoResult<StoredKey> {
        let mut keys = self.keys.write();
        Ok(keys.entry(key.user_id.clone()).or_insert(key).clone())
    }

    async fn delete_key(&self, user_id: &str) -> CryptoResult<()> {
        self.keys.write().remove(user_id);
        Ok(())
    }
}

/// Handle to an unwrapped user key
///
/// Cheap to clone; the key material is shared and zeroized when the last
/// handle is dropped.
#[derive(Clone)]
pub struct KeyHandle {
    user_id: Arc<str>,
    encryptor: Arc<Aes256GcmEncryptor>,
}

impl KeyHandle {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn version(&self) -> u32 {
        self.encryptor.version()
    }
}

impl fmt::Debug for KeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyHandle")
            .field("user_id", &self.user_id)
            .field("version", &self.version())
            .finish_non_exhaustive()
    }
}

impl Encryptor for KeyHandle {
    fn seal(&self, plaintext: &[u8]) -> EncryptionResult<EncryptedPayload> {
        self.encryptor.seal(plaintext)
    }

    fn open(&self, payload: &EncryptedPayload) -> EncryptionResult<Vec<u8>> {
        self.encryptor.open(payload)
    }

    fn algorithm(&self) -> &str {
        self.encryptor.algorithm()
    }
}

/// Hands out stable per-user keys
pub struct KeyProvider {
    store: Arc<dyn KeyStore>,
    wrapper: KeyWrapper,
}

impl KeyProvider {
    pub fn new(store: Arc<dyn KeyStore>, wrapper: KeyWrapper) -> Self {
        Self { store, wrapper }
    }

    /// Return the user's key, generating and persisting one on first use
    pub async fn get_or_create_key(&self, user_id: &str) -> CryptoResult<KeyHandle> {
        let stored = match self.store.load_key(user_id).await? {
            Some(stored) => stored,
            None => {
                let dek = Aes256GcmEncryptor::new(Aes256GcmEncryptor::generate_key())?
                    .with_version(CURRENT_KEY_VERSION);
                let candidate = StoredKey {
                    user_id: user_id.to_string(),
                    wrapped_key: self.wrapper.wrap(&dek)?,
                    key_version: CURRENT_KEY_VERSION,
                    created_at: Utc::now(),
                };
                let stored = self.store.insert_key_if_absent(candidate).await?;
                tracing::info!(key_version = stored.key_version, "Provisioned user data key");
                stored
            }
        };

        let encryptor = self.wrapper.unwrap_key(&stored.wrapped_key, stored.key_version)?;
        Ok(KeyHandle {
            user_id: Arc::from(user_id),
            encryptor: Arc::new(encryptor),
        })
    }

    /// Drop the user's key. Anything encrypted under it becomes unreadable,
    /// so callers clear the matching caches in the same step.
    pub async fn forget_key(&self, user_id: &str) -> CryptoResult<()> {
        self.store.delete_key(user_id).await?;
        tracing::info!("Forgot user data key");
        Ok(())
    }
}
