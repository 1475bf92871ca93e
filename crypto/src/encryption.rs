use crate::error::CryptoError;
use serde::{Deserialize, Serialize};

/// Result type for encryption operations
pub type EncryptionResult<T> = Result<T, CryptoError>;

/// Sealed payload as persisted in the local cache.
///
/// Both fields are standard base64. `iv` is the 96-bit GCM nonce that was
/// used for this payload only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    pub ciphertext: String,
    pub iv: String,
}

/// Trait for symmetric authenticated encryption of byte payloads
pub trait Encryptor: Send + Sync {
    /// Encrypt data under a fresh nonce
    fn seal(&self, plaintext: &[u8]) -> EncryptionResult<EncryptedPayload>;

    /// Decrypt and authenticate data
    fn open(&self, payload: &EncryptedPayload) -> EncryptionResult<Vec<u8>>;

    /// Get the encryption algorithm name
    fn algorithm(&self) -> &str;
}

/// Encrypt any serializable value as JSON
pub fn encrypt_json<T, E>(value: &T, encryptor: &E) -> EncryptionResult<EncryptedPayload>
where
    T: Serialize + ?Sized,
    E: Encryptor + ?Sized,
{
    let bytes = serde_json::to_vec(value)?;
    encryptor.seal(&bytes)
}

/// Decrypt a payload produced by [`encrypt_json`]
pub fn decrypt_json<T, E>(payload: &EncryptedPayload, encryptor: &E) -> EncryptionResult<T>
where
    T: serde::de::DeserializeOwned,
    E: Encryptor + ?Sized,
{
    let bytes = encryptor.open(payload)?;
    Ok(serde_json::from_slice(&bytes)?)
}
