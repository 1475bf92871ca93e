use crate::aes_gcm::Aes256GcmEncryptor;
use crate::error::CryptoError;

/// Result type for envelope encryption operations
pub type EnvelopeResult<T> = Result<T, CryptoError>;

/// Envelope wrapping of per-user data keys
///
/// Each user owns a random Data Encryption Key (DEK). The DEK is never
/// persisted in clear: it is encrypted with the device Key Encryption Key
/// (KEK) and only the wrapped form reaches the key store.
///
/// Benefits:
/// - The DEK is stable for the lifetime of the wrapped record, so cached
///   ciphertext survives re-authentication
/// - Only the KEK has to be protected by the host
/// - Rotating the KEK means re-wrapping DEKs, not re-encrypting the cache
pub struct KeyWrapper {
    kek_encryptor: Aes256GcmEncryptor,
}

impl KeyWrapper {
    /// Create a wrapper around a raw KEK
    pub fn new(kek: [u8; 32]) -> EnvelopeResult<Self> {
        Ok(Self {
            kek_encryptor: Aes256GcmEncryptor::new(kek)?,
        })
    }

    /// Create from base64-encoded KEK
    pub fn from_base64_kek(kek_b64: &str) -> EnvelopeResult<Self> {
        Ok(Self {
            kek_encryptor: Aes256GcmEncryptor::from_base64(kek_b64)?,
        })
    }

    /// Encrypt a DEK under the KEK, returning the versioned string form
    pub fn wrap(&self, dek: &Aes256GcmEncryptor) -> EnvelopeResult<String> {
        self.kek_encryptor.encrypt_versioned(dek.key_bytes())
    }

    /// Recover a DEK from its wrapped form
    pub fn unwrap_key(&self, wrapped: &str, key_version: u32) -> EnvelopeResult<Aes256GcmEncryptor> {
        let mut raw = self.kek_encryptor.decrypt_versioned(wrapped)?;
        let dek = Aes256GcmEncryptor::from_slice(&raw).map(|dek| dek.with_version(key_version));
        zeroize::Zeroize::zeroize(&mut raw);
        dek
    }
}
