use crate::encryption::{EncryptedPayload, EncryptionResult, Encryptor};
use crate::error::CryptoError;
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::{rngs::OsRng, RngCore};
use zeroize::ZeroizeOnDrop;

/// Length of a GCM nonce in bytes (96 bits)
pub const NONCE_LEN: usize = 12;

/// Length of an AES-256 key in bytes
pub const KEY_LEN: usize = 32;

/// AES-256-GCM encryptor with memory security
///
/// This implementation provides:
/// - AES-256 in Galois/Counter Mode
/// - A fresh random 96-bit nonce for every encryption
/// - Authentication tags for integrity
/// - Memory zeroization on drop
#[derive(ZeroizeOnDrop)]
pub struct Aes256GcmEncryptor {
    #[zeroize(skip)]
    cipher: Aes256Gcm,
    /// Key material - automatically zeroized on drop
    key: [u8; KEY_LEN],
    /// Key version for rotation support
    #[zeroize(skip)]
    key_version: u32,
}

impl Aes256GcmEncryptor {
    /// Create a new encryptor with a 32-byte key
    pub fn new(key: [u8; KEY_LEN]) -> EncryptionResult<Self> {
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;

        Ok(Self {
            cipher,
            key,
            key_version: 1,
        })
    }

    /// Create from raw key bytes of unchecked length
    pub fn from_slice(key_bytes: &[u8]) -> EncryptionResult<Self> {
        let key: [u8; KEY_LEN] = key_bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength {
                expected: KEY_LEN,
                got: key_bytes.len(),
            })?;
        Self::new(key)
    }

    /// Create from base64-encoded key
    pub fn from_base64(key_b64: &str) -> EncryptionResult<Self> {
        let key_bytes = BASE64
            .decode(key_b64.trim())
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Self::from_slice(&key_bytes)
    }

    /// Create with specific key version
    pub fn with_version(mut self, version: u32) -> Self {
        self.key_version = version;
        self
    }

    /// Generate a new random key (cryptographically secure)
    pub fn generate_key() -> [u8; KEY_LEN] {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        key
    }

    /// Get the current key version
    pub fn version(&self) -> u32 {
        self.key_version
    }

    /// Raw key bytes, needed only to wrap the key under a KEK
    pub(crate) fn key_bytes(&self) -> &[u8; KEY_LEN] {
        &self.key
    }

    fn encrypt_raw(&self, plaintext: &[u8]) -> EncryptionResult<([u8; NONCE_LEN], Vec<u8>)> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        Ok((nonce_bytes, ciphertext))
    }

    fn decrypt_raw(&self, nonce_bytes: &[u8], ciphertext: &[u8]) -> EncryptionResult<Vec<u8>> {
        if nonce_bytes.len() != NONCE_LEN {
            return Err(CryptoError::InvalidNonce(nonce_bytes.len()));
        }
        let nonce = Nonce::from_slice(nonce_bytes);

        // Decrypt and verify authentication tag
        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed("authentication tag mismatch".to_string()))
    }

    /// Encrypt with versioned format: "v{version}:{nonce_b64}:{ciphertext_b64}"
    pub fn encrypt_string(&self, plaintext: &str) -> EncryptionResult<String> {
        self.encrypt_versioned(plaintext.as_bytes())
    }

    /// Decrypt a versioned string
    pub fn decrypt_string(&self, encrypted: &str) -> EncryptionResult<String> {
        let plaintext_bytes = self.decrypt_versioned(encrypted)?;
        String::from_utf8(plaintext_bytes)
            .map_err(|e| CryptoError::InvalidFormat(e.to_string()))
    }

    pub(crate) fn encrypt_versioned(&self, plaintext: &[u8]) -> EncryptionResult<String> {
        let (nonce, ciphertext) = self.encrypt_raw(plaintext)?;
        Ok(format!(
            "v{}:{}:{}",
            self.key_version,
            BASE64.encode(nonce),
            BASE64.encode(ciphertext)
        ))
    }

    pub(crate) fn decrypt_versioned(&self, encrypted: &str) -> EncryptionResult<Vec<u8>> {
        let mut parts = encrypted.split(':');
        let (Some(version), Some(nonce), Some(ciphertext), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(CryptoError::InvalidFormat(
                "expected v{version}:{nonce}:{ciphertext}".to_string(),
            ));
        };

        let version = version
            .strip_prefix('v')
            .and_then(|v| v.parse::<u32>().ok())
            .ok_or_else(|| CryptoError::InvalidFormat(format!("bad version tag {version}")))?;

        if version != self.key_version {
            return Err(CryptoError::UnsupportedKeyVersion {
                version,
                supported: self.key_version,
            });
        }

        let nonce = BASE64
            .decode(nonce)
            .map_err(|e| CryptoError::InvalidFormat(e.to_string()))?;
        let ciphertext = BASE64
            .decode(ciphertext)
            .map_err(|e| CryptoError::InvalidFormat(e.to_string()))?;

        self.decrypt_raw(&nonce, &ciphertext)
    }
}

impl Encryptor for Aes256GcmEncryptor {
    fn seal(&self, plaintext: &[u8]) -> EncryptionResult<EncryptedPayload> {
        let (nonce, ciphertext) = self.encrypt_raw(plaintext)?;
        Ok(EncryptedPayload {
            ciphertext: BASE64.encode(ciphertext),
            iv: BASE64.encode(nonce),
        })
    }

    fn open(&self, payload: &EncryptedPayload) -> EncryptionResult<Vec<u8>> {
        let nonce = BASE64
            .decode(&payload.iv)
            .map_err(|e| CryptoError::InvalidFormat(e.to_string()))?;
        let ciphertext = BASE64
            .decode(&payload.ciphertext)
            .map_err(|e| CryptoError::InvalidFormat(e.to_string()))?;
        self.decrypt_raw(&nonce, &ciphertext)
    }

    fn algorithm(&self) -> &str {
        "AES-256-GCM"
    }
}
