//! Crypto provider for the Rollcall offline cache
//!
//! - AES-256-GCM sealing of arbitrary JSON payloads into `{ciphertext, iv}`
//! - Stable per-user data keys, wrapped by a device key-encryption key
//! - Key store abstraction so the host decides where wrapped keys live
//!
//! # Example
//!
//! ```rust
//! use crypto::{encrypt_json, decrypt_json, KeyProvider, KeyWrapper, MemoryKeyStore, Aes256GcmEncryptor};
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), crypto::CryptoError> {
//! let wrapper = KeyWrapper::new(Aes256GcmEncryptor::generate_key())?;
//! let provider = KeyProvider::new(Arc::new(MemoryKeyStore::new()), wrapper);
//!
//! let key = provider.get_or_create_key("user-123").await?;
//! let payload = encrypt_json(&serde_json::json!({"name": "Sam"}), &key)?;
//! let value: serde_json::Value = decrypt_json(&payload, &key)?;
//! # Ok(())
//! # }
//! ```

pub mod aes_gcm;
pub mod config;
pub mod encryption;
pub mod envelope;
pub mod error;
pub mod keys;

pub use aes_gcm::Aes256GcmEncryptor;
pub use config::CryptoConfig;
pub use encryption::{decrypt_json, encrypt_json, EncryptedPayload, EncryptionResult, Encryptor};
pub use envelope::KeyWrapper;
pub use error::{CryptoError, CryptoResult};
pub use keys::{KeyHandle, KeyProvider, KeyStore, MemoryKeyStore, StoredKey, CURRENT_KEY_VERSION};
