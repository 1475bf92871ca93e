//! Device key-encryption key (KEK) configuration
//!
//! The KEK comes from configuration when the host provides one, otherwise
//! from a key file created on first start with owner-only permissions.

use crate::aes_gcm::Aes256GcmEncryptor;
use crate::envelope::KeyWrapper;
use crate::error::{CryptoError, CryptoResult};
use base64::{engine::general_purpose, Engine as _};
use std::fs;
use std::path::{Path, PathBuf};

/// Placeholder shipped in sample configuration files
const PLACEHOLDER_KEY: &str = "CHANGE_ME_generate_with_openssl_rand_base64_32";

/// Where the device KEK comes from
#[derive(Debug, Clone)]
pub struct CryptoConfig {
    /// Base64-encoded 32-byte KEK supplied by the host
    pub master_key: Option<String>,

    /// Key file used when no master key is supplied
    pub key_file: PathBuf,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            master_key: None,
            key_file: PathBuf::from("rollcall_device.key"),
        }
    }
}

impl CryptoConfig {
    /// Build the key wrapper for this device
    pub fn load_key_wrapper(&self) -> CryptoResult<KeyWrapper> {
        match self.master_key.as_deref() {
            Some(key) if !key.trim().is_empty() && key != PLACEHOLDER_KEY => {
                KeyWrapper::from_base64_kek(key)
            }
            _ => {
                let kek = load_or_create_key_file(&self.key_file)?;
                KeyWrapper::from_base64_kek(&kek)
            }
        }
    }
}

fn load_or_create_key_file(path: &Path) -> CryptoResult<String> {
    if path.exists() {
        return fs::read_to_string(path)
            .map(|contents| contents.trim().to_string())
            .map_err(|e| CryptoError::Configuration(format!("Failed to read key file: {e}")));
    }

    let encoded = general_purpose::STANDARD.encode(Aes256GcmEncryptor::generate_key());
    write_private_file(path, &encoded)?;
    tracing::info!(key_file = %path.display(), "Generated device key file");
    Ok(encoded)
}

fn write_private_file(path: &Path, contents: &str) -> CryptoResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| CryptoError::Configuration(format!("Failed to create key directory: {e}")))?;
    }

    fs::write(path, contents)
        .map_err(|e| CryptoError::Configuration(format!("Failed to write key file: {e}")))?;

    // 0600: read/write for owner only
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .map_err(|e| CryptoError::Configuration(format!("Failed to set key file permissions: {e}")))?;
    }

    Ok(())
}
