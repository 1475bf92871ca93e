// Configuration schema
use serde::{Deserialize, Serialize};

/// Complete configuration of a Rollcall client
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollcallConfig {
    pub store: StoreSettings,
    pub remote: RemoteSettings,
    pub sync: SyncSettings,
    pub crypto: CryptoSettings,
    pub events: EventSettings,
    pub logging: LoggingSettings,
}

/// Local SQLite cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub db_path: String,
    pub max_connections: u32,
    pub enable_wal: bool,
    /// Overwrite freed pages so deleted records do not linger on disk
    pub enable_secure_delete: bool,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            db_path: "rollcall_local.db".to_string(),
            max_connections: 5,
            enable_wal: true,
            enable_secure_delete: true,
        }
    }
}

/// Remote relational store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:54321".to_string(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

/// Pending-write draining
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Writes dispatched concurrently per batch
    pub batch_size: usize,
    /// Run a sync whenever connectivity comes back
    pub auto_sync: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_size: 5,
            auto_sync: true,
        }
    }
}

/// Device key-encryption key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoSettings {
    /// Base64 32-byte key; when absent `key_file` is used
    pub master_key: Option<String>,
    pub key_file: String,
}

impl Default for CryptoSettings {
    fn default() -> Self {
        Self {
            master_key: None,
            key_file: "rollcall_device.key".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventSettings {
    pub capacity: usize,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self { capacity: 64 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info,sqlx=warn".to_string(),
            json: false,
        }
    }
}
