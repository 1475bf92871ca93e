//! Error types for the sync core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unique violation: {0}")]
    UniqueViolation(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Remote rejected request ({status}): {message}")]
    Remote { status: u16, message: String },

    #[error("Encryption error: {0}")]
    Crypto(#[from] crypto::CryptoError),

    #[error("Configuration error: {0}")]
    Config(#[from] config_engine::ConfigError),

    #[error("Event bus error: {0}")]
    Events(#[from] events_bus::EventBusError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// How the sync engine reacts to a failed write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transport failure; the write stays queued and the run halts
    Network,
    /// The write is already reflected remotely
    UniqueViolation,
    Validation,
    Decryption,
    /// Surfaced to the user, never retried
    Permission,
    /// Anything else; the write is dead-lettered
    Fatal,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Network => "network",
            ErrorClass::UniqueViolation => "unique_violation",
            ErrorClass::Validation => "validation",
            ErrorClass::Decryption => "decryption",
            ErrorClass::Permission => "permission",
            ErrorClass::Fatal => "fatal",
        }
    }
}

impl SyncError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SyncError::Network(_) => ErrorClass::Network,
            SyncError::UniqueViolation(_) => ErrorClass::UniqueViolation,
            SyncError::Validation(_) => ErrorClass::Validation,
            SyncError::Decryption(_) => ErrorClass::Decryption,
            SyncError::Permission(_) => ErrorClass::Permission,
            _ => ErrorClass::Fatal,
        }
    }

    pub fn is_network(&self) -> bool {
        self.class() == ErrorClass::Network
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
