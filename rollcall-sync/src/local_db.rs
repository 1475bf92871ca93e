//! Local SQLite database for offline-first operations
//!
//! Provides:
//! - Encrypted cache entries scoped per `(section, resource)` store
//! - Pending-write and dead-letter tables (see [`crate::queue`])
//! - Role cache, temp-id remaps and wrapped user keys

use crate::error::{SyncError, SyncResult};
use crate::model::{StoreName, UserRoleInfo};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use config_engine::StoreSettings;
use crypto::{CryptoError, CryptoResult, EncryptedPayload, KeyStore, StoredKey};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

/// Configuration for local database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalDbConfig {
    /// Path to the database file
    pub db_path: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Whether to enable WAL mode
    pub enable_wal: bool,
    /// Whether to enable secure deletion (overwrites freed pages)
    pub enable_secure_delete: bool,
}

impl Default for LocalDbConfig {
    fn default() -> Self {
        Self::from(&StoreSettings::default())
    }
}

impl From<&StoreSettings> for LocalDbConfig {
    fn from(settings: &StoreSettings) -> Self {
        Self {
            db_path: settings.db_path.clone(),
            max_connections: settings.max_connections,
            enable_wal: settings.enable_wal,
            enable_secure_delete: settings.enable_secure_delete,
        }
    }
}

/// One encrypted record as stored on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedEntry {
    pub id: String,
    pub payload: EncryptedPayload,
}

/// Local database handle
///
/// Cloning shares the underlying connection pool.
#[derive(Clone)]
pub struct LocalDatabase {
    pool: SqlitePool,
}

impl LocalDatabase {
    /// Open (creating if needed) the local database
    pub async fn new(config: LocalDbConfig) -> SyncResult<Self> {
        // Pragmas go on the connect options so every pooled connection gets them
        let mut options = SqliteConnectOptions::new()
            .filename(&config.db_path)
            .create_if_missing(true)
            .foreign_keys(true);

        if config.enable_wal {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        options = options.pragma(
            "secure_delete",
            if config.enable_secure_delete { "ON" } else { "OFF" },
        );

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.initialize_schema().await?;

        tracing::debug!(db_path = %config.db_path, "Opened local database");
        Ok(db)
    }

    /// Initialize database schema
    async fn initialize_schema(&self) -> SyncResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                store TEXT NOT NULL,
                id TEXT NOT NULL,
                ciphertext TEXT NOT NULL,
                iv TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (store, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pending_writes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL,
                temp_id TEXT,
                section TEXT,
                store TEXT,
                entity_key TEXT NOT NULL,
                queued_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_pending_writes_store ON pending_writes(store)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_pending_writes_entity ON pending_writes(entity_key)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS dead_letters (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                write TEXT NOT NULL,
                error TEXT NOT NULL,
                failed_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS role_cache (
                user_id TEXT PRIMARY KEY,
                role_info TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS id_remaps (
                temp_id TEXT PRIMARY KEY,
                server_id TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_keys (
                user_id TEXT PRIMARY KEY,
                wrapped_key TEXT NOT NULL,
                key_version INTEGER NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fetch one cached entry
    pub async fn get(&self, store: &StoreName, id: &str) -> SyncResult<Option<CachedEntry>> {
        let row = sqlx::query("SELECT id, ciphertext, iv FROM cache_entries WHERE store = ? AND id = ?")
            .bind(store.as_str())
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| entry_from_row(&row)).transpose()
    }

    /// All entries of a store, ordered by id
    pub async fn get_all(&self, store: &StoreName) -> SyncResult<Vec<CachedEntry>> {
        let rows = sqlx::query("SELECT id, ciphertext, iv FROM cache_entries WHERE store = ? ORDER BY id")
            .bind(store.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(entry_from_row).collect()
    }

    /// Insert or overwrite one entry
    pub async fn put(&self, store: &StoreName, entry: &CachedEntry) -> SyncResult<()> {
        sqlx::query(
            r#"
            INSERT INTO cache_entries (store, id, ciphertext, iv, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(store, id) DO UPDATE SET
                ciphertext = excluded.ciphertext,
                iv = excluded.iv,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(store.as_str())
        .bind(&entry.id)
        .bind(&entry.payload.ciphertext)
        .bind(&entry.payload.iv)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Replace the whole content of a store in one transaction
    pub async fn put_all(&self, store: &StoreName, entries: &[CachedEntry]) -> SyncResult<()> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now().to_rfc3339();

        sqlx::query("DELETE FROM cache_entries WHERE store = ?")
            .bind(store.as_str())
            .execute(&mut *tx)
            .await?;

        for entry in entries {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO cache_entries (store, id, ciphertext, iv, updated_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(store.as_str())
            .bind(&entry.id)
            .bind(&entry.payload.ciphertext)
            .bind(&entry.payload.iv)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::debug!(store = %store, count = entries.len(), "Replaced cached store");
        Ok(())
    }

    pub async fn delete(&self, store: &StoreName, id: &str) -> SyncResult<()> {
        sqlx::query("DELETE FROM cache_entries WHERE store = ? AND id = ?")
            .bind(store.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn clear(&self, store: &StoreName) -> SyncResult<()> {
        sqlx::query("DELETE FROM cache_entries WHERE store = ?")
            .bind(store.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Drop every cached record of every store
    pub async fn clear_cache(&self) -> SyncResult<()> {
        sqlx::query("DELETE FROM cache_entries")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_role(&self, user_id: &str) -> SyncResult<Option<UserRoleInfo>> {
        let row = sqlx::query("SELECT role_info FROM role_cache WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let raw: String = row.try_get("role_info")?;
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => Ok(None),
        }
    }

    pub async fn put_role(&self, user_id: &str, info: &UserRoleInfo) -> SyncResult<()> {
        sqlx::query(
            r#"
            INSERT INTO role_cache (user_id, role_info, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                role_info = excluded.role_info,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(serde_json::to_string(info)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_role(&self, user_id: &str) -> SyncResult<()> {
        sqlx::query("DELETE FROM role_cache WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Get database pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Vacuum the database so secure-deleted pages are reclaimed
    pub async fn vacuum(&self) -> SyncResult<()> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }

    /// Close database connection
    pub async fn close(self) -> SyncResult<()> {
        self.pool.close().await;
        Ok(())
    }
}

fn entry_from_row(row: &sqlx::sqlite::SqliteRow) -> SyncResult<CachedEntry> {
    Ok(CachedEntry {
        id: row.try_get("id")?,
        payload: EncryptedPayload {
            ciphertext: row.try_get("ciphertext")?,
            iv: row.try_get("iv")?,
        },
    })
}

pub(crate) fn parse_timestamp(raw: &str) -> SyncResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| SyncError::Internal(format!("Invalid timestamp: {e}")))
}

fn key_store_error(err: impl std::fmt::Display) -> CryptoError {
    CryptoError::KeyStore(err.to_string())
}

#[async_trait]
impl KeyStore for LocalDatabase {
    async fn load_key(&self, user_id: &str) -> CryptoResult<Option<StoredKey>> {
        let row = sqlx::query(
            "SELECT user_id, wrapped_key, key_version, created_at FROM user_keys WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(key_store_error)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let key_version: i64 = row.try_get("key_version").map_err(key_store_error)?;
        let created_at: String = row.try_get("created_at").map_err(key_store_error)?;
        Ok(Some(StoredKey {
            user_id: row.try_get("user_id").map_err(key_store_error)?,
            wrapped_key: row.try_get("wrapped_key").map_err(key_store_error)?,
            key_version: u32::try_from(key_version).map_err(key_store_error)?,
            created_at: parse_timestamp(&created_at).map_err(key_store_error)?,
        }))
    }

    async fn insert_key_if_absent(&self, key: StoredKey) -> CryptoResult<StoredKey> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO user_keys (user_id, wrapped_key, key_version, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&key.user_id)
        .bind(&key.wrapped_key)
        .bind(i64::from(key.key_version))
        .bind(key.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(key_store_error)?;

        self.load_key(&key.user_id)
            .await?
            .ok_or_else(|| CryptoError::KeyStore("Key vanished after insert".to_string()))
    }

    async fn delete_key(&self, user_id: &str) -> CryptoResult<()> {
        sqlx::query("DELETE FROM user_keys WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(key_store_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ResourceKind, Role, Section};
    use tempfile::TempDir;

    async fn create_test_db(secure_delete: bool) -> (TempDir, LocalDatabase) {
        let dir = TempDir::new().unwrap();
        let config = LocalDbConfig {
            db_path: dir.path().join("cache.db").to_str().unwrap().to_string(),
            max_connections: 5,
            enable_wal: true,
            enable_secure_delete: secure_delete,
        };

        let db = LocalDatabase::new(config).await.unwrap();
        (dir, db)
    }

    fn entry(id: &str, ciphertext: &str) -> CachedEntry {
        CachedEntry {
            id: id.to_string(),
            payload: EncryptedPayload {
                ciphertext: ciphertext.to_string(),
                iv: "aXY=".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let (_dir, db) = create_test_db(true).await;
        let store = StoreName::new(Section::Company, ResourceKind::Members);

        db.put(&store, &entry("m1", "one")).await.unwrap();
        db.put(&store, &entry("m1", "two")).await.unwrap();

        let fetched = db.get(&store, "m1").await.unwrap().unwrap();
        assert_eq!(fetched.payload.ciphertext, "two");

        db.delete(&store, "m1").await.unwrap();
        assert!(db.get(&store, "m1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stores_are_isolated_per_section() {
        let (_dir, db) = create_test_db(true).await;
        let company = StoreName::new(Section::Company, ResourceKind::Members);
        let junior = StoreName::new(Section::Junior, ResourceKind::Members);

        db.put(&company, &entry("m1", "company")).await.unwrap();
        db.put(&junior, &entry("m1", "junior")).await.unwrap();
        db.clear(&company).await.unwrap();

        assert!(db.get_all(&company).await.unwrap().is_empty());
        assert_eq!(db.get_all(&junior).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_put_all_replaces_store() {
        let (_dir, db) = create_test_db(true).await;
        let store = StoreName::new(Section::Junior, ResourceKind::AuditLogs);

        db.put(&store, &entry("stale", "x")).await.unwrap();
        db.put_all(&store, &[entry("b", "2"), entry("a", "1")]).await.unwrap();

        let ids: Vec<String> = db.get_all(&store).await.unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_role_cache() {
        let (_dir, db) = create_test_db(true).await;
        let info = UserRoleInfo::new(Role::Captain, vec![Section::Junior]);

        assert!(db.get_role("u1").await.unwrap().is_none());
        db.put_role("u1", &info).await.unwrap();
        assert_eq!(db.get_role("u1").await.unwrap(), Some(info));

        db.delete_role("u1").await.unwrap();
        assert!(db.get_role("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_key_store_keeps_first_key() {
        let (_dir, db) = create_test_db(true).await;
        let first = StoredKey {
            user_id: "u1".to_string(),
            wrapped_key: "v1:first".to_string(),
            key_version: 1,
            created_at: Utc::now(),
        };
        let second = StoredKey {
            wrapped_key: "v1:second".to_string(),
            ..first.clone()
        };

        db.insert_key_if_absent(first).await.unwrap();
        let stored = db.insert_key_if_absent(second).await.unwrap();
        assert_eq!(stored.wrapped_key, "v1:first");

        db.delete_key("u1").await.unwrap();
        assert!(db.load_key("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_secure_delete_enabled() {
        let (_dir, db) = create_test_db(true).await;

        let row = sqlx::query("PRAGMA secure_delete")
            .fetch_one(db.pool())
            .await
            .unwrap();

        let secure_delete: i64 = row.try_get(0).unwrap();
        assert_eq!(secure_delete, 1, "secure_delete should be enabled");
    }

    #[tokio::test]
    async fn test_secure_delete_disabled() {
        let (_dir, db) = create_test_db(false).await;

        let row = sqlx::query("PRAGMA secure_delete")
            .fetch_one(db.pool())
            .await
            .unwrap();

        let secure_delete: i64 = row.try_get(0).unwrap();
        assert_eq!(secure_delete, 0, "secure_delete should be disabled");
    }

    #[tokio::test]
    async fn test_vacuum_after_clear() {
        let (_dir, db) = create_test_db(true).await;
        let store = StoreName::new(Section::Company, ResourceKind::InviteCodes);

        for i in 0..10 {
            db.put(&store, &entry(&format!("code{i}"), "x")).await.unwrap();
        }
        db.clear_cache().await.unwrap();
        db.vacuum().await.unwrap();
        assert!(db.get_all(&store).await.unwrap().is_empty());
    }
}
