//! Encrypted, typed access to the local cache
//!
//! Every record is sealed with the signed-in user's key before it touches
//! disk. A record that fails to decrypt (stale key, corruption) is skipped
//! with a warning so one bad row never hides the rest of a store.

use crate::error::SyncResult;
use crate::local_db::{CachedEntry, LocalDatabase};
use crate::model::{Record, Section};
use crypto::{decrypt_json, encrypt_json, KeyHandle};

#[derive(Clone)]
pub struct SecureStore {
    db: LocalDatabase,
    key: KeyHandle,
}

impl SecureStore {
    pub fn new(db: LocalDatabase, key: KeyHandle) -> Self {
        Self { db, key }
    }

    pub fn db(&self) -> &LocalDatabase {
        &self.db
    }

    fn seal<T: Record>(&self, record: &T) -> SyncResult<CachedEntry> {
        Ok(CachedEntry {
            id: record.record_id(),
            payload: encrypt_json(record, &self.key)?,
        })
    }

    fn open<T: Record>(&self, section: Section, entry: &CachedEntry) -> Option<T> {
        match decrypt_json(&entry.payload, &self.key) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(
                    store = %T::store_name(section),
                    id = %entry.id,
                    error = %e,
                    "Skipping cached record that failed to decrypt"
                );
                None
            }
        }
    }

    pub async fn read<T: Record>(&self, section: Section, id: &str) -> SyncResult<Option<T>> {
        let entry = self.db.get(&T::store_name(section), id).await?;
        Ok(entry.and_then(|entry| self.open(section, &entry)))
    }

    /// Every readable record of the store, ordered by id
    pub async fn read_all<T: Record>(&self, section: Section) -> SyncResult<Vec<T>> {
        let entries = self.db.get_all(&T::store_name(section)).await?;
        Ok(entries
            .iter()
            .filter_map(|entry| self.open(section, entry))
            .collect())
    }

    pub async fn write<T: Record>(&self, section: Section, record: &T) -> SyncResult<()> {
        let entry = self.seal(record)?;
        self.db.put(&T::store_name(section), &entry).await
    }

    /// Replace the store's content with `records`
    pub async fn replace_all<T: Record>(&self, section: Section, records: &[T]) -> SyncResult<()> {
        let entries = records
            .iter()
            .map(|record| self.seal(record))
            .collect::<SyncResult<Vec<_>>>()?;
        self.db.put_all(&T::store_name(section), &entries).await
    }

    pub async fn remove<T: Record>(&self, section: Section, id: &str) -> SyncResult<()> {
        self.db.delete(&T::store_name(section), id).await
    }

    pub async fn clear<T: Record>(&self, section: Section) -> SyncResult<()> {
        self.db.clear(&T::store_name(section)).await
    }
}
