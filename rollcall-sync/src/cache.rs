//! Cache-first reads
//!
//! Reads are answered from the encrypted cache straight away. When online, a
//! background refresh fetches the authoritative set and rewrites the cache
//! only if the canonical content differs, publishing one change notification
//! per genuine change.

use crate::canonical::same_content;
use crate::error::SyncResult;
use crate::model::{Record, ResourceKind, Section};
use crate::network::NetworkMonitor;
use crate::queue::PendingWriteQueue;
use crate::remote::RemoteApi;
use crate::secure_store::SecureStore;
use events_bus::{Event, EventBus};
use std::sync::Arc;
use tokio::task::JoinHandle;

#[derive(Clone)]
pub struct CacheFirstReader {
    store: SecureStore,
    queue: PendingWriteQueue,
    remote: Arc<dyn RemoteApi>,
    network: NetworkMonitor,
    events: EventBus,
}

impl CacheFirstReader {
    pub fn new(
        store: SecureStore,
        queue: PendingWriteQueue,
        remote: Arc<dyn RemoteApi>,
        network: NetworkMonitor,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            queue,
            remote,
            network,
            events,
        }
    }

    /// Cached records now, refreshed in the background when online
    ///
    /// An empty cache while online waits for the refresh instead.
    pub async fn read<T: Record>(&self, section: Section) -> SyncResult<Vec<T>> {
        let cached: Vec<T> = self.store.read_all(section).await?;

        if !self.network.is_online() {
            return Ok(cached);
        }

        if cached.is_empty() {
            return match self.refresh::<T>(section).await {
                Ok(_) => self.store.read_all(section).await,
                Err(e) if e.is_network() => {
                    tracing::warn!(store = %T::store_name(section), error = %e, "Refresh failed, serving empty cache");
                    Ok(cached)
                }
                Err(e) => Err(e),
            };
        }

        // Handle dropped on purpose; refresh failures are logged by the task
        let _ = self.spawn_refresh::<T>(section);
        Ok(cached)
    }

    /// Refresh in a background task
    pub fn spawn_refresh<T: Record>(&self, section: Section) -> JoinHandle<bool> {
        let reader = self.clone();
        tokio::spawn(async move {
            match reader.refresh::<T>(section).await {
                Ok(changed) => changed,
                Err(e) => {
                    tracing::warn!(store = %T::store_name(section), error = %e, "Background refresh failed");
                    false
                }
            }
        })
    }

    /// Fetch the authoritative set; returns whether the cache changed
    pub async fn refresh<T: Record>(&self, section: Section) -> SyncResult<bool> {
        let store = T::store_name(section);

        // Replacing the store now would drop optimistic local changes
        if self.queue.has_pending_for_store(&store).await? {
            tracing::debug!(store = %store, "Pending writes, deferring refresh");
            return Ok(false);
        }

        let before: Vec<T> = self.store.read_all(section).await?;
        let rows = self.remote.select_all(&store).await?;
        let fresh: Vec<T> = rows
            .into_iter()
            .filter_map(|row| match serde_json::from_value(row) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!(store = %store, error = %e, "Skipping unreadable remote row");
                    None
                }
            })
            .collect();

        let cached: Vec<T> = self.store.read_all(section).await?;
        if !same_content(&before, &cached)? {
            // A local write landed while the fetch was in flight
            tracing::debug!(store = %store, "Cache changed during refresh, skipping");
            return Ok(false);
        }
        if same_content(&fresh, &cached)? {
            tracing::debug!(store = %store, count = fresh.len(), "Cache already current");
            return Ok(false);
        }

        self.store.replace_all(section, &fresh).await?;

        let event = match T::KIND {
            ResourceKind::AuditLogs => Event::logs_refreshed(section.as_str()),
            kind => Event::data_refreshed(section.as_str(), kind.as_str()),
        };
        self.events.publish(event);

        tracing::debug!(store = %store, count = fresh.len(), "Cache refreshed");
        Ok(true)
    }
}
