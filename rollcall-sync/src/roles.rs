//! Cache-first role lookups
//!
//! Roles are cached in clear next to the encrypted stores so the UI can gate
//! screens before the user key is even unwrapped. Role changes go through the
//! write path and are audited by the caller.

use crate::error::SyncResult;
use crate::local_db::LocalDatabase;
use crate::model::UserRoleInfo;
use crate::network::NetworkMonitor;
use crate::queue::{PendingWriteQueue, WriteOp};
use crate::remote::RemoteApi;
use events_bus::{Event, EventBus};
use std::sync::Arc;

#[derive(Clone)]
pub struct RoleService {
    db: LocalDatabase,
    queue: PendingWriteQueue,
    remote: Arc<dyn RemoteApi>,
    network: NetworkMonitor,
    events: EventBus,
}

impl RoleService {
    pub fn new(
        db: LocalDatabase,
        queue: PendingWriteQueue,
        remote: Arc<dyn RemoteApi>,
        network: NetworkMonitor,
        events: EventBus,
    ) -> Self {
        Self {
            db,
            queue,
            remote,
            network,
            events,
        }
    }

    /// Cached role, refreshed in the background when online
    pub async fn get_role(&self, user_id: &str) -> SyncResult<Option<UserRoleInfo>> {
        let cached = self.db.get_role(user_id).await?;
        if !self.network.is_online() {
            return Ok(cached);
        }

        if cached.is_none() {
            return match self.refresh_role(user_id).await {
                Ok(_) => self.db.get_role(user_id).await,
                Err(e) if e.is_network() => Ok(None),
                Err(e) => Err(e),
            };
        }

        let service = self.clone();
        let user_id = user_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = service.refresh_role(&user_id).await {
                tracing::warn!(error = %e, "Background role refresh failed");
            }
        });
        Ok(cached)
    }

    /// Fetch the remote role; returns whether the cached one changed
    ///
    /// Skipped while a role change for `user_id` is still queued, so the
    /// optimistic local role survives until the change syncs.
    pub async fn refresh_role(&self, user_id: &str) -> SyncResult<bool> {
        if self
            .queue
            .has_pending_for_entity(&WriteOp::role_entity_key(user_id))
            .await?
        {
            tracing::debug!("Role change pending, skipping refresh");
            return Ok(false);
        }

        let fresh = self
            .remote
            .fetch_role(user_id)
            .await?
            .map(|info| UserRoleInfo::new(info.role, info.sections));
        let cached = self.db.get_role(user_id).await?;

        if fresh == cached {
            return Ok(false);
        }

        match &fresh {
            Some(info) => self.db.put_role(user_id, info).await?,
            None => self.db.delete_role(user_id).await?,
        }
        self.events.publish(Event::role_refreshed(user_id));

        tracing::debug!(role = ?fresh.as_ref().map(|info| info.role.as_str()), "Role refreshed");
        Ok(true)
    }
}
