//! Applies a [`WriteOp`] to the remote store and mirrors the result locally
//!
//! Shared by the online write path and the sync engine so both commit a
//! mutation the same way: temp ids are resolved first, updates are merged
//! with the remote record, and the cache only changes after the remote
//! call succeeded.

use crate::audit::{AuditLogEntry, EntityRef, RevertData};
use crate::error::{SyncError, SyncResult};
use crate::merge::Reconciler;
use crate::model::{InviteCode, Member, Record, RecordId, Section, UserRoleInfo};
use crate::queue::{PendingWriteQueue, WriteOp};
use crate::remote::RemoteApi;
use crate::secure_store::SecureStore;
use std::sync::Arc;

/// What a committed write produced
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    Done,
    /// The member as stored remotely after the write
    Member(Member),
}

#[derive(Clone)]
pub struct Dispatcher {
    remote: Arc<dyn RemoteApi>,
    store: SecureStore,
    queue: PendingWriteQueue,
    reconciler: Reconciler,
}

impl Dispatcher {
    pub fn new(remote: Arc<dyn RemoteApi>, store: SecureStore, queue: PendingWriteQueue) -> Self {
        Self {
            reconciler: Reconciler::new(remote.clone()),
            remote,
            store,
            queue,
        }
    }

    /// Commit a write remotely, then update the cache
    pub async fn apply(&self, op: &WriteOp) -> SyncResult<Applied> {
        match op {
            WriteOp::CreateMember { section, member } => self.create_member(*section, member).await,
            WriteOp::UpdateMember {
                section,
                member,
                cleared_dates,
            } => {
                let id = self.queue.resolve_id(&member.id).await?;
                let local = Member {
                    id: id.clone(),
                    ..member.clone()
                };
                let merged = self
                    .reconciler
                    .merge_update(&local, *section, cleared_dates)
                    .await?;

                let store = Member::store_name(*section);
                let row = self
                    .remote
                    .update(&store, id.as_str(), serde_json::to_value(&merged)?)
                    .await?
                    .ok_or_else(|| SyncError::NotFound(format!("{store} record {id}")))?;
                let updated: Member = serde_json::from_value(row)?;

                self.replace_member(*section, &member.id, &updated).await?;
                Ok(Applied::Member(updated))
            }
            WriteOp::DeleteMember { section, id } => {
                let resolved = self.queue.resolve_id(id).await?;
                self.remote
                    .delete(&Member::store_name(*section), resolved.as_str())
                    .await?;
                self.store.remove::<Member>(*section, resolved.as_str()).await?;
                if &resolved != id {
                    self.store.remove::<Member>(*section, id.as_str()).await?;
                }
                Ok(Applied::Done)
            }
            WriteOp::RecreateMember { section, member } => {
                let resolved = self.queue.resolve_id(&member.id).await?;
                if resolved.is_temporary() {
                    // Never reached the server; restoring it is a plain create
                    return self.create_member(*section, member).await;
                }

                let snapshot = Member {
                    id: resolved,
                    ..member.clone()
                };
                let row = self
                    .remote
                    .upsert(&Member::store_name(*section), serde_json::to_value(&snapshot)?)
                    .await?;
                let restored: Member = serde_json::from_value(row)?;

                self.replace_member(*section, &member.id, &restored).await?;
                Ok(Applied::Member(restored))
            }
            WriteOp::SetUserRole { user_id, info } => {
                self.remote.set_role(user_id, info.as_ref()).await?;
                self.cache_role(user_id, info.as_ref()).await?;
                Ok(Applied::Done)
            }
            WriteOp::CreateInviteCode { invite } => {
                self.remote
                    .insert(&InviteCode::store_name(invite.section), serde_json::to_value(invite)?)
                    .await?;
                self.store.write(invite.section, invite).await?;
                Ok(Applied::Done)
            }
            WriteOp::DeleteInviteCode { section, code } => {
                self.remote
                    .delete(&InviteCode::store_name(*section), code)
                    .await?;
                self.store.remove::<InviteCode>(*section, code).await?;
                Ok(Applied::Done)
            }
            WriteOp::AppendAuditLog { entry } => {
                let entry = self.resolve_entry(entry).await?;
                self.remote
                    .insert(
                        &AuditLogEntry::store_name(entry.section),
                        serde_json::to_value(&entry)?,
                    )
                    .await?;
                self.store.write(entry.section, &entry).await?;
                Ok(Applied::Done)
            }
        }
    }

    /// Optimistic cache update for a write that is about to be queued
    pub async fn apply_locally(&self, op: &WriteOp) -> SyncResult<()> {
        match op {
            WriteOp::CreateMember { section, member }
            | WriteOp::UpdateMember {
                section, member, ..
            }
            | WriteOp::RecreateMember { section, member } => {
                self.store.write(*section, member).await
            }
            WriteOp::DeleteMember { section, id } => {
                self.store.remove::<Member>(*section, id.as_str()).await
            }
            WriteOp::SetUserRole { user_id, info } => self.cache_role(user_id, info.as_ref()).await,
            WriteOp::CreateInviteCode { invite } => self.store.write(invite.section, invite).await,
            WriteOp::DeleteInviteCode { section, code } => {
                self.store.remove::<InviteCode>(*section, code).await
            }
            WriteOp::AppendAuditLog { entry } => self.store.write(entry.section, entry).await,
        }
    }

    /// Cache a write the remote store already holds
    ///
    /// Reached when a replayed write hits a unique constraint. A create whose
    /// first attempt landed is promoted exactly as if its response arrived.
    pub async fn settle_duplicate(&self, op: &WriteOp) -> SyncResult<()> {
        match op {
            WriteOp::CreateMember { section, member } if member.id.is_temporary() => {
                let created = Member {
                    id: member.id.promoted(),
                    ..member.clone()
                };
                self.queue.record_remap(&member.id, &created.id).await?;
                self.replace_member(*section, &member.id, &created).await
            }
            _ => self.apply_locally(op).await,
        }
    }

    async fn create_member(&self, section: Section, member: &Member) -> SyncResult<Applied> {
        let outgoing = Member {
            id: member.id.promoted(),
            ..member.clone()
        };
        let row = self
            .remote
            .insert(&Member::store_name(section), serde_json::to_value(&outgoing)?)
            .await?;
        let created: Member = serde_json::from_value(row)?;

        if member.id.is_temporary() {
            self.queue.record_remap(&member.id, &created.id).await?;
        }
        self.replace_member(section, &member.id, &created).await?;
        Ok(Applied::Member(created))
    }

    /// Store `member`, dropping the cache entry under `previous_id` if the id changed
    async fn replace_member(&self, section: Section, previous_id: &RecordId, member: &Member) -> SyncResult<()> {
        if previous_id != &member.id {
            self.store.remove::<Member>(section, previous_id.as_str()).await?;
        }
        self.store.write(section, member).await
    }

    async fn cache_role(&self, user_id: &str, info: Option<&UserRoleInfo>) -> SyncResult<()> {
        match info {
            Some(info) => self.store.db().put_role(user_id, info).await,
            None => self.store.db().delete_role(user_id).await,
        }
    }

    /// Replace promoted placeholders inside revert data
    async fn resolve_entry(&self, entry: &AuditLogEntry) -> SyncResult<AuditLogEntry> {
        let mut entry = entry.clone();
        match &mut entry.revert_data {
            RevertData::Created {
                entity: EntityRef::Member { id },
            } => {
                let resolved = self.queue.resolve_id(id).await?;
                *id = resolved;
            }
            RevertData::Updated { snapshot } | RevertData::Deleted { snapshot } => {
                let resolved = self.queue.resolve_id(&snapshot.id).await?;
                snapshot.id = resolved;
            }
            _ => {}
        }
        Ok(entry)
    }
}
