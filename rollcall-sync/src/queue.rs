//! Durable pending-write queue
//!
//! Mutations made while offline (or whose online commit hit a transport
//! failure) are appended here in FIFO order and drained by the sync engine.
//! Writes are never edited in place: they leave the queue by being applied,
//! recognised as already applied, rejected, or moved to the dead-letter
//! table.

use crate::audit::{AuditLogEntry, EntityRef, RevertData};
use crate::error::{SyncError, SyncResult};
use crate::local_db::{parse_timestamp, LocalDatabase};
use crate::model::{InviteCode, Member, Record, RecordId, Section, StoreName, UserRoleInfo};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::Row;
use std::collections::BTreeSet;

/// A queued mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum WriteOp {
    CreateMember {
        section: Section,
        member: Member,
    },
    UpdateMember {
        section: Section,
        member: Member,
        /// Dates whose marks this write removed
        #[serde(default)]
        cleared_dates: BTreeSet<NaiveDate>,
    },
    DeleteMember {
        section: Section,
        id: RecordId,
    },
    /// Upsert a full snapshot, used to restore deleted or overwritten members
    RecreateMember {
        section: Section,
        member: Member,
    },
    SetUserRole {
        user_id: String,
        info: Option<UserRoleInfo>,
    },
    CreateInviteCode {
        invite: InviteCode,
    },
    DeleteInviteCode {
        section: Section,
        code: String,
    },
    AppendAuditLog {
        entry: AuditLogEntry,
    },
}

impl WriteOp {
    pub fn kind(&self) -> &'static str {
        match self {
            WriteOp::CreateMember { .. } => "create_member",
            WriteOp::UpdateMember { .. } => "update_member",
            WriteOp::DeleteMember { .. } => "delete_member",
            WriteOp::RecreateMember { .. } => "recreate_member",
            WriteOp::SetUserRole { .. } => "set_user_role",
            WriteOp::CreateInviteCode { .. } => "create_invite_code",
            WriteOp::DeleteInviteCode { .. } => "delete_invite_code",
            WriteOp::AppendAuditLog { .. } => "append_audit_log",
        }
    }

    pub fn section(&self) -> Option<Section> {
        match self {
            WriteOp::CreateMember { section, .. }
            | WriteOp::UpdateMember { section, .. }
            | WriteOp::DeleteMember { section, .. }
            | WriteOp::RecreateMember { section, .. }
            | WriteOp::DeleteInviteCode { section, .. } => Some(*section),
            WriteOp::CreateInviteCode { invite } => Some(invite.section),
            WriteOp::AppendAuditLog { entry } => Some(entry.section),
            WriteOp::SetUserRole { .. } => None,
        }
    }

    /// Cache store the write touches; role writes go to the role cache
    pub fn store(&self) -> Option<StoreName> {
        match self {
            WriteOp::CreateMember { section, .. }
            | WriteOp::UpdateMember { section, .. }
            | WriteOp::DeleteMember { section, .. }
            | WriteOp::RecreateMember { section, .. } => Some(Member::store_name(*section)),
            WriteOp::CreateInviteCode { invite } => Some(InviteCode::store_name(invite.section)),
            WriteOp::DeleteInviteCode { section, .. } => Some(InviteCode::store_name(*section)),
            WriteOp::AppendAuditLog { entry } => Some(AuditLogEntry::store_name(entry.section)),
            WriteOp::SetUserRole { .. } => None,
        }
    }

    /// Placeholder id a create introduces
    pub fn temp_id(&self) -> Option<RecordId> {
        match self {
            WriteOp::CreateMember { member, .. } if member.id.is_temporary() => {
                Some(member.id.clone())
            }
            _ => None,
        }
    }

    /// Identity of the record the write targets; writes sharing a key keep
    /// their relative order during sync
    pub fn entity_key(&self) -> String {
        let target = match self {
            WriteOp::CreateMember { member, .. }
            | WriteOp::UpdateMember { member, .. }
            | WriteOp::RecreateMember { member, .. } => member.id.to_string(),
            WriteOp::DeleteMember { id, .. } => id.to_string(),
            WriteOp::CreateInviteCode { invite } => invite.code.clone(),
            WriteOp::DeleteInviteCode { code, .. } => code.clone(),
            WriteOp::AppendAuditLog { entry } => entry.id.to_string(),
            WriteOp::SetUserRole { user_id, .. } => return Self::role_entity_key(user_id),
        };
        match self.store() {
            Some(store) => format!("{store}:{target}"),
            None => target,
        }
    }

    pub fn role_entity_key(user_id: &str) -> String {
        format!("role:{user_id}")
    }

    /// Entity key of another record this write refers to
    ///
    /// An audit entry naming a member must not be appended in the same batch
    /// as the create that promotes that member's placeholder id.
    pub fn depends_on(&self) -> Option<String> {
        let WriteOp::AppendAuditLog { entry } = self else {
            return None;
        };
        let id = match &entry.revert_data {
            RevertData::Created {
                entity: EntityRef::Member { id },
            } => id,
            RevertData::Updated { snapshot } | RevertData::Deleted { snapshot } => &snapshot.id,
            _ => return None,
        };
        Some(format!("{}:{id}", Member::store_name(entry.section)))
    }

    /// Reject writes that must never be committed or queued
    pub fn validate(&self) -> SyncResult<()> {
        match self {
            WriteOp::CreateMember { section, member }
            | WriteOp::UpdateMember {
                section, member, ..
            }
            | WriteOp::RecreateMember { section, member } => member.validate(*section),
            WriteOp::DeleteMember { id, .. } if id.as_str().is_empty() => {
                Err(SyncError::Validation("Member id is required".to_string()))
            }
            WriteOp::SetUserRole { user_id, .. } if user_id.trim().is_empty() => {
                Err(SyncError::Validation("User id is required".to_string()))
            }
            WriteOp::CreateInviteCode { invite } if invite.code.trim().is_empty() => {
                Err(SyncError::Validation("Invite code is required".to_string()))
            }
            WriteOp::DeleteInviteCode { code, .. } if code.trim().is_empty() => {
                Err(SyncError::Validation("Invite code is required".to_string()))
            }
            _ => Ok(()),
        }
    }
}

/// A mutation waiting for remote confirmation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingWrite {
    pub id: i64,
    #[serde(flatten)]
    pub op: WriteOp,
    pub temp_id: Option<RecordId>,
    pub section: Option<Section>,
    pub queued_at: DateTime<Utc>,
}

/// A `pending_writes` row and its parse result
struct StoredWrite {
    id: i64,
    kind: String,
    payload: String,
    parsed: SyncResult<PendingWrite>,
}

/// A write that failed permanently
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub id: i64,
    /// The pending write as it was queued
    pub write: Value,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn pending_write(&self) -> Option<PendingWrite> {
        serde_json::from_value(self.write.clone()).ok()
    }
}

#[derive(Clone)]
pub struct PendingWriteQueue {
    db: LocalDatabase,
}

impl PendingWriteQueue {
    pub fn new(db: LocalDatabase) -> Self {
        Self { db }
    }

    /// Append a write to the end of the queue
    pub async fn enqueue(&self, op: WriteOp) -> SyncResult<PendingWrite> {
        let queued_at = Utc::now();
        let temp_id = op.temp_id();
        let section = op.section();

        let result = sqlx::query(
            r#"
            INSERT INTO pending_writes (kind, payload, temp_id, section, store, entity_key, queued_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(op.kind())
        .bind(serde_json::to_string(&op)?)
        .bind(temp_id.as_ref().map(RecordId::as_str))
        .bind(section.map(|s| s.as_str()))
        .bind(op.store().map(|s| s.to_string()))
        .bind(op.entity_key())
        .bind(queued_at.to_rfc3339())
        .execute(self.db.pool())
        .await?;

        let write = PendingWrite {
            id: result.last_insert_rowid(),
            op,
            temp_id,
            section,
            queued_at,
        };

        tracing::debug!(write_id = write.id, kind = write.op.kind(), "Queued pending write");
        Ok(write)
    }

    /// Every queued write in FIFO order
    ///
    /// Rows that no longer parse are moved to the dead-letter table.
    pub async fn drain_all(&self) -> SyncResult<Vec<PendingWrite>> {
        let mut writes = Vec::new();
        for row in self.load().await? {
            match row.parsed {
                Ok(write) => writes.push(write),
                Err(e) => {
                    tracing::error!(write_id = row.id, kind = %row.kind, error = %e, "Unreadable pending write");
                    let raw = serde_json::json!({ "id": row.id, "type": row.kind, "payload": row.payload });
                    self.dead_letter_raw(row.id, raw, &e.to_string()).await?;
                }
            }
        }
        Ok(writes)
    }

    /// Queued writes in FIFO order, without touching the queue
    ///
    /// Unreadable rows are left in place for the next sync to dead-letter.
    pub async fn list(&self) -> SyncResult<Vec<PendingWrite>> {
        Ok(self
            .load()
            .await?
            .into_iter()
            .filter_map(|row| row.parsed.ok())
            .collect())
    }

    async fn load(&self) -> SyncResult<Vec<StoredWrite>> {
        let rows = sqlx::query(
            r#"
            SELECT id, kind, payload, temp_id, section, queued_at
            FROM pending_writes
            ORDER BY id ASC
            "#,
        )
        .fetch_all(self.db.pool())
        .await?;

        let mut stored = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get("id")?;
            let kind: String = row.try_get("kind")?;
            let payload: String = row.try_get("payload")?;
            let queued_at: String = row.try_get("queued_at")?;
            let temp_id: Option<String> = row.try_get("temp_id")?;
            let section: Option<String> = row.try_get("section")?;

            let parsed = serde_json::from_str::<WriteOp>(&payload)
                .map_err(SyncError::from)
                .and_then(|op| {
                    Ok(PendingWrite {
                        id,
                        op,
                        temp_id: temp_id.map(RecordId::from),
                        section: section.as_deref().map(str::parse).transpose()?,
                        queued_at: parse_timestamp(&queued_at)?,
                    })
                });

            stored.push(StoredWrite {
                id,
                kind,
                payload,
                parsed,
            });
        }
        Ok(stored)
    }

    /// Remove one resolved write
    pub async fn remove(&self, id: i64) -> SyncResult<()> {
        sqlx::query("DELETE FROM pending_writes WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    pub async fn clear_all(&self) -> SyncResult<()> {
        sqlx::query("DELETE FROM pending_writes")
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    pub async fn len(&self) -> SyncResult<usize> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM pending_writes")
            .fetch_one(self.db.pool())
            .await?;
        let count: i64 = row.try_get("count")?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    pub async fn is_empty(&self) -> SyncResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Whether writes against this cache store are still waiting
    pub async fn has_pending_for_store(&self, store: &StoreName) -> SyncResult<bool> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM pending_writes WHERE store = ?) AS pending")
            .bind(store.as_str())
            .fetch_one(self.db.pool())
            .await?;
        let pending: i64 = row.try_get("pending")?;
        Ok(pending != 0)
    }

    /// Whether writes against this record are still waiting
    pub async fn has_pending_for_entity(&self, entity_key: &str) -> SyncResult<bool> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM pending_writes WHERE entity_key = ?) AS pending")
            .bind(entity_key)
            .fetch_one(self.db.pool())
            .await?;
        let pending: i64 = row.try_get("pending")?;
        Ok(pending != 0)
    }

    /// Move a write to the dead-letter table
    pub async fn move_to_dead_letter(&self, write: &PendingWrite, reason: &str) -> SyncResult<()> {
        self.dead_letter_raw(write.id, serde_json::to_value(write)?, reason).await?;
        tracing::error!(write_id = write.id, kind = write.op.kind(), reason, "Dead-lettered pending write");
        Ok(())
    }

    async fn dead_letter_raw(&self, write_id: i64, write: Value, reason: &str) -> SyncResult<()> {
        let mut tx = self.db.pool().begin().await?;

        sqlx::query("INSERT INTO dead_letters (write, error, failed_at) VALUES (?, ?, ?)")
            .bind(write.to_string())
            .bind(reason)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM pending_writes WHERE id = ?")
            .bind(write_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn dead_letters(&self) -> SyncResult<Vec<DeadLetter>> {
        let rows = sqlx::query("SELECT id, write, error, failed_at FROM dead_letters ORDER BY id ASC")
            .fetch_all(self.db.pool())
            .await?;

        rows.iter()
            .map(|row| {
                let write: String = row.try_get("write")?;
                let failed_at: String = row.try_get("failed_at")?;
                Ok(DeadLetter {
                    id: row.try_get("id")?,
                    write: serde_json::from_str(&write)?,
                    error: row.try_get("error")?,
                    failed_at: parse_timestamp(&failed_at)?,
                })
            })
            .collect()
    }

    /// Remember which server id replaced a placeholder
    pub async fn record_remap(&self, temp_id: &RecordId, server_id: &RecordId) -> SyncResult<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO id_remaps (temp_id, server_id, created_at)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(temp_id.as_str())
        .bind(server_id.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(self.db.pool())
        .await?;

        tracing::debug!(temp_id = %temp_id, server_id = %server_id, "Promoted temporary id");
        Ok(())
    }

    /// Server id for a promoted placeholder; other ids are returned as is
    pub async fn resolve_id(&self, id: &RecordId) -> SyncResult<RecordId> {
        if !id.is_temporary() {
            return Ok(id.clone());
        }

        let row = sqlx::query("SELECT server_id FROM id_remaps WHERE temp_id = ?")
            .bind(id.as_str())
            .fetch_optional(self.db.pool())
            .await?;

        match row {
            Some(row) => Ok(RecordId::from(row.try_get::<String, _>("server_id")?)),
            None => Ok(id.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_member, TestContext};

    #[tokio::test]
    async fn test_fifo_order() {
        let ctx = TestContext::new().await;
        let member = sample_member("m1");

        ctx.queue
            .enqueue(WriteOp::CreateMember {
                section: Section::Company,
                member: member.clone(),
            })
            .await
            .unwrap();
        ctx.queue
            .enqueue(WriteOp::DeleteMember {
                section: Section::Company,
                id: member.id.clone(),
            })
            .await
            .unwrap();

        let writes = ctx.queue.drain_all().await.unwrap();
        assert_eq!(writes.len(), 2);
        assert!(writes[0].id < writes[1].id);
        assert_eq!(writes[0].op.kind(), "create_member");
        assert_eq!(writes[1].op.kind(), "delete_member");
        assert_eq!(writes[0].section, Some(Section::Company));

        // Draining does not consume
        assert_eq!(ctx.queue.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_temp_id_is_recorded() {
        let ctx = TestContext::new().await;
        let mut member = sample_member("ignored");
        member.id = RecordId::temporary();

        let write = ctx
            .queue
            .enqueue(WriteOp::CreateMember {
                section: Section::Junior,
                member: member.clone(),
            })
            .await
            .unwrap();

        assert_eq!(write.temp_id, Some(member.id.clone()));
        let drained = ctx.queue.drain_all().await.unwrap();
        assert_eq!(drained[0].temp_id, Some(member.id));
    }

    #[tokio::test]
    async fn test_dead_letter_moves_write() {
        let ctx = TestContext::new().await;
        let write = ctx
            .queue
            .enqueue(WriteOp::DeleteInviteCode {
                section: Section::Company,
                code: "ABCD2345".to_string(),
            })
            .await
            .unwrap();

        ctx.queue.move_to_dead_letter(&write, "column does not exist").await.unwrap();

        assert!(ctx.queue.is_empty().await.unwrap());
        let dead = ctx.queue.dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].error, "column does not exist");
        assert_eq!(dead[0].pending_write(), Some(write));
    }

    #[tokio::test]
    async fn test_unreadable_row_is_dead_lettered() {
        let ctx = TestContext::new().await;
        sqlx::query(
            "INSERT INTO pending_writes (kind, payload, entity_key, queued_at) VALUES ('mystery', '{}', 'x', ?)",
        )
        .bind(Utc::now().to_rfc3339())
        .execute(ctx.db.pool())
        .await
        .unwrap();

        assert!(ctx.queue.list().await.unwrap().is_empty());
        assert_eq!(ctx.queue.len().await.unwrap(), 1);
        assert!(ctx.queue.dead_letters().await.unwrap().is_empty());

        assert!(ctx.queue.drain_all().await.unwrap().is_empty());
        assert!(ctx.queue.is_empty().await.unwrap());
        assert_eq!(ctx.queue.dead_letters().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remap_resolution() {
        let ctx = TestContext::new().await;
        let temp = RecordId::temporary();
        let server = RecordId::new("srv-1");

        assert_eq!(ctx.queue.resolve_id(&temp).await.unwrap(), temp);
        ctx.queue.record_remap(&temp, &server).await.unwrap();
        assert_eq!(ctx.queue.resolve_id(&temp).await.unwrap(), server);
        assert_eq!(ctx.queue.resolve_id(&server).await.unwrap(), server);
    }

    #[tokio::test]
    async fn test_pending_lookups() {
        let ctx = TestContext::new().await;
        let op = WriteOp::UpdateMember {
            section: Section::Company,
            member: sample_member("m1"),
            cleared_dates: BTreeSet::new(),
        };
        let key = op.entity_key();
        ctx.queue.enqueue(op).await.unwrap();

        assert_eq!(key, "company_members:m1");
        assert!(ctx.queue.has_pending_for_entity(&key).await.unwrap());
        assert!(ctx
            .queue
            .has_pending_for_store(&Member::store_name(Section::Company))
            .await
            .unwrap());
        assert!(!ctx
            .queue
            .has_pending_for_store(&Member::store_name(Section::Junior))
            .await
            .unwrap());

        ctx.queue.clear_all().await.unwrap();
        assert!(!ctx.queue.has_pending_for_entity(&key).await.unwrap());
    }

    #[test]
    fn test_write_op_wire_format() {
        let op = WriteOp::DeleteMember {
            section: Section::Junior,
            id: RecordId::new("42"),
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["type"], "delete_member");
        assert_eq!(json["payload"]["section"], "junior");
        assert_eq!(json["payload"]["id"], "42");
    }

    #[test]
    fn test_validation_before_enqueue() {
        let mut member = sample_member("m1");
        member.squad = 9;
        let op = WriteOp::CreateMember {
            section: Section::Company,
            member,
        };
        assert!(matches!(op.validate(), Err(SyncError::Validation(_))));
    }
}
