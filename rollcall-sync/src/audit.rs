//! Audit log with revert support
//!
//! Every mutating action appends an immutable entry carrying enough data to
//! build its inverse. Reverting applies that inverse through the normal write
//! path and appends a new entry linked to the original; the original is never
//! touched.
//!
//! | Action            | Revert data          | Inverse                |
//! |-------------------|----------------------|------------------------|
//! | create member     | created id           | delete by id           |
//! | update member     | pre-update snapshot  | recreate snapshot      |
//! | delete member     | deleted snapshot     | recreate snapshot      |
//! | role change       | previous role        | restore previous role  |
//! | create invite     | code                 | delete code            |

use crate::error::{SyncError, SyncResult};
use crate::model::{Member, Record, RecordId, ResourceKind, Section, UserRoleInfo};
use crate::queue::{PendingWriteQueue, WriteOp};
use crate::secure_store::SecureStore;
use crate::write_path::WritePath;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditActionType {
    CreateMember,
    UpdateMember,
    DeleteMember,
    UpdateUserRole,
    CreateInviteCode,
    RevokeInviteCode,
    Revert,
}

impl AuditActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditActionType::CreateMember => "create_member",
            AuditActionType::UpdateMember => "update_member",
            AuditActionType::DeleteMember => "delete_member",
            AuditActionType::UpdateUserRole => "update_user_role",
            AuditActionType::CreateInviteCode => "create_invite_code",
            AuditActionType::RevokeInviteCode => "revoke_invite_code",
            AuditActionType::Revert => "revert",
        }
    }
}

/// Record a revert acts on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "resource", rename_all = "snake_case")]
pub enum EntityRef {
    Member { id: RecordId },
    InviteCode { code: String },
}

/// What is needed to undo an action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RevertData {
    Created { entity: EntityRef },
    Updated { snapshot: Member },
    Deleted { snapshot: Member },
    RoleChanged {
        user_id: String,
        previous: Option<UserRoleInfo>,
    },
    NotRevertible,
}

/// Append-only audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub user_email: String,
    pub action_type: AuditActionType,
    pub description: String,
    pub revert_data: RevertData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverted_log_id: Option<Uuid>,
    pub section: Section,
}

impl AuditLogEntry {
    pub fn is_revertible(&self) -> bool {
        self.reverted_log_id.is_none() && !matches!(self.revert_data, RevertData::NotRevertible)
    }
}

impl Record for AuditLogEntry {
    const KIND: ResourceKind = ResourceKind::AuditLogs;

    fn record_id(&self) -> String {
        self.id.to_string()
    }
}

/// Input to [`AuditLog::record`]
#[derive(Debug, Clone, PartialEq)]
pub struct AuditAction {
    pub section: Section,
    pub action_type: AuditActionType,
    pub description: String,
    pub revert_data: RevertData,
}

impl AuditAction {
    pub fn new(
        section: Section,
        action_type: AuditActionType,
        description: impl Into<String>,
        revert_data: RevertData,
    ) -> Self {
        Self {
            section,
            action_type,
            description: description.into(),
            revert_data,
        }
    }
}

#[derive(Clone)]
pub struct AuditLog {
    write_path: WritePath,
    store: SecureStore,
    queue: PendingWriteQueue,
}

impl AuditLog {
    pub fn new(write_path: WritePath, store: SecureStore, queue: PendingWriteQueue) -> Self {
        Self {
            write_path,
            store,
            queue,
        }
    }

    /// Append an entry for an action performed by `actor_email`
    pub async fn record(&self, actor_email: &str, action: AuditAction) -> SyncResult<AuditLogEntry> {
        let entry = AuditLogEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            user_email: actor_email.to_string(),
            action_type: action.action_type,
            description: action.description,
            revert_data: action.revert_data,
            reverted_log_id: None,
            section: action.section,
        };
        self.append(entry).await
    }

    async fn append(&self, entry: AuditLogEntry) -> SyncResult<AuditLogEntry> {
        self.write_path
            .submit(WriteOp::AppendAuditLog {
                entry: entry.clone(),
            })
            .await?;

        tracing::info!(
            entry_id = %entry.id,
            action = entry.action_type.as_str(),
            section = %entry.section,
            actor = %logger_redacted::redact(&entry.user_email),
            "Recorded audit entry"
        );
        Ok(entry)
    }

    /// Cached entries of a section, newest first
    pub async fn entries(&self, section: Section) -> SyncResult<Vec<AuditLogEntry>> {
        let mut entries: Vec<AuditLogEntry> = self.store.read_all(section).await?;
        sort_newest_first(&mut entries);
        Ok(entries)
    }

    async fn find(&self, entry_id: Uuid) -> SyncResult<(AuditLogEntry, Vec<AuditLogEntry>)> {
        for section in Section::ALL {
            let entries: Vec<AuditLogEntry> = self.store.read_all(section).await?;
            if let Some(entry) = entries.iter().find(|e| e.id == entry_id).cloned() {
                return Ok((entry, entries));
            }
        }
        Err(SyncError::NotFound(format!("Audit entry {entry_id}")))
    }

    /// Apply the inverse of an entry and log the revert
    pub async fn revert(&self, actor_email: &str, entry_id: Uuid) -> SyncResult<AuditLogEntry> {
        let (original, siblings) = self.find(entry_id).await?;

        if !original.is_revertible() {
            return Err(SyncError::Validation(format!(
                "Audit entry {entry_id} cannot be reverted"
            )));
        }
        if siblings.iter().any(|e| e.reverted_log_id == Some(entry_id)) {
            return Err(SyncError::Validation(format!(
                "Audit entry {entry_id} was already reverted"
            )));
        }

        let inverse = self.inverse(&original).await?;
        self.write_path.submit(inverse).await?;

        let entry = AuditLogEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            user_email: actor_email.to_string(),
            action_type: AuditActionType::Revert,
            description: format!("Reverted: {}", original.description),
            revert_data: RevertData::NotRevertible,
            reverted_log_id: Some(original.id),
            section: original.section,
        };
        self.append(entry).await
    }

    async fn inverse(&self, entry: &AuditLogEntry) -> SyncResult<WriteOp> {
        let section = entry.section;
        let op = match &entry.revert_data {
            RevertData::Created {
                entity: EntityRef::Member { id },
            } => WriteOp::DeleteMember {
                section,
                id: self.queue.resolve_id(id).await?,
            },
            RevertData::Created {
                entity: EntityRef::InviteCode { code },
            } => WriteOp::DeleteInviteCode {
                section,
                code: code.clone(),
            },
            RevertData::Updated { snapshot } | RevertData::Deleted { snapshot } => {
                let mut member = snapshot.clone();
                member.id = self.queue.resolve_id(&member.id).await?;
                WriteOp::RecreateMember { section, member }
            }
            RevertData::RoleChanged { user_id, previous } => WriteOp::SetUserRole {
                user_id: user_id.clone(),
                info: previous.clone(),
            },
            RevertData::NotRevertible => {
                return Err(SyncError::Validation(format!(
                    "Audit entry {} cannot be reverted",
                    entry.id
                )))
            }
        };
        Ok(op)
    }
}

pub fn sort_newest_first(entries: &mut [AuditLogEntry]) {
    entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
}
