//! `Rollcall` facade
//!
//! Assembles every component for one signed-in user. There is no global
//! state: hosts create one [`Rollcall`] per session and pass it around.
//! Each mutating operation goes through the write path and is followed by an
//! audit entry carrying the data needed to revert it.

use crate::audit::{
    sort_newest_first, AuditAction, AuditActionType, AuditLog, AuditLogEntry, EntityRef, RevertData,
};
use crate::cache::CacheFirstReader;
use crate::dispatch::{Applied, Dispatcher};
use crate::error::{SyncError, SyncResult};
use crate::invites::new_invite;
use crate::local_db::{LocalDatabase, LocalDbConfig};
use crate::model::{InviteCode, Member, MemberDraft, RecordId, Role, Section, UserRoleInfo};
use crate::network::NetworkMonitor;
use crate::queue::{DeadLetter, PendingWrite, PendingWriteQueue, WriteOp};
use crate::remote::{RemoteApi, RestRemote};
use crate::roles::RoleService;
use crate::secure_store::SecureStore;
use crate::sync_engine::{SyncEngine, SyncReport};
use crate::write_path::{WriteOutcome, WritePath};
use chrono::NaiveDate;
use config_engine::{ConfigValidator, RollcallConfig};
use crypto::{CryptoConfig, KeyProvider};
use events_bus::{EventBus, Subscriber};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// The signed-in user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    /// Recorded as the actor of every audit entry
    pub email: String,
}

impl Session {
    pub fn new(user_id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: email.into(),
        }
    }
}

pub struct Rollcall {
    session: Session,
    db: LocalDatabase,
    keys: KeyProvider,
    store: SecureStore,
    queue: PendingWriteQueue,
    network: NetworkMonitor,
    events: EventBus,
    write_path: WritePath,
    engine: Arc<SyncEngine>,
    reader: CacheFirstReader,
    audit: AuditLog,
    roles: RoleService,
    auto_sync: Option<JoinHandle<()>>,
}

impl Rollcall {
    /// Open the local cache for `session` and start syncing
    ///
    /// A failed initial sync is logged and retried on the next trigger.
    pub async fn open(
        config: &RollcallConfig,
        remote: Arc<dyn RemoteApi>,
        network: NetworkMonitor,
        session: Session,
    ) -> SyncResult<Self> {
        config.validate()?;

        let db = LocalDatabase::new(LocalDbConfig::from(&config.store)).await?;

        let crypto_config = CryptoConfig {
            master_key: config.crypto.master_key.clone(),
            key_file: PathBuf::from(&config.crypto.key_file),
        };
        let keys = KeyProvider::new(Arc::new(db.clone()), crypto_config.load_key_wrapper()?);
        let key = keys.get_or_create_key(&session.user_id).await?;

        let events = EventBus::new(config.events.capacity)?;
        let store = SecureStore::new(db.clone(), key);
        let queue = PendingWriteQueue::new(db.clone());
        let dispatcher = Dispatcher::new(remote.clone(), store.clone(), queue.clone());
        let write_path = WritePath::new(dispatcher.clone(), queue.clone(), network.clone());
        let engine = Arc::new(SyncEngine::new(
            dispatcher,
            queue.clone(),
            network.clone(),
            config.sync.batch_size,
        ));
        let reader = CacheFirstReader::new(
            store.clone(),
            queue.clone(),
            remote.clone(),
            network.clone(),
            events.clone(),
        );
        let audit = AuditLog::new(write_path.clone(), store.clone(), queue.clone());
        let roles = RoleService::new(
            db.clone(),
            queue.clone(),
            remote,
            network.clone(),
            events.clone(),
        );

        let auto_sync = config
            .sync
            .auto_sync
            .then(|| engine.clone().spawn_auto_sync());

        let client = Self {
            session,
            db,
            keys,
            store,
            queue,
            network,
            events,
            write_path,
            engine,
            reader,
            audit,
            roles,
            auto_sync,
        };

        if client.network.is_online() {
            if let Err(e) = client.engine.sync_with_report().await {
                tracing::warn!(error = %e, "Initial sync failed");
            }
        }

        tracing::info!(
            user = %logger_redacted::redact(&client.session.email),
            "Rollcall session opened"
        );
        Ok(client)
    }

    /// Open against the configured PostgREST endpoint
    pub async fn connect_rest(
        config: &RollcallConfig,
        session: Session,
        access_token: Option<String>,
    ) -> SyncResult<Self> {
        let remote = RestRemote::new(&config.remote)?;
        remote.set_access_token(access_token);
        Self::open(config, Arc::new(remote), NetworkMonitor::default(), session).await
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.network
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> Subscriber {
        self.events.subscribe()
    }

    // Members

    pub async fn members(&self, section: Section) -> SyncResult<Vec<Member>> {
        self.reader.read(section).await
    }

    /// Add a member; offline the returned member still has a placeholder id
    pub async fn create_member(&self, section: Section, draft: MemberDraft) -> SyncResult<Member> {
        let member = draft.into_member();
        let outcome = self
            .write_path
            .submit(WriteOp::CreateMember {
                section,
                member: member.clone(),
            })
            .await?;
        let created = committed_member(outcome).unwrap_or(member);

        self.audit
            .record(
                &self.session.email,
                AuditAction::new(
                    section,
                    AuditActionType::CreateMember,
                    format!("Added {} to squad {}", created.name, created.squad),
                    RevertData::Created {
                        entity: EntityRef::Member {
                            id: created.id.clone(),
                        },
                    },
                ),
            )
            .await?;
        Ok(created)
    }

    /// Save an edited member; `cleared_dates` lists marks removed in the edit
    pub async fn update_member(
        &self,
        section: Section,
        member: Member,
        cleared_dates: BTreeSet<NaiveDate>,
    ) -> SyncResult<Member> {
        let previous = self.cached_member(section, &member.id).await?;
        let outcome = self
            .write_path
            .submit(WriteOp::UpdateMember {
                section,
                member: member.clone(),
                cleared_dates,
            })
            .await?;
        let updated = committed_member(outcome).unwrap_or(member);

        self.audit
            .record(
                &self.session.email,
                AuditAction::new(
                    section,
                    AuditActionType::UpdateMember,
                    format!("Updated {}", updated.name),
                    RevertData::Updated { snapshot: previous },
                ),
            )
            .await?;
        Ok(updated)
    }

    pub async fn delete_member(&self, section: Section, id: &RecordId) -> SyncResult<()> {
        let snapshot = self.cached_member(section, id).await?;
        self.write_path
            .submit(WriteOp::DeleteMember {
                section,
                id: id.clone(),
            })
            .await?;

        self.audit
            .record(
                &self.session.email,
                AuditAction::new(
                    section,
                    AuditActionType::DeleteMember,
                    format!("Removed {}", snapshot.name),
                    RevertData::Deleted { snapshot },
                ),
            )
            .await?;
        Ok(())
    }

    async fn cached_member(&self, section: Section, id: &RecordId) -> SyncResult<Member> {
        self.store
            .read::<Member>(section, id.as_str())
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("Member {id} in {section}")))
    }

    // Audit

    /// Audit entries of a section, newest first
    pub async fn audit_log(&self, section: Section) -> SyncResult<Vec<AuditLogEntry>> {
        let mut entries: Vec<AuditLogEntry> = self.reader.read(section).await?;
        sort_newest_first(&mut entries);
        Ok(entries)
    }

    pub async fn revert(&self, entry_id: Uuid) -> SyncResult<AuditLogEntry> {
        self.audit.revert(&self.session.email, entry_id).await
    }

    // Roles

    pub async fn role(&self, user_id: &str) -> SyncResult<Option<UserRoleInfo>> {
        self.roles.get_role(user_id).await
    }

    /// Grant, change or (with `None`) revoke a user's role
    pub async fn update_role(
        &self,
        section: Section,
        user_id: &str,
        info: Option<UserRoleInfo>,
    ) -> SyncResult<()> {
        let previous = self.roles.get_role(user_id).await?;
        let description = match &info {
            Some(info) => format!("Set role of {user_id} to {}", info.role.as_str()),
            None => format!("Revoked role of {user_id}"),
        };

        self.write_path
            .submit(WriteOp::SetUserRole {
                user_id: user_id.to_string(),
                info,
            })
            .await?;

        self.audit
            .record(
                &self.session.email,
                AuditAction::new(
                    section,
                    AuditActionType::UpdateUserRole,
                    description,
                    RevertData::RoleChanged {
                        user_id: user_id.to_string(),
                        previous,
                    },
                ),
            )
            .await?;
        Ok(())
    }

    // Invite codes

    pub async fn invite_codes(&self, section: Section) -> SyncResult<Vec<InviteCode>> {
        self.reader.read(section).await
    }

    pub async fn create_invite_code(&self, section: Section, role: Role) -> SyncResult<InviteCode> {
        let invite = new_invite(section, role, &self.session.email);
        self.write_path
            .submit(WriteOp::CreateInviteCode {
                invite: invite.clone(),
            })
            .await?;

        self.audit
            .record(
                &self.session.email,
                AuditAction::new(
                    section,
                    AuditActionType::CreateInviteCode,
                    format!("Created {} invite code", role.as_str()),
                    RevertData::Created {
                        entity: EntityRef::InviteCode {
                            code: invite.code.clone(),
                        },
                    },
                ),
            )
            .await?;
        Ok(invite)
    }

    pub async fn revoke_invite_code(&self, section: Section, code: &str) -> SyncResult<()> {
        self.write_path
            .submit(WriteOp::DeleteInviteCode {
                section,
                code: code.to_string(),
            })
            .await?;

        self.audit
            .record(
                &self.session.email,
                AuditAction::new(
                    section,
                    AuditActionType::RevokeInviteCode,
                    "Revoked invite code",
                    RevertData::NotRevertible,
                ),
            )
            .await?;
        Ok(())
    }

    // Sync

    /// Drain the queue; true once nothing is left
    pub async fn sync(&self) -> SyncResult<bool> {
        self.engine.sync().await
    }

    pub async fn sync_report(&self) -> SyncResult<SyncReport> {
        self.engine.sync_with_report().await
    }

    pub async fn pending_writes(&self) -> SyncResult<Vec<PendingWrite>> {
        self.queue.list().await
    }

    pub async fn dead_letters(&self) -> SyncResult<Vec<DeadLetter>> {
        self.queue.dead_letters().await
    }

    /// Drop the user key together with everything it encrypted
    ///
    /// Queued writes survive; the cache is rebuilt from the remote store on
    /// the next session.
    pub async fn sign_out_and_forget(&self) -> SyncResult<()> {
        if let Some(handle) = &self.auto_sync {
            handle.abort();
        }
        self.keys.forget_key(&self.session.user_id).await?;
        self.db.clear_cache().await?;
        self.db.vacuum().await?;

        tracing::info!(
            user = %logger_redacted::redact(&self.session.email),
            "Signed out and forgot user key"
        );
        Ok(())
    }
}

impl Drop for Rollcall {
    fn drop(&mut self) {
        if let Some(handle) = self.auto_sync.take() {
            handle.abort();
        }
    }
}

fn committed_member(outcome: WriteOutcome) -> Option<Member> {
    match outcome {
        WriteOutcome::Committed(Applied::Member(member)) => Some(member),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Mark, Record};
    use crate::testing::FakeRemote;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> RollcallConfig {
        let mut config = RollcallConfig::default();
        config.store.db_path = dir.path().join("rollcall.db").to_str().unwrap().to_string();
        config.crypto.key_file = dir.path().join("device.key").to_str().unwrap().to_string();
        config.sync.auto_sync = false;
        config
    }

    fn draft(name: &str) -> MemberDraft {
        MemberDraft {
            name: name.to_string(),
            squad: 2,
            year: "Year 8".to_string(),
            is_squad_leader: false,
            marks: vec![Mark::company(NaiveDate::from_ymd_opt(2024, 9, 6).unwrap(), 7.5)],
        }
    }

    async fn open(dir: &TempDir, remote: &Arc<FakeRemote>, online: bool) -> Rollcall {
        let remote: Arc<dyn RemoteApi> = remote.clone();
        Rollcall::open(
            &test_config(dir),
            remote,
            NetworkMonitor::new(online),
            Session::new("user-1", "officer@example.org"),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_online_create_is_audited() {
        let dir = TempDir::new().unwrap();
        let remote = Arc::new(FakeRemote::new());
        let client = open(&dir, &remote, true).await;

        let member = client.create_member(Section::Company, draft("Alex")).await.unwrap();
        assert!(!member.id.is_temporary());
        assert!(remote
            .row(&Member::store_name(Section::Company), member.id.as_str())
            .is_some());

        let log = client.audit_log(Section::Company).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].action_type, AuditActionType::CreateMember);
        assert_eq!(log[0].user_email, "officer@example.org");
    }

    #[tokio::test]
    async fn test_offline_session_syncs_on_next_open() {
        let dir = TempDir::new().unwrap();
        let remote = Arc::new(FakeRemote::new());

        let offline = open(&dir, &remote, false).await;
        let member = offline.create_member(Section::Junior, MemberDraft {
            marks: vec![Mark::junior(NaiveDate::from_ymd_opt(2024, 9, 6).unwrap(), 8.0, 4.0)],
            ..draft("Robin")
        })
        .await
        .unwrap();
        assert!(member.id.is_temporary());
        assert_eq!(offline.pending_writes().await.unwrap().len(), 2);
        drop(offline);

        // Same device key and database, now online: open runs a sync
        let online = open(&dir, &remote, true).await;
        assert!(online.pending_writes().await.unwrap().is_empty());

        let rows = remote.rows(&Member::store_name(Section::Junior));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "Robin");

        let cached = online.members(Section::Junior).await.unwrap();
        assert_eq!(cached.len(), 1);
        assert!(!cached[0].id.is_temporary());

        let audit_rows = remote.rows(&AuditLogEntry::store_name(Section::Junior));
        assert_eq!(audit_rows.len(), 1);
        assert_eq!(audit_rows[0]["revertData"]["entity"]["id"], rows[0]["id"]);
    }

    #[tokio::test]
    async fn test_delete_then_revert_restores_member() {
        let dir = TempDir::new().unwrap();
        let remote = Arc::new(FakeRemote::new());
        let client = open(&dir, &remote, true).await;
        let store = Member::store_name(Section::Company);

        let member = client.create_member(Section::Company, draft("Jamie")).await.unwrap();
        client.delete_member(Section::Company, &member.id).await.unwrap();
        assert!(remote.row(&store, member.id.as_str()).is_none());

        let delete_entry = client.audit_log(Section::Company).await.unwrap()[0].clone();
        assert_eq!(delete_entry.action_type, AuditActionType::DeleteMember);

        let revert = client.revert(delete_entry.id).await.unwrap();
        assert_eq!(revert.reverted_log_id, Some(delete_entry.id));

        let restored: Member =
            serde_json::from_value(remote.row(&store, member.id.as_str()).unwrap()).unwrap();
        assert_eq!(restored, member);
        assert!(client.revert(delete_entry.id).await.is_err());
    }

    #[tokio::test]
    async fn test_update_keeps_previous_snapshot() {
        let dir = TempDir::new().unwrap();
        let remote = Arc::new(FakeRemote::new());
        let client = open(&dir, &remote, true).await;

        let member = client.create_member(Section::Company, draft("Casey")).await.unwrap();
        let mut edited = member.clone();
        edited.is_squad_leader = true;
        let updated = client
            .update_member(Section::Company, edited, BTreeSet::new())
            .await
            .unwrap();
        assert!(updated.is_squad_leader);

        let entry = client.audit_log(Section::Company).await.unwrap()[0].clone();
        assert_eq!(entry.revert_data, RevertData::Updated { snapshot: member });
    }

    #[tokio::test]
    async fn test_update_of_unknown_member_fails() {
        let dir = TempDir::new().unwrap();
        let remote = Arc::new(FakeRemote::new());
        let client = open(&dir, &remote, true).await;

        let mut ghost = draft("Ghost").into_member();
        ghost.id = RecordId::new("missing");
        let result = client
            .update_member(Section::Company, ghost, BTreeSet::new())
            .await;
        assert!(matches!(result, Err(SyncError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_role_change_revert_restores_previous_role() {
        let dir = TempDir::new().unwrap();
        let remote = Arc::new(FakeRemote::new());
        let officer = UserRoleInfo::new(Role::Officer, vec![Section::Junior]);
        remote.set_remote_role("user-2", officer.clone());
        let client = open(&dir, &remote, true).await;

        let captain = UserRoleInfo::new(Role::Captain, vec![Section::Junior, Section::Company]);
        client
            .update_role(Section::Junior, "user-2", Some(captain.clone()))
            .await
            .unwrap();
        assert_eq!(remote.fetch_role("user-2").await.unwrap(), Some(captain));

        let entry = client.audit_log(Section::Junior).await.unwrap()[0].clone();
        assert_eq!(
            entry.revert_data,
            RevertData::RoleChanged {
                user_id: "user-2".to_string(),
                previous: Some(officer.clone()),
            }
        );
        client.revert(entry.id).await.unwrap();
        assert_eq!(remote.fetch_role("user-2").await.unwrap(), Some(officer.clone()));
        assert_eq!(client.role("user-2").await.unwrap(), Some(officer));
    }

    #[tokio::test]
    async fn test_invite_codes() {
        let dir = TempDir::new().unwrap();
        let remote = Arc::new(FakeRemote::new());
        let client = open(&dir, &remote, true).await;

        let invite = client
            .create_invite_code(Section::Company, Role::Officer)
            .await
            .unwrap();
        assert_eq!(invite.created_by, "officer@example.org");
        assert_eq!(client.invite_codes(Section::Company).await.unwrap(), vec![invite.clone()]);

        client
            .revoke_invite_code(Section::Company, &invite.code)
            .await
            .unwrap();
        assert!(remote.rows(&InviteCode::store_name(Section::Company)).is_empty());

        let log = client.audit_log(Section::Company).await.unwrap();
        assert_eq!(log.len(), 2);
        assert!(!log[0].is_revertible());
    }

    #[tokio::test]
    async fn test_sign_out_forgets_cache() {
        let dir = TempDir::new().unwrap();
        let remote = Arc::new(FakeRemote::new());
        let client = open(&dir, &remote, false).await;

        client.create_member(Section::Company, draft("Sky")).await.unwrap();
        client.sign_out_and_forget().await.unwrap();

        assert!(client.members(Section::Company).await.unwrap().is_empty());
        assert_eq!(client.pending_writes().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.sync.batch_size = 0;

        let result = Rollcall::open(
            &config,
            Arc::new(FakeRemote::new()),
            NetworkMonitor::new(false),
            Session::new("user-1", "officer@example.org"),
        )
        .await;
        assert!(matches!(result, Err(SyncError::Config(_))));
    }
}
