//! Offline-first synchronization core for the Rollcall roster
//!
//! Provides:
//! - Encrypted local cache with cache-first reads and change notifications
//! - Durable pending-write queue with temporary-id promotion
//! - Batched sync engine with dead-lettering of permanent failures
//! - Field-group merge of concurrently edited members
//! - Audit log whose entries can be reverted
//!
//! # Example
//!
//! ```rust,no_run
//! use rollcall_sync::{MemberDraft, Rollcall, Section, Session};
//!
//! # async fn demo() -> rollcall_sync::SyncResult<()> {
//! let config = config_engine::ConfigEngine::new().with_file("rollcall.yaml").load()?;
//! let client = Rollcall::connect_rest(
//!     &config,
//!     Session::new("user-123", "officer@example.org"),
//!     Some("access-token".to_string()),
//! )
//! .await?;
//!
//! let member = client
//!     .create_member(
//!         Section::Company,
//!         MemberDraft {
//!             name: "Sam Carter".to_string(),
//!             squad: 1,
//!             year: "Year 9".to_string(),
//!             ..Default::default()
//!         },
//!     )
//!     .await?;
//! println!("created {}", member.id);
//! # Ok(())
//! # }
//! ```

#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::indexing_slicing,
        clippy::panic
    )
)]

pub mod audit;
pub mod cache;
pub mod canonical;
pub mod client;
pub mod dispatch;
pub mod error;
pub mod invites;
pub mod local_db;
pub mod merge;
pub mod model;
pub mod network;
pub mod queue;
pub mod remote;
pub mod roles;
pub mod secure_store;
pub mod sync_engine;
pub mod write_path;

#[cfg(test)]
pub(crate) mod testing;

pub use audit::{AuditAction, AuditActionType, AuditLog, AuditLogEntry, EntityRef, RevertData};
pub use cache::CacheFirstReader;
pub use client::{Rollcall, Session};
pub use error::{ErrorClass, SyncError, SyncResult};
pub use local_db::{LocalDatabase, LocalDbConfig};
pub use model::{
    InviteCode, Mark, Member, MemberDraft, RecordId, Record, ResourceKind, Role, Section, StoreName,
    UserRoleInfo,
};
pub use network::NetworkMonitor;
pub use queue::{DeadLetter, PendingWrite, PendingWriteQueue, WriteOp};
pub use remote::{RemoteApi, RestRemote};
pub use secure_store::SecureStore;
pub use sync_engine::{SyncEngine, SyncReport};
pub use write_path::{WriteOutcome, WritePath};
