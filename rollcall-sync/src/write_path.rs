//! Single entry point for mutations
//!
//! A write is validated, then committed straight to the remote store when
//! online. Offline writes, writes whose commit hits a transport failure, and
//! writes to a record that still has queued writes are applied to the cache
//! optimistically and appended to the pending-write queue instead.

use crate::dispatch::{Applied, Dispatcher};
use crate::error::{ErrorClass, SyncResult};
use crate::network::NetworkMonitor;
use crate::queue::{PendingWrite, PendingWriteQueue, WriteOp};

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    /// Confirmed by the remote store
    Committed(Applied),
    /// Applied locally, waiting in the queue
    Queued(PendingWrite),
}

impl WriteOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, WriteOutcome::Queued(_))
    }
}

#[derive(Clone)]
pub struct WritePath {
    dispatcher: Dispatcher,
    queue: PendingWriteQueue,
    network: NetworkMonitor,
}

impl WritePath {
    pub fn new(dispatcher: Dispatcher, queue: PendingWriteQueue, network: NetworkMonitor) -> Self {
        Self {
            dispatcher,
            queue,
            network,
        }
    }

    pub async fn submit(&self, op: WriteOp) -> SyncResult<WriteOutcome> {
        op.validate()?;

        // Queued writes for the same record must land first
        if self.network.is_online() && !self.queue.has_pending_for_entity(&op.entity_key()).await? {
            match self.dispatcher.apply(&op).await {
                Ok(applied) => return Ok(WriteOutcome::Committed(applied)),
                Err(e) => match e.class() {
                    ErrorClass::UniqueViolation => {
                        tracing::debug!(kind = op.kind(), "Write already present remotely");
                        self.dispatcher.settle_duplicate(&op).await?;
                        return Ok(WriteOutcome::Committed(Applied::Done));
                    }
                    ErrorClass::Network => {
                        tracing::warn!(kind = op.kind(), error = %e, "Online commit failed, queueing write");
                    }
                    _ => return Err(e),
                },
            }
        }

        self.dispatcher.apply_locally(&op).await?;
        let write = self.queue.enqueue(op).await?;
        Ok(WriteOutcome::Queued(write))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::model::{Member, Record, RecordId, Section};
    use crate::testing::{sample_member, Failure, TestContext};

    #[tokio::test]
    async fn test_offline_write_is_optimistic() {
        let ctx = TestContext::new().await;
        ctx.network.set_online(false);
        let member = sample_member("m1");

        let outcome = ctx
            .write_path
            .submit(WriteOp::CreateMember {
                section: Section::Company,
                member: member.clone(),
            })
            .await
            .unwrap();

        assert!(outcome.is_queued());
        assert_eq!(
            ctx.store.read::<Member>(Section::Company, "m1").await.unwrap(),
            Some(member)
        );
        assert_eq!(ctx.remote.call_count(), 0);
    }

    #[tokio::test]
    async fn test_online_write_commits() {
        let ctx = TestContext::new().await;
        let mut member = sample_member("unused");
        member.id = RecordId::temporary();

        let outcome = ctx
            .write_path
            .submit(WriteOp::CreateMember {
                section: Section::Company,
                member,
            })
            .await
            .unwrap();

        let WriteOutcome::Committed(Applied::Member(created)) = outcome else {
            panic!("expected a committed create");
        };
        assert!(ctx.queue.is_empty().await.unwrap());
        assert!(ctx
            .remote
            .row(&Member::store_name(Section::Company), created.id.as_str())
            .is_some());
    }

    #[tokio::test]
    async fn test_network_failure_falls_back_to_queue() {
        let ctx = TestContext::new().await;
        ctx.remote.fail(&Member::store_name(Section::Company), Failure::Network);

        let outcome = ctx
            .write_path
            .submit(WriteOp::CreateMember {
                section: Section::Company,
                member: sample_member("m1"),
            })
            .await
            .unwrap();

        assert!(outcome.is_queued());
        assert_eq!(ctx.queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_create_already_on_server_is_promoted() {
        let ctx = TestContext::new().await;
        let store = Member::store_name(Section::Company);
        let mut member = sample_member("unused");
        member.id = RecordId::temporary();
        let landed = Member {
            id: member.id.promoted(),
            ..member.clone()
        };
        ctx.remote.seed(&store, &landed);

        let outcome = ctx
            .write_path
            .submit(WriteOp::CreateMember {
                section: Section::Company,
                member: member.clone(),
            })
            .await
            .unwrap();

        assert!(!outcome.is_queued());
        assert_eq!(ctx.remote.rows(&store).len(), 1);
        assert_eq!(
            ctx.store.read_all::<Member>(Section::Company).await.unwrap(),
            vec![landed.clone()]
        );
        assert_eq!(ctx.queue.resolve_id(&member.id).await.unwrap(), landed.id);
    }

    #[tokio::test]
    async fn test_permission_failure_is_surfaced() {
        let ctx = TestContext::new().await;
        ctx.remote.fail(&Member::store_name(Section::Company), Failure::Permission);

        let result = ctx
            .write_path
            .submit(WriteOp::CreateMember {
                section: Section::Company,
                member: sample_member("m1"),
            })
            .await;

        assert!(matches!(result, Err(SyncError::Permission(_))));
        assert!(ctx.queue.is_empty().await.unwrap());
        assert!(ctx.store.read_all::<Member>(Section::Company).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_write_is_rejected_before_enqueue() {
        let ctx = TestContext::new().await;
        ctx.network.set_online(false);
        let mut member = sample_member("m1");
        member.name = String::new();

        let result = ctx
            .write_path
            .submit(WriteOp::CreateMember {
                section: Section::Company,
                member,
            })
            .await;

        assert!(matches!(result, Err(SyncError::Validation(_))));
        assert!(ctx.queue.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_writes_behind_queued_ones_are_queued() {
        let ctx = TestContext::new().await;
        let member = sample_member("m1");
        ctx.remote.seed(&Member::store_name(Section::Company), &member);

        ctx.network.set_online(false);
        ctx.write_path
            .submit(WriteOp::UpdateMember {
                section: Section::Company,
                member: member.clone(),
                cleared_dates: Default::default(),
            })
            .await
            .unwrap();

        ctx.network.set_online(true);
        let mut renamed = member.clone();
        renamed.name = "Later Edit".to_string();
        let outcome = ctx
            .write_path
            .submit(WriteOp::UpdateMember {
                section: Section::Company,
                member: renamed,
                cleared_dates: Default::default(),
            })
            .await
            .unwrap();

        assert!(outcome.is_queued());
        assert_eq!(ctx.queue.len().await.unwrap(), 2);
    }
}
