//! Field-group merge for concurrent member updates
//!
//! Two devices often mark different weeks of the same member while one of
//! them is offline. Before an update is committed the authoritative remote
//! record is fetched and the marks are merged by date:
//!
//! - dates the local write touched (present locally, or explicitly cleared)
//!   take the local value
//! - every other remote date is kept
//! - scalar fields take the local value

use crate::error::SyncResult;
use crate::model::{Mark, Member, Record, Section};
use crate::remote::RemoteApi;
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Merge mark sets; the result is ordered by date
pub fn merge_marks(local: &[Mark], remote: &[Mark], cleared: &BTreeSet<NaiveDate>) -> Vec<Mark> {
    let mut merged: BTreeMap<NaiveDate, Mark> = remote
        .iter()
        .filter(|mark| !cleared.contains(&mark.date))
        .map(|mark| (mark.date, mark.clone()))
        .collect();

    for mark in local {
        merged.insert(mark.date, mark.clone());
    }

    merged.into_values().collect()
}

/// Local scalars with merged marks
pub fn merge_member(local: &Member, remote: &Member, cleared: &BTreeSet<NaiveDate>) -> Member {
    Member {
        marks: merge_marks(&local.marks, &remote.marks, cleared),
        ..local.clone()
    }
}

#[derive(Clone)]
pub struct Reconciler {
    remote: Arc<dyn RemoteApi>,
}

impl Reconciler {
    pub fn new(remote: Arc<dyn RemoteApi>) -> Self {
        Self { remote }
    }

    /// Merge a local update with the current remote record
    ///
    /// A missing or unreadable remote record leaves the local one unchanged.
    pub async fn merge_update(
        &self,
        local: &Member,
        section: Section,
        cleared: &BTreeSet<NaiveDate>,
    ) -> SyncResult<Member> {
        let store = Member::store_name(section);
        let Some(row) = self.remote.select_one(&store, local.id.as_str()).await? else {
            tracing::debug!(store = %store, id = %local.id, "No remote record to merge with");
            return Ok(local.clone());
        };

        match serde_json::from_value::<Member>(row) {
            Ok(remote) => Ok(merge_member(local, &remote, cleared)),
            Err(e) => {
                tracing::warn!(store = %store, id = %local.id, error = %e, "Unreadable remote record, keeping local");
                Ok(local.clone())
            }
        }
    }
}
