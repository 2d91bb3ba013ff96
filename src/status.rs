//! Source of truth for live replication-pair state.

use std::collections::BTreeSet;

use crate::entity::{FailoverStatus, SyncStatus};
use crate::job::JobId;
use crate::remote::RemoteFuture;

/// Live state of a replication pair as reported by the source of truth.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PairObservation {
    /// Current sync status.
    pub sync_status: SyncStatus,
    /// Most recent replication job started for the pair.
    pub last_replication_job_id: Option<JobId>,
    /// Backup job whose data the last replication carried to the destination.
    pub last_synced_backup_job: Option<JobId>,
    /// Current failover status.
    pub failover_status: FailoverStatus,
}

impl PairObservation {
    /// Creates an observation with the given sync status and no job.
    #[must_use]
    pub const fn with_status(sync_status: SyncStatus) -> Self {
        Self {
            sync_status,
            last_replication_job_id: None,
            last_synced_backup_job: None,
            failover_status: FailoverStatus::None,
        }
    }

    /// Sets the last replication job id.
    #[must_use]
    pub fn replication_job(mut self, id: impl Into<JobId>) -> Self {
        self.last_replication_job_id = Some(id.into());
        self
    }

    /// Sets the backup job carried by the last replication.
    #[must_use]
    pub fn synced_backup(mut self, id: impl Into<JobId>) -> Self {
        self.last_synced_backup_job = Some(id.into());
        self
    }

    /// Sets the failover status.
    #[must_use]
    pub const fn failover(mut self, failover_status: FailoverStatus) -> Self {
        self.failover_status = failover_status;
        self
    }
}

/// Queries the live state of replication pairs.
pub trait StatusSource: Send + Sync {
    /// Re-reads the live state of the pair keyed by `source_id`.
    fn observe<'a>(&'a self, source_id: &'a str) -> RemoteFuture<'a, PairObservation>;

    /// Lists the source ids the destination already knows as replication
    /// pairs for the group. A pair only becomes known after its first backup.
    fn known_pairs<'a>(&'a self, group: &'a str) -> RemoteFuture<'a, BTreeSet<String>>;

    /// Reports whether the group's pair registration is visible on the
    /// destination.
    fn pair_registered<'a>(&'a self, group: &'a str) -> RemoteFuture<'a, bool>;
}
