//! Waits for the first backup of every entity in a group.

use std::collections::BTreeSet;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::entity::Group;
use crate::job::{BACKUP_JOB_KINDS, JobControl, JobId, JobSnapshot};
use crate::status::StatusSource;

use super::{RoundBudget, WaitError, WaitOutcome, WaitPhase, await_job, ensure_active, pause};

const PHASE: WaitPhase = WaitPhase::Backup;

/// Scans active backup jobs until every entity has been backed up once.
///
/// Backup detection is job based: membership in the destination's known
/// pairs marks an entity as backed up, and the waiter blocks on whichever
/// active backup job covers an entity that is still missing.
#[derive(Debug)]
pub struct BackupWaiter<'a, J: ?Sized, S: ?Sized> {
    jobs: &'a J,
    status: &'a S,
    budget: RoundBudget,
}

impl<'a, J, S> BackupWaiter<'a, J, S>
where
    J: JobControl + ?Sized,
    S: StatusSource + ?Sized,
{
    /// Creates a waiter over the given collaborators.
    #[must_use]
    pub const fn new(jobs: &'a J, status: &'a S, budget: RoundBudget) -> Self {
        Self {
            jobs,
            status,
            budget,
        }
    }

    /// Blocks until every entity in `group` has at least one completed
    /// backup, or the round budget runs out.
    ///
    /// Running out of rounds is not an error: the outcome lists the entities
    /// still waiting for a backup and the caller decides what to do.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::JobFailed`] as soon as a matching backup job
    /// finishes with any status other than `Completed`,
    /// [`WaitError::Remote`] when the job list cannot be read, and
    /// [`WaitError::Cancelled`] when `cancel` fires.
    pub async fn wait_for_first_backup(
        &self,
        group: &Group,
        cancel: &CancellationToken,
    ) -> Result<WaitOutcome, WaitError> {
        let mut remaining = self.remaining(group).await;
        if remaining.is_empty() {
            info!(group = group.name(), "every entity already has a backup");
            return Ok(WaitOutcome::Satisfied { rounds: 0 });
        }

        let mut finished: BTreeSet<JobId> = BTreeSet::new();
        for round in 1..=self.budget.rounds {
            ensure_active(cancel, PHASE)?;
            debug!(round, remaining = ?remaining, "scanning active backup jobs");

            for job in self.matching_jobs(group, &remaining, &finished).await? {
                await_job(self.jobs, &job.id, cancel, PHASE).await?;
                finished.insert(job.id);
            }

            remaining = self.remaining(group).await;
            if remaining.is_empty() {
                info!(group = group.name(), round, "first backup complete for every entity");
                return Ok(WaitOutcome::Satisfied { rounds: round });
            }

            self.wait_for_new_job(group, &remaining, &finished, cancel)
                .await?;
        }

        warn!(
            group = group.name(),
            rounds = self.budget.rounds,
            remaining = ?remaining,
            "backup wait budget exhausted"
        );
        Ok(WaitOutcome::Exhausted {
            rounds: self.budget.rounds,
            outstanding: remaining,
        })
    }

    /// Entities without a backup yet. When the known-pairs query fails every
    /// configured entity counts as remaining.
    async fn remaining(&self, group: &Group) -> BTreeSet<String> {
        let configured = group.registry().source_ids();
        match self.status.known_pairs(group.name()).await {
            Ok(known) => configured.difference(&known).cloned().collect(),
            Err(err) => {
                warn!(group = group.name(), error = %err, "known pairs unavailable; assuming none backed up");
                configured
            }
        }
    }

    async fn matching_jobs(
        &self,
        group: &Group,
        remaining: &BTreeSet<String>,
        finished: &BTreeSet<JobId>,
    ) -> Result<Vec<JobSnapshot>, WaitError> {
        let active = self
            .jobs
            .list_active_jobs(group.source_system(), &BACKUP_JOB_KINDS)
            .await
            .map_err(WaitError::remote(PHASE))?;

        Ok(active
            .into_iter()
            .filter(|job| job.subclient_id == group.subclient_id())
            .filter(|job| !finished.contains(&job.id))
            .filter(|job| job.covers_any(remaining))
            .collect())
    }

    async fn wait_for_new_job(
        &self,
        group: &Group,
        remaining: &BTreeSet<String>,
        finished: &BTreeSet<JobId>,
        cancel: &CancellationToken,
    ) -> Result<(), WaitError> {
        let idle = self.budget.idle;
        for poll in 1..=idle.rounds {
            pause(cancel, idle.interval, PHASE).await?;
            if !self.matching_jobs(group, remaining, finished).await?.is_empty() {
                debug!(poll, "new backup job detected");
                return Ok(());
            }
            debug!(poll, "no new backup job yet");
        }
        Ok(())
    }
}
