//! Waits for every entity to reach a terminal sync status.

use std::collections::BTreeSet;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::entity::EntityRegistry;
use crate::job::{JobControl, JobId};
use crate::status::StatusSource;

use super::{RoundBudget, WaitError, WaitOutcome, WaitPhase, await_job, ensure_active, pause};

const PHASE: WaitPhase = WaitPhase::Sync;

/// Polls live pair status and blocks on in-progress replication jobs until
/// every entity is `InSync`, `SyncDisabled`, or `SyncFailed`.
///
/// Unlike [`super::BackupWaiter`], truth here is pulled from the status
/// source: every round re-reads every entity before deciding what to wait on.
#[derive(Debug)]
pub struct SyncWaiter<'a, J: ?Sized, S: ?Sized> {
    jobs: &'a J,
    status: &'a S,
    budget: RoundBudget,
}

impl<'a, J, S> SyncWaiter<'a, J, S>
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

    /// Blocks until every entity in `registry` reports a terminal sync
    /// status, or the round budget runs out.
    ///
    /// The registry's observed state is refreshed as a side effect.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::JobFailed`] naming the job as soon as a
    /// replication job finishes with any status other than `Completed`,
    /// [`WaitError::Remote`] when a status or job query fails, and
    /// [`WaitError::Cancelled`] when `cancel` fires.
    pub async fn wait_for_replication_sync(
        &self,
        registry: &mut EntityRegistry,
        cancel: &CancellationToken,
    ) -> Result<WaitOutcome, WaitError> {
        let mut pending = BTreeSet::new();
        for round in 1..=self.budget.rounds {
            ensure_active(cancel, PHASE)?;
            registry
                .refresh_all(self.status)
                .await
                .map_err(WaitError::remote(PHASE))?;
            pending = registry.pending_sync();
            if pending.is_empty() {
                info!(round, "every entity reached a terminal sync status");
                return Ok(WaitOutcome::Satisfied { rounds: round });
            }
            debug!(round, pending = ?pending, "entities still syncing");

            for job_id in in_progress_jobs(registry, &pending) {
                let job = self
                    .jobs
                    .get_job(&job_id)
                    .await
                    .map_err(WaitError::remote(PHASE))?;
                let finished = await_job(self.jobs, &job.id, cancel, PHASE).await?;
                for covered in &finished.covered_entities {
                    pending.remove(covered);
                }
            }

            if pending.is_empty() {
                info!(round, "replication jobs finished for every pending entity");
                return Ok(WaitOutcome::Satisfied { rounds: round });
            }

            if let Some(latest) = self.wait_for_sync_activity(registry, cancel).await? {
                pending = latest;
            }
            if pending.is_empty() {
                info!(round, "every entity reached a terminal sync status");
                return Ok(WaitOutcome::Satisfied { rounds: round });
            }
        }

        warn!(
            rounds = self.budget.rounds,
            pending = ?pending,
            "replication sync wait budget exhausted"
        );
        Ok(WaitOutcome::Exhausted {
            rounds: self.budget.rounds,
            outstanding: pending,
        })
    }

    /// Polls until some entity starts syncing (or nothing is left pending).
    /// Returns the pending set from the last refresh, or `None` when the idle
    /// budget allows no polls.
    async fn wait_for_sync_activity(
        &self,
        registry: &mut EntityRegistry,
        cancel: &CancellationToken,
    ) -> Result<Option<BTreeSet<String>>, WaitError> {
        let idle = self.budget.idle;
        let mut latest = None;
        for poll in 1..=idle.rounds {
            pause(cancel, idle.interval, PHASE).await?;
            registry
                .refresh_all(self.status)
                .await
                .map_err(WaitError::remote(PHASE))?;
            let pending = registry.pending_sync();
            if registry.any_in_progress() || pending.is_empty() {
                debug!(poll, "sync activity detected");
                return Ok(Some(pending));
            }
            debug!(poll, "no entity syncing yet");
            latest = Some(pending);
        }
        Ok(latest)
    }
}

/// Distinct replication jobs running for the pending entities, in registry
/// order.
fn in_progress_jobs(registry: &EntityRegistry, pending: &BTreeSet<String>) -> Vec<JobId> {
    let mut seen = BTreeSet::new();
    registry
        .iter()
        .filter(|entity| pending.contains(entity.source_id()))
        .filter_map(|entity| entity.in_progress_job())
        .filter(|job_id| seen.insert((*job_id).clone()))
        .cloned()
        .collect()
}
