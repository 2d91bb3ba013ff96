//! Bounded, cancellable waits on remote state.
//!
//! The remote systems offer no push notification, so every wait here is a
//! polling loop capped by a round budget. Each sleep and each blocking job
//! wait is raced against a [`CancellationToken`] so a caller can abandon a
//! stuck orchestration without waiting out the budget.

mod backup;
mod registration;
mod sync;

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::job::{JobControl, JobId, JobSnapshot, JobStatus};
use crate::remote::RemoteError;

pub use backup::BackupWaiter;
pub use registration::RegistrationWaiter;
pub use sync::SyncWaiter;

/// A fixed number of polls separated by a fixed interval.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollPolicy {
    /// Maximum number of polls.
    pub rounds: u32,
    /// Pause before each poll.
    pub interval: Duration,
}

impl PollPolicy {
    /// Creates a poll policy.
    #[must_use]
    pub const fn new(rounds: u32, interval: Duration) -> Self {
        Self { rounds, interval }
    }
}

/// Budget of a two-level waiter: outer rounds, each followed by an idle
/// wait for new remote activity.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RoundBudget {
    /// Maximum number of outer rounds.
    pub rounds: u32,
    /// Idle wait between outer rounds.
    pub idle: PollPolicy,
}

impl RoundBudget {
    /// Creates a round budget.
    #[must_use]
    pub const fn new(rounds: u32, idle: PollPolicy) -> Self {
        Self { rounds, idle }
    }
}

/// Phase of the orchestration a wait belongs to.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum WaitPhase {
    /// Waiting for the first backup of every entity.
    Backup,
    /// Waiting for the pair registration to appear on the destination.
    Registration,
    /// Waiting for every entity to reach a terminal sync status.
    Sync,
}

impl fmt::Display for WaitPhase {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Backup => "first backup",
            Self::Registration => "pair registration",
            Self::Sync => "replication sync",
        })
    }
}

/// How a bounded wait ended.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum WaitOutcome {
    /// The target condition held after `rounds` outer rounds (zero when it
    /// held before the first round).
    Satisfied {
        /// Rounds used.
        rounds: u32,
    },
    /// The budget ran out with entities still outstanding.
    Exhausted {
        /// Rounds used.
        rounds: u32,
        /// Entities (or group names) that never met the condition.
        outstanding: BTreeSet<String>,
    },
}

impl WaitOutcome {
    /// Returns `true` when the target condition held.
    #[must_use]
    pub const fn is_satisfied(&self) -> bool {
        matches!(self, Self::Satisfied { .. })
    }

    /// Rounds used by the wait.
    #[must_use]
    pub const fn rounds(&self) -> u32 {
        match self {
            Self::Satisfied { rounds } | Self::Exhausted { rounds, .. } => *rounds,
        }
    }

    /// Entities left outstanding, empty when satisfied.
    #[must_use]
    pub fn outstanding(&self) -> BTreeSet<String> {
        match self {
            Self::Satisfied { .. } => BTreeSet::new(),
            Self::Exhausted { outstanding, .. } => outstanding.clone(),
        }
    }
}

/// Errors raised by the waiters.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum WaitError {
    /// Raised when a job ends in any status other than `Completed`.
    #[error("{phase}: job {job_id} finished with status {status}")]
    JobFailed {
        /// Phase that was waiting on the job.
        phase: WaitPhase,
        /// Job identifier.
        job_id: JobId,
        /// Terminal status reported for the job.
        status: JobStatus,
    },
    /// Raised when a remote query fails.
    #[error("{phase}: {source}")]
    Remote {
        /// Phase that issued the query.
        phase: WaitPhase,
        /// Underlying remote failure.
        #[source]
        source: RemoteError,
    },
    /// Raised when the caller cancels the wait.
    #[error("{phase}: wait cancelled")]
    Cancelled {
        /// Phase that was cancelled.
        phase: WaitPhase,
    },
}

impl WaitError {
    fn remote(phase: WaitPhase) -> impl Fn(RemoteError) -> Self {
        move |source| Self::Remote { phase, source }
    }
}

pub(crate) fn ensure_active(
    cancel: &CancellationToken,
    phase: WaitPhase,
) -> Result<(), WaitError> {
    if cancel.is_cancelled() {
        return Err(WaitError::Cancelled { phase });
    }
    Ok(())
}

/// Sleeps for `interval` unless the token is cancelled first.
pub(crate) async fn pause(
    cancel: &CancellationToken,
    interval: Duration,
    phase: WaitPhase,
) -> Result<(), WaitError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(WaitError::Cancelled { phase }),
        () = sleep(interval) => Ok(()),
    }
}

/// Blocks until `id` finishes and requires it to have completed cleanly.
pub(crate) async fn await_job<J>(
    jobs: &J,
    id: &JobId,
    cancel: &CancellationToken,
    phase: WaitPhase,
) -> Result<JobSnapshot, WaitError>
where
    J: JobControl + ?Sized,
{
    info!(%phase, job_id = %id, "waiting for job to finish");
    let finished = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(WaitError::Cancelled { phase }),
        result = jobs.wait_for_completion(id) => result.map_err(WaitError::remote(phase))?,
    };

    if finished.status != JobStatus::Completed {
        error!(%phase, job_id = %id, status = %finished.status, "job did not complete");
        return Err(WaitError::JobFailed {
            phase,
            job_id: id.clone(),
            status: finished.status,
        });
    }
    info!(%phase, job_id = %id, "job completed");
    Ok(finished)
}
