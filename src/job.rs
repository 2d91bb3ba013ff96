//! Job-control interface used to observe backup and replication jobs.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Deserializer};

use crate::remote::RemoteFuture;

/// Identifier assigned to a job by the job-control system.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct JobId(String);

impl JobId {
    /// Wraps a raw job identifier, trimming surrounding whitespace.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into().trim().to_owned())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<u64> for JobId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

// Callers send job ids either as JSON strings or as bare numbers.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawJobId {
    Text(String),
    Number(u64),
}

impl<'de> Deserialize<'de> for JobId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match RawJobId::deserialize(deserializer)? {
            RawJobId::Text(text) => Self::new(text),
            RawJobId::Number(number) => Self::from(number),
        })
    }
}

/// Kind of work a job performs.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum JobKind {
    /// Regular backup of the source system.
    Backup,
    /// Synthetic full backup assembled from earlier backups.
    SyntheticFull,
    /// Replication of backed-up data to the destination.
    Replication,
}

/// Job kinds that count as a backup of an entity.
pub const BACKUP_JOB_KINDS: [JobKind; 2] = [JobKind::Backup, JobKind::SyntheticFull];

/// Lifecycle status of a job.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum JobStatus {
    /// Queued but not yet started.
    Pending,
    /// Actively running.
    Running,
    /// Waiting on a resource.
    Waiting,
    /// Suspended by an operator or schedule.
    Suspended,
    /// Finished successfully.
    Completed,
    /// Finished, but reported one or more errors.
    CompletedWithErrors,
    /// Finished unsuccessfully.
    Failed,
    /// Terminated before finishing.
    Killed,
}

impl JobStatus {
    /// Returns `true` once the job can no longer change status.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::CompletedWithErrors | Self::Failed | Self::Killed
        )
    }

    /// Returns the status label used in logs and error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Waiting => "Waiting",
            Self::Suspended => "Suspended",
            Self::Completed => "Completed",
            Self::CompletedWithErrors => "Completed w/ one or more errors",
            Self::Failed => "Failed",
            Self::Killed => "Killed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Point-in-time view of a job as reported by the job-control system.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JobSnapshot {
    /// Job identifier.
    pub id: JobId,
    /// Kind of work the job performs.
    pub kind: JobKind,
    /// Subclient the job was started for.
    pub subclient_id: String,
    /// Status at the time of the snapshot.
    pub status: JobStatus,
    /// Names of the entities the job covers.
    pub covered_entities: BTreeSet<String>,
    /// Application size in bytes, when the job reports one.
    pub application_size: Option<u64>,
}

impl JobSnapshot {
    /// Returns `true` when the job covers the named entity.
    #[must_use]
    pub fn covers(&self, source_id: &str) -> bool {
        self.covered_entities.contains(source_id)
    }

    /// Returns `true` when the job covers at least one of the given entities.
    #[must_use]
    pub fn covers_any(&self, source_ids: &BTreeSet<String>) -> bool {
        !self.covered_entities.is_disjoint(source_ids)
    }
}

/// Remote job-control system.
pub trait JobControl: Send + Sync {
    /// Lists active jobs of the given kinds running against a source system.
    fn list_active_jobs<'a>(
        &'a self,
        source_system: &'a str,
        kinds: &'a [JobKind],
    ) -> RemoteFuture<'a, Vec<JobSnapshot>>;

    /// Fetches the current snapshot of a job.
    fn get_job<'a>(&'a self, id: &'a JobId) -> RemoteFuture<'a, JobSnapshot>;

    /// Blocks until the job reaches a terminal status and returns its final
    /// snapshot.
    fn wait_for_completion<'a>(&'a self, id: &'a JobId) -> RemoteFuture<'a, JobSnapshot>;
}
