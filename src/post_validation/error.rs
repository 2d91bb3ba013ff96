//! Errors raised by the post-validation sequence.

use std::fmt;

use thiserror::Error;

use crate::entity::Entity;
use crate::remote::RemoteError;

/// Step of the post-validation sequence that produced a failure.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ValidationStep {
    /// Destination power state before any action.
    PowerState,
    /// Sync status of the pair.
    SyncStatus,
    /// Failover status of the pair.
    FailoverStatus,
    /// Attribution of the supplied backup job to the pair.
    BackupAttribution,
    /// Backup proxy hook.
    BackupProxy,
    /// Differencing artifacts hook.
    DifferencingArtifacts,
    /// Disk-differencing destination must not be deployed.
    DestinationAbsent,
    /// Warm-sync hook.
    WarmSync,
    /// Last replication job and its monitoring entry.
    ReplicationJob,
    /// Incremental replication size bound.
    ReplicationSize,
    /// Replication proxy hook.
    ReplicationProxy,
    /// Destination power-on.
    PowerOn,
    /// Guest boot hook.
    Boot,
    /// Destination metadata refresh.
    Metadata,
    /// Configuration comparison hook.
    Configuration,
    /// Test data hook.
    TestData,
    /// Destination power-off.
    PowerOff,
}

impl ValidationStep {
    /// Returns a short label for logs and error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PowerState => "power state",
            Self::SyncStatus => "sync status",
            Self::FailoverStatus => "failover status",
            Self::BackupAttribution => "backup attribution",
            Self::BackupProxy => "backup proxy",
            Self::DifferencingArtifacts => "differencing artifacts",
            Self::DestinationAbsent => "destination absent",
            Self::WarmSync => "warm sync",
            Self::ReplicationJob => "replication job",
            Self::ReplicationSize => "replication size",
            Self::ReplicationProxy => "replication proxy",
            Self::PowerOn => "power on",
            Self::Boot => "boot",
            Self::Metadata => "metadata refresh",
            Self::Configuration => "configuration",
            Self::TestData => "test data",
            Self::PowerOff => "power off",
        }
    }
}

impl fmt::Display for ValidationStep {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Failure of one entity's post-validation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ValidationError {
    /// An observed value differs from the expected one.
    #[error("{entity}: {step} expected {expected}, found {actual}")]
    Mismatch {
        /// Source id of the entity.
        entity: String,
        /// Failing step.
        step: ValidationStep,
        /// Expected value.
        expected: String,
        /// Observed value.
        actual: String,
    },
    /// A check rejected the pair.
    #[error("{entity}: {step} failed: {message}")]
    Failed {
        /// Source id of the entity.
        entity: String,
        /// Failing step.
        step: ValidationStep,
        /// Reason given by the check.
        message: String,
    },
    /// A remote call made by the step failed.
    #[error("{entity}: {step}: {source}")]
    Remote {
        /// Source id of the entity.
        entity: String,
        /// Failing step.
        step: ValidationStep,
        /// Underlying remote failure.
        #[source]
        source: RemoteError,
    },
    /// The caller cancelled while the step was waiting.
    #[error("{entity}: cancelled during {step}")]
    Cancelled {
        /// Source id of the entity.
        entity: String,
        /// Step that was waiting.
        step: ValidationStep,
    },
    /// Validation failed with the destination powered on, and powering it
    /// back off failed too.
    #[error("{failure}; power-off afterwards also failed: {power_off}")]
    PowerOffAfterFailure {
        /// Validation failure that triggered the power-off.
        #[source]
        failure: Box<ValidationError>,
        /// Power-off failure.
        power_off: RemoteError,
    },
}

impl ValidationError {
    /// Source id of the entity that failed.
    #[must_use]
    pub fn entity(&self) -> &str {
        match self {
            Self::Mismatch { entity, .. }
            | Self::Failed { entity, .. }
            | Self::Remote { entity, .. }
            | Self::Cancelled { entity, .. } => entity,
            Self::PowerOffAfterFailure { failure, .. } => failure.entity(),
        }
    }

    /// Step that failed. For a failed power-off after a failure this is the
    /// step of the first failure.
    #[must_use]
    pub fn step(&self) -> ValidationStep {
        match self {
            Self::Mismatch { step, .. }
            | Self::Failed { step, .. }
            | Self::Remote { step, .. }
            | Self::Cancelled { step, .. } => *step,
            Self::PowerOffAfterFailure { failure, .. } => failure.step(),
        }
    }

    pub(crate) fn mismatch(
        entity: &Entity,
        step: ValidationStep,
        expected: impl fmt::Display,
        actual: impl fmt::Display,
    ) -> Self {
        Self::Mismatch {
            entity: entity.source_id().to_owned(),
            step,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub(crate) fn failed(entity: &Entity, step: ValidationStep, message: impl Into<String>) -> Self {
        Self::Failed {
            entity: entity.source_id().to_owned(),
            step,
            message: message.into(),
        }
    }
}
