//! Per-entity validation once backup and replication are confirmed.
//!
//! The sequence is fixed: destination power state, sync status, optional
//! backup attribution, then exactly one mode branch. Disk-differencing pairs
//! check their artifacts and that nothing is deployed; warm-sync pairs run
//! the warm-sync hook; every other pair checks its replication job and then
//! boots the destination to inspect it before powering it back off.

mod error;

use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::checks::{CheckError, PairChecks};
use crate::destination::{DestinationControl, PowerState};
use crate::entity::{Entity, FailoverStatus, SyncStatus};
use crate::job::{JobControl, JobKind, JobSnapshot, JobStatus};
use crate::options::{ReplicationJobType, ValidationOptions};
use crate::remote::RemoteError;
use crate::status::{PairObservation, StatusSource};

pub use error::{ValidationError, ValidationStep};

/// Allowance on top of the backup size before an incremental replication
/// counts as having copied too much.
pub const REPLICATION_SIZE_ALLOWANCE: u64 = 100 * 1024 * 1024;

/// Branch of the post-validation sequence that ran for an entity.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ValidationBranch {
    /// Differencing artifacts checked; no destination deployed.
    DiskDifferencing,
    /// Warm-sync validation.
    WarmSync,
    /// Replication job checks followed by a boot of the destination.
    Standard,
}

impl ValidationBranch {
    /// Selects the branch for the given mode flags.
    #[must_use]
    pub const fn for_entity(entity: &Entity) -> Self {
        let modes = entity.modes();
        if modes.disk_differencing {
            Self::DiskDifferencing
        } else if modes.warm_sync {
            Self::WarmSync
        } else {
            Self::Standard
        }
    }
}

/// Runs the post-validation sequence for one entity at a time.
#[derive(Debug)]
pub struct PostValidator<'a, J: ?Sized, S: ?Sized, D: ?Sized, C: ?Sized> {
    jobs: &'a J,
    status: &'a S,
    destinations: &'a D,
    checks: &'a C,
    settle: Duration,
}

impl<'a, J, S, D, C> PostValidator<'a, J, S, D, C>
where
    J: JobControl + ?Sized,
    S: StatusSource + ?Sized,
    D: DestinationControl + ?Sized,
    C: PairChecks + ?Sized,
{
    /// Creates a validator. `settle` is how long a freshly powered-on
    /// destination is given before it is inspected.
    #[must_use]
    pub const fn new(
        jobs: &'a J,
        status: &'a S,
        destinations: &'a D,
        checks: &'a C,
        settle: Duration,
    ) -> Self {
        Self {
            jobs,
            status,
            destinations,
            checks,
            settle,
        }
    }

    /// Validates `entity` and returns the branch that ran.
    ///
    /// The entity's state is re-read from the status source rather than
    /// trusted from the registry, and the registry is not modified.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] naming the entity and the step on the
    /// first failing check. No step is retried.
    pub async fn validate(
        &self,
        entity: &Entity,
        options: &ValidationOptions,
        cancel: &CancellationToken,
    ) -> Result<ValidationBranch, ValidationError> {
        let branch = ValidationBranch::for_entity(entity);
        info!(entity = entity.source_id(), ?branch, "post-validation started");

        self.validate_power_state(entity, branch).await?;
        let observation = self.validate_sync_status(entity, options).await?;
        let backup_job = self.validate_backup(entity, options).await?;

        match branch {
            ValidationBranch::DiskDifferencing => {
                self.validate_differencing(entity).await?;
            }
            ValidationBranch::WarmSync => {
                self.checks
                    .validate_warm_sync(entity)
                    .await
                    .map_err(|err| ValidationError::from_check(entity, ValidationStep::WarmSync, err))?;
            }
            ValidationBranch::Standard => {
                self.validate_replication(entity, &observation, backup_job.as_ref(), options)
                    .await?;
                self.inspect_destination(entity, options, cancel).await?;
            }
        }

        info!(entity = entity.source_id(), ?branch, "post-validation passed");
        Ok(branch)
    }

    async fn validate_power_state(
        &self,
        entity: &Entity,
        branch: ValidationBranch,
    ) -> Result<(), ValidationError> {
        let expected = match branch {
            ValidationBranch::DiskDifferencing => PowerState::NotDeployed,
            ValidationBranch::WarmSync | ValidationBranch::Standard => PowerState::Off,
        };
        let actual = self
            .destinations
            .power_state(entity.destination())
            .await
            .map_err(|err| ValidationError::remote(entity, ValidationStep::PowerState, err))?;
        if actual != expected {
            return Err(ValidationError::mismatch(
                entity,
                ValidationStep::PowerState,
                expected,
                actual,
            ));
        }
        Ok(())
    }

    async fn validate_sync_status(
        &self,
        entity: &Entity,
        options: &ValidationOptions,
    ) -> Result<PairObservation, ValidationError> {
        let observation = self
            .status
            .observe(entity.source_id())
            .await
            .map_err(|err| ValidationError::remote(entity, ValidationStep::SyncStatus, err))?;

        if options.operation.is_failover() {
            if observation.sync_status != SyncStatus::SyncDisabled {
                return Err(ValidationError::mismatch(
                    entity,
                    ValidationStep::SyncStatus,
                    SyncStatus::SyncDisabled,
                    observation.sync_status,
                ));
            }
            return Ok(observation);
        }

        if observation.sync_status != SyncStatus::InSync {
            return Err(ValidationError::mismatch(
                entity,
                ValidationStep::SyncStatus,
                SyncStatus::InSync,
                observation.sync_status,
            ));
        }
        if !matches!(
            observation.failover_status,
            FailoverStatus::None | FailoverStatus::FailbackComplete
        ) {
            return Err(ValidationError::mismatch(
                entity,
                ValidationStep::FailoverStatus,
                "NONE or FAILBACK_COMPLETE",
                observation.failover_status,
            ));
        }
        Ok(observation)
    }

    async fn validate_backup(
        &self,
        entity: &Entity,
        options: &ValidationOptions,
    ) -> Result<Option<JobSnapshot>, ValidationError> {
        let Some(backup_job_id) = options.backup_job_id.as_ref() else {
            return Ok(None);
        };
        let step = ValidationStep::BackupAttribution;
        let job = self
            .jobs
            .get_job(backup_job_id)
            .await
            .map_err(|err| ValidationError::remote(entity, step, err))?;
        if job.status != JobStatus::Completed {
            return Err(ValidationError::mismatch(
                entity,
                step,
                JobStatus::Completed,
                job.status,
            ));
        }
        if !job.covers(entity.source_id()) {
            return Err(ValidationError::failed(
                entity,
                step,
                format!("backup job {} does not cover the entity", job.id),
            ));
        }
        self.checks
            .validate_backup_proxy(entity, &job)
            .await
            .map_err(|err| ValidationError::from_check(entity, ValidationStep::BackupProxy, err))?;
        Ok(Some(job))
    }

    async fn validate_differencing(&self, entity: &Entity) -> Result<(), ValidationError> {
        self.checks
            .validate_differencing_artifacts(entity)
            .await
            .map_err(|err| {
                ValidationError::from_check(entity, ValidationStep::DifferencingArtifacts, err)
            })?;
        let deployed = self
            .destinations
            .exists(entity.destination())
            .await
            .map_err(|err| ValidationError::remote(entity, ValidationStep::DestinationAbsent, err))?;
        if deployed {
            return Err(ValidationError::failed(
                entity,
                ValidationStep::DestinationAbsent,
                format!("destination {} is deployed", entity.destination()),
            ));
        }
        Ok(())
    }

    async fn validate_replication(
        &self,
        entity: &Entity,
        observation: &PairObservation,
        backup_job: Option<&JobSnapshot>,
        options: &ValidationOptions,
    ) -> Result<(), ValidationError> {
        let step = ValidationStep::ReplicationJob;
        let Some(job_id) = observation.last_replication_job_id.as_ref() else {
            return Err(ValidationError::failed(
                entity,
                step,
                "no replication job recorded for the pair",
            ));
        };
        let job = self
            .jobs
            .get_job(job_id)
            .await
            .map_err(|err| ValidationError::remote(entity, step, err))?;
        if job.kind != JobKind::Replication {
            return Err(ValidationError::failed(
                entity,
                step,
                format!("job {} is not a replication job", job.id),
            ));
        }
        if job.status != JobStatus::Completed {
            return Err(ValidationError::mismatch(
                entity,
                step,
                JobStatus::Completed,
                job.status,
            ));
        }

        if let Some(backup_job) = backup_job {
            validate_synced_backup(entity, observation, backup_job)?;
        }

        self.checks
            .validate_replication_monitoring(entity, &job, options.full_replication())
            .await
            .map_err(|err| ValidationError::from_check(entity, step, err))?;

        if options.job_type == ReplicationJobType::Incremental && options.check_replication_size {
            validate_replication_size(entity, &job, backup_job)?;
        }

        self.checks
            .validate_replication_proxy(entity, &job)
            .await
            .map_err(|err| ValidationError::from_check(entity, ValidationStep::ReplicationProxy, err))
    }

    /// Powers the destination on, inspects it, and powers it off again. A
    /// failed inspection still attempts the power-off.
    async fn inspect_destination(
        &self,
        entity: &Entity,
        options: &ValidationOptions,
        cancel: &CancellationToken,
    ) -> Result<(), ValidationError> {
        let destination = entity.destination();
        self.destinations
            .power_on(destination)
            .await
            .map_err(|err| ValidationError::remote(entity, ValidationStep::PowerOn, err))?;
        info!(entity = entity.source_id(), %destination, "destination powered on");

        if let Err(err) = self.inspect_running(entity, options, cancel).await {
            return Err(self.power_off_after_failure(entity, err).await);
        }

        self.destinations
            .power_off(destination)
            .await
            .map_err(|err| ValidationError::remote(entity, ValidationStep::PowerOff, err))?;
        info!(entity = entity.source_id(), %destination, "destination powered off");
        Ok(())
    }

    async fn inspect_running(
        &self,
        entity: &Entity,
        options: &ValidationOptions,
        cancel: &CancellationToken,
    ) -> Result<(), ValidationError> {
        debug!(entity = entity.source_id(), settle = ?self.settle, "waiting for destination to settle");
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(ValidationError::Cancelled {
                    entity: entity.source_id().to_owned(),
                    step: ValidationStep::Boot,
                });
            }
            () = sleep(self.settle) => {}
        }

        self.checks
            .validate_boot(entity)
            .await
            .map_err(|err| ValidationError::from_check(entity, ValidationStep::Boot, err))?;
        self.destinations
            .refresh_metadata(entity.destination())
            .await
            .map_err(|err| ValidationError::remote(entity, ValidationStep::Metadata, err))?;
        self.checks
            .validate_configuration(entity)
            .await
            .map_err(|err| ValidationError::from_check(entity, ValidationStep::Configuration, err))?;
        if options.validate_test_data {
            self.checks
                .validate_test_data(entity, options.test_data)
                .await
                .map_err(|err| ValidationError::from_check(entity, ValidationStep::TestData, err))?;
        }
        Ok(())
    }

    async fn power_off_after_failure(
        &self,
        entity: &Entity,
        failure: ValidationError,
    ) -> ValidationError {
        match self.destinations.power_off(entity.destination()).await {
            Ok(()) => failure,
            Err(power_off) => {
                warn!(entity = entity.source_id(), error = %power_off, "power-off after failed validation also failed");
                ValidationError::PowerOffAfterFailure {
                    failure: Box::new(failure),
                    power_off,
                }
            }
        }
    }
}

/// The last replication must have carried the attributed backup, not an
/// older one.
fn validate_synced_backup(
    entity: &Entity,
    observation: &PairObservation,
    backup_job: &JobSnapshot,
) -> Result<(), ValidationError> {
    if observation.last_synced_backup_job.as_ref() == Some(&backup_job.id) {
        return Ok(());
    }
    let actual = observation
        .last_synced_backup_job
        .as_ref()
        .map_or_else(|| String::from("no synced backup"), |id| format!("backup job {id}"));
    Err(ValidationError::mismatch(
        entity,
        ValidationStep::ReplicationJob,
        format!("backup job {}", backup_job.id),
        actual,
    ))
}

/// Bounds an incremental replication by the backup it follows. Skipped when
/// either side does not report a size.
fn validate_replication_size(
    entity: &Entity,
    replication_job: &JobSnapshot,
    backup_job: Option<&JobSnapshot>,
) -> Result<(), ValidationError> {
    let Some(backup_size) = backup_job.and_then(|job| job.application_size) else {
        return Ok(());
    };
    let Some(replicated) = replication_job.application_size else {
        return Ok(());
    };
    let limit = backup_size.saturating_add(REPLICATION_SIZE_ALLOWANCE);
    if replicated >= limit {
        return Err(ValidationError::mismatch(
            entity,
            ValidationStep::ReplicationSize,
            format!("less than {limit} bytes"),
            format!("{replicated} bytes"),
        ));
    }
    Ok(())
}

impl ValidationError {
    fn from_check(entity: &Entity, step: ValidationStep, err: CheckError) -> Self {
        match err {
            CheckError::Remote(source) => Self::remote(entity, step, source),
            CheckError::Failed(message) => Self::failed(entity, step, message),
        }
    }

    fn remote(entity: &Entity, step: ValidationStep, source: RemoteError) -> Self {
        Self::Remote {
            entity: entity.source_id().to_owned(),
            step,
            source,
        }
    }
}
