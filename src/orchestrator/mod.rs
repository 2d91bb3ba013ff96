//! End-to-end validation of a replication group.
//!
//! A run walks four phases in order: wait for the first backup of every
//! entity, wait for the pair registration on the destination, wait for every
//! pair to reach a terminal sync status, and finally post-validate each
//! entity in registry order. Any failure stops the run at that point.

use std::collections::BTreeSet;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::checks::PairChecks;
use crate::destination::DestinationControl;
use crate::entity::Group;
use crate::job::JobControl;
use crate::options::ValidationOptions;
use crate::post_validation::{PostValidator, ValidationBranch, ValidationError, ValidationStep};
use crate::status::StatusSource;
use crate::wait::{
    BackupWaiter, PollPolicy, RegistrationWaiter, RoundBudget, SyncWaiter, WaitError, WaitOutcome,
    WaitPhase,
};

const DEFAULT_ROUNDS: u32 = 15;
const DEFAULT_IDLE_POLLS: u32 = 10;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_REGISTRATION_POLLS: u32 = 10;
const DEFAULT_REGISTRATION_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_SETTLE: Duration = Duration::from_secs(120);

/// Budgets and pauses used by a run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct OrchestrationPolicies {
    /// First-backup wait budget.
    pub backup: RoundBudget,
    /// Replication-sync wait budget.
    pub sync: RoundBudget,
    /// Pair-registration wait budget.
    pub registration: PollPolicy,
    /// Pause after powering a destination on.
    pub settle: Duration,
    /// Fail the run when a wait budget runs out.
    pub strict_budgets: bool,
}

impl Default for OrchestrationPolicies {
    fn default() -> Self {
        let idle = PollPolicy::new(DEFAULT_IDLE_POLLS, DEFAULT_POLL_INTERVAL);
        Self {
            backup: RoundBudget::new(DEFAULT_ROUNDS, idle),
            sync: RoundBudget::new(DEFAULT_ROUNDS, idle),
            registration: PollPolicy::new(DEFAULT_REGISTRATION_POLLS, DEFAULT_REGISTRATION_INTERVAL),
            settle: DEFAULT_SETTLE,
            strict_budgets: false,
        }
    }
}

/// Errors surfaced by an orchestration run.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum OrchestrationError {
    /// A wait phase failed.
    #[error(transparent)]
    Wait(#[from] WaitError),
    /// An entity failed post-validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// A wait budget ran out while strict budgets are enabled.
    #[error("{phase} budget exhausted; outstanding: {outstanding:?}")]
    BudgetExhausted {
        /// Phase whose budget ran out.
        phase: WaitPhase,
        /// Entities (or the group name) that never met the condition.
        outstanding: BTreeSet<String>,
    },
}

impl OrchestrationError {
    /// Returns `true` when the run stopped because the caller cancelled it.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Wait(WaitError::Cancelled { .. })
                | Self::Validation(ValidationError::Cancelled { .. })
        )
    }
}

/// Post-validation result for one entity.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EntityReport {
    /// Source id of the entity.
    pub source_id: String,
    /// Branch of the post-validation sequence that ran.
    pub branch: ValidationBranch,
}

/// Summary of a successful run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OrchestrationReport {
    /// Identifier attached to every log line of the run.
    pub run_id: Uuid,
    /// How the first-backup wait ended.
    pub backup: WaitOutcome,
    /// How the pair-registration wait ended.
    pub registration: WaitOutcome,
    /// How the replication-sync wait ended.
    pub sync: WaitOutcome,
    /// Validated entities in registry order.
    pub entities: Vec<EntityReport>,
}

/// Drives a replication group from first backup to validated destinations.
#[derive(Debug)]
pub struct ReplicationOrchestrator<J, S, D, C> {
    jobs: J,
    status: S,
    destinations: D,
    checks: C,
    policies: OrchestrationPolicies,
}

impl<J, S, D, C> ReplicationOrchestrator<J, S, D, C>
where
    J: JobControl,
    S: StatusSource,
    D: DestinationControl,
    C: PairChecks,
{
    /// Creates an orchestrator with the default budgets.
    #[must_use]
    pub fn new(jobs: J, status: S, destinations: D, checks: C) -> Self {
        Self {
            jobs,
            status,
            destinations,
            checks,
            policies: OrchestrationPolicies::default(),
        }
    }

    /// Overrides the budgets and pauses.
    ///
    /// Tests use this to shrink every wait to milliseconds.
    #[must_use]
    pub const fn with_policies(mut self, policies: OrchestrationPolicies) -> Self {
        self.policies = policies;
        self
    }

    /// Budgets in effect.
    #[must_use]
    pub const fn policies(&self) -> &OrchestrationPolicies {
        &self.policies
    }

    /// Runs every phase for `group`.
    ///
    /// Exhausted wait budgets are logged and the run continues, unless
    /// strict budgets are enabled. The group's observed sync state is
    /// refreshed as a side effect.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestrationError::Wait`] when a job fails or a remote
    /// query fails during a wait, [`OrchestrationError::Validation`] for the
    /// first entity that fails post-validation, and
    /// [`OrchestrationError::BudgetExhausted`] under strict budgets.
    pub async fn execute(
        &self,
        group: &mut Group,
        options: &ValidationOptions,
        cancel: &CancellationToken,
    ) -> Result<OrchestrationReport, OrchestrationError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("orchestration", group = group.name(), %run_id);
        self.run(run_id, group, options, cancel)
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        run_id: Uuid,
        group: &mut Group,
        options: &ValidationOptions,
        cancel: &CancellationToken,
    ) -> Result<OrchestrationReport, OrchestrationError> {
        info!(entities = group.registry().len(), "orchestration started");

        let backup = BackupWaiter::new(&self.jobs, &self.status, self.policies.backup)
            .wait_for_first_backup(group, cancel)
            .await?;
        self.settle_budget(WaitPhase::Backup, &backup)?;

        let registration = RegistrationWaiter::new(&self.status, self.policies.registration)
            .wait_for_pair_registration(group.name(), cancel)
            .await?;
        self.settle_budget(WaitPhase::Registration, &registration)?;

        let sync = SyncWaiter::new(&self.jobs, &self.status, self.policies.sync)
            .wait_for_replication_sync(group.registry_mut(), cancel)
            .await?;
        self.settle_budget(WaitPhase::Sync, &sync)?;

        let validator = PostValidator::new(
            &self.jobs,
            &self.status,
            &self.destinations,
            &self.checks,
            self.policies.settle,
        );
        let mut entities = Vec::with_capacity(group.registry().len());
        for entity in group.registry().iter() {
            if cancel.is_cancelled() {
                return Err(ValidationError::Cancelled {
                    entity: entity.source_id().to_owned(),
                    step: ValidationStep::PowerState,
                }
                .into());
            }
            let branch = validator.validate(entity, options, cancel).await?;
            entities.push(EntityReport {
                source_id: entity.source_id().to_owned(),
                branch,
            });
        }

        info!(entities = entities.len(), "orchestration passed");
        Ok(OrchestrationReport {
            run_id,
            backup,
            registration,
            sync,
            entities,
        })
    }

    fn settle_budget(
        &self,
        phase: WaitPhase,
        outcome: &WaitOutcome,
    ) -> Result<(), OrchestrationError> {
        let WaitOutcome::Exhausted { outstanding, .. } = outcome else {
            return Ok(());
        };
        if self.policies.strict_budgets {
            error!(%phase, ?outstanding, "wait budget exhausted");
            return Err(OrchestrationError::BudgetExhausted {
                phase,
                outstanding: outstanding.clone(),
            });
        }
        warn!(%phase, ?outstanding, "wait budget exhausted; continuing");
        Ok(())
    }
}
