//! BDD step definitions for replication-group orchestration.

use replcheck::test_support::{CheckHook, ScriptedJob, SiteOperation};
use replcheck::{
    Entity, EntityModes, JobStatus, OrchestrationError, OrchestrationReport, PairObservation,
    ReplicationJobType, ReplicationOrchestrator, SyncStatus, ValidationBranch, WaitError,
};
use rstest_bdd_macros::{given, then, when};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

use super::test_helpers::{OrchestrationContext, RunOutcome, SUBCLIENT_ID};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn destination_for(source_id: &str) -> String {
    format!("{source_id}-dr")
}

#[given("a group with standard entities \"{first}\" and \"{second}\"")]
fn group_with_standard_entities(
    orchestration_context: OrchestrationContext,
    first: String,
    second: String,
) -> OrchestrationContext {
    for source_id in [first, second] {
        let destination = destination_for(&source_id);
        orchestration_context.add_entity(Entity::new(
            source_id,
            destination.as_str(),
            EntityModes::standard(),
        ));
    }
    orchestration_context
}

#[given("a group with a warm-sync entity \"{source_id}\"")]
fn group_with_warm_sync_entity(
    orchestration_context: OrchestrationContext,
    source_id: String,
) -> OrchestrationContext {
    let destination = destination_for(&source_id);
    orchestration_context.add_entity(Entity::new(
        source_id,
        destination.as_str(),
        EntityModes::standard().warm_sync(true),
    ));
    orchestration_context
}

#[given("an active backup job \"{job_id}\" covering \"{first}\" and \"{second}\"")]
fn active_backup_job(
    orchestration_context: OrchestrationContext,
    job_id: String,
    first: String,
    second: String,
) -> OrchestrationContext {
    orchestration_context.site.add_job(ScriptedJob::backup(
        job_id.as_str(),
        SUBCLIENT_ID,
        &[first.as_str(), second.as_str()],
    ));
    orchestration_context
}

#[given("backup job \"{job_id}\" finishes with errors")]
fn backup_job_finishes_with_errors(
    orchestration_context: OrchestrationContext,
    job_id: String,
) -> OrchestrationContext {
    let covered = orchestration_context.source_ids();
    let covered: Vec<&str> = covered.iter().map(String::as_str).collect();
    orchestration_context.site.add_job(
        ScriptedJob::backup(job_id.as_str(), SUBCLIENT_ID, &covered)
            .finishes_with(JobStatus::CompletedWithErrors),
    );
    orchestration_context
}

#[given("every entity has already been backed up")]
fn every_entity_backed_up(orchestration_context: OrchestrationContext) -> OrchestrationContext {
    let known = orchestration_context.source_ids();
    let known: Vec<&str> = known.iter().map(String::as_str).collect();
    orchestration_context.site.mark_known(&known);
    orchestration_context
}

#[given("every pair is in sync after replication job \"{job_id}\"")]
fn every_pair_in_sync(
    orchestration_context: OrchestrationContext,
    job_id: String,
) -> OrchestrationContext {
    let source_ids = orchestration_context.source_ids();
    for source_id in &source_ids {
        orchestration_context.site.set_pair(
            source_id,
            PairObservation::with_status(SyncStatus::InSync).replication_job(job_id.as_str()),
        );
    }
    let covered: Vec<&str> = source_ids.iter().map(String::as_str).collect();
    orchestration_context
        .site
        .add_job(ScriptedJob::replication(job_id.as_str(), &covered).finished());
    orchestration_context
}

#[given("\"{source_id}\" is replicating through job \"{job_id}\"")]
fn entity_replicating(
    orchestration_context: OrchestrationContext,
    source_id: String,
    job_id: String,
) -> OrchestrationContext {
    orchestration_context.site.set_pair(
        &source_id,
        PairObservation::with_status(SyncStatus::SyncInProgress).replication_job(job_id.as_str()),
    );
    orchestration_context
        .site
        .add_job(ScriptedJob::replication(job_id.as_str(), &[source_id.as_str()]));
    orchestration_context
}

#[given("the replication job type is \"{job_type}\"")]
fn replication_job_type(
    orchestration_context: OrchestrationContext,
    job_type: String,
) -> OrchestrationContext {
    let parsed: ReplicationJobType = job_type
        .parse()
        .unwrap_or_else(|err| panic!("scenario job type should parse: {err}"));
    orchestration_context.update_options(|options| options.job_type = parsed);
    orchestration_context
}

#[given("the pair registration never appears")]
fn registration_never_appears(orchestration_context: OrchestrationContext) -> OrchestrationContext {
    orchestration_context.site.registration_visible_after(None);
    orchestration_context
}

#[given("wait budgets are strict")]
fn strict_budgets(orchestration_context: OrchestrationContext) -> OrchestrationContext {
    orchestration_context.make_strict();
    orchestration_context
}

#[when("the orchestration runs")]
fn run_orchestration(
    orchestration_context: OrchestrationContext,
) -> Result<OrchestrationContext, StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))?;
    let orchestrator = ReplicationOrchestrator::new(
        orchestration_context.site.clone(),
        orchestration_context.site.clone(),
        orchestration_context.site.clone(),
        orchestration_context.checks.clone(),
    )
    .with_policies(orchestration_context.policies());
    let mut group = orchestration_context.group();
    let options = orchestration_context.options();

    let result = runtime.block_on(async {
        orchestrator
            .execute(&mut group, &options, &CancellationToken::new())
            .await
    });
    orchestration_context.record_outcome(match result {
        Ok(report) => RunOutcome::Passed(report),
        Err(err) => RunOutcome::Failed(err),
    });
    Ok(orchestration_context)
}

fn passed(
    orchestration_context: &OrchestrationContext,
) -> Result<OrchestrationReport, StepError> {
    match orchestration_context.outcome() {
        Some(RunOutcome::Passed(report)) => Ok(report),
        Some(RunOutcome::Failed(err)) => Err(StepError::Assertion(format!(
            "expected success, got failure: {err}"
        ))),
        None => Err(StepError::Assertion(String::from("missing outcome"))),
    }
}

fn failed(orchestration_context: &OrchestrationContext) -> Result<OrchestrationError, StepError> {
    match orchestration_context.outcome() {
        Some(RunOutcome::Failed(err)) => Ok(err),
        Some(RunOutcome::Passed(report)) => Err(StepError::Assertion(format!(
            "expected failure, got success: {report:?}"
        ))),
        None => Err(StepError::Assertion(String::from("missing outcome"))),
    }
}

#[then("the run succeeds")]
fn run_succeeds(orchestration_context: &OrchestrationContext) -> Result<(), StepError> {
    passed(orchestration_context).map(|_| ())
}

#[then("the backup wait finished after \"{rounds}\" rounds")]
fn backup_rounds(orchestration_context: &OrchestrationContext, rounds: u32) -> Result<(), StepError> {
    let report = passed(orchestration_context)?;
    if report.backup.is_satisfied() && report.backup.rounds() == rounds {
        return Ok(());
    }
    Err(StepError::Assertion(format!(
        "expected backup satisfied after {rounds} rounds, got {:?}",
        report.backup
    )))
}

#[then("the sync wait finished after \"{rounds}\" rounds")]
fn sync_rounds(orchestration_context: &OrchestrationContext, rounds: u32) -> Result<(), StepError> {
    let report = passed(orchestration_context)?;
    if report.sync.is_satisfied() && report.sync.rounds() == rounds {
        return Ok(());
    }
    Err(StepError::Assertion(format!(
        "expected sync satisfied after {rounds} rounds, got {:?}",
        report.sync
    )))
}

#[then("backup job \"{job_id}\" was awaited once")]
fn backup_awaited_once(
    orchestration_context: &OrchestrationContext,
    job_id: String,
) -> Result<(), StepError> {
    let waits = orchestration_context
        .site
        .calls()
        .into_iter()
        .filter(|call| call.operation == SiteOperation::WaitForCompletion && call.target == job_id)
        .count();
    if waits == 1 {
        return Ok(());
    }
    Err(StepError::Assertion(format!(
        "expected one wait on {job_id}, got {waits}"
    )))
}

#[then("replication job \"{job_id}\" completed")]
fn replication_completed(
    orchestration_context: &OrchestrationContext,
    job_id: String,
) -> Result<(), StepError> {
    match orchestration_context.site.job_status(&job_id) {
        Some(JobStatus::Completed) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected {job_id} to be completed, got {other:?}"
        ))),
    }
}

#[then("\"{source_id}\" was validated by the \"{branch}\" branch")]
fn validated_by_branch(
    orchestration_context: &OrchestrationContext,
    source_id: String,
    branch: String,
) -> Result<(), StepError> {
    let expected = match branch.as_str() {
        "disk differencing" => ValidationBranch::DiskDifferencing,
        "warm sync" => ValidationBranch::WarmSync,
        "standard" => ValidationBranch::Standard,
        other => return Err(StepError::Assertion(format!("unknown branch {other}"))),
    };
    let report = passed(orchestration_context)?;
    let actual = report
        .entities
        .iter()
        .find(|entity| entity.source_id == source_id)
        .map(|entity| entity.branch);
    if actual == Some(expected) {
        return Ok(());
    }
    Err(StepError::Assertion(format!(
        "expected {source_id} to take the {branch} branch, got {actual:?}"
    )))
}

#[then("no destination was powered on")]
fn no_power_on(orchestration_context: &OrchestrationContext) -> Result<(), StepError> {
    let power_ons = orchestration_context.site.count(SiteOperation::PowerOn);
    if power_ons == 0 {
        return Ok(());
    }
    Err(StepError::Assertion(format!(
        "expected no power-on calls, got {power_ons}"
    )))
}

#[then("the run fails naming job \"{job_id}\"")]
fn run_fails_naming_job(
    orchestration_context: &OrchestrationContext,
    job_id: String,
) -> Result<(), StepError> {
    let err = failed(orchestration_context)?;
    match err {
        OrchestrationError::Wait(WaitError::JobFailed {
            job_id: ref failed_job,
            ..
        })
            if failed_job.as_str() == job_id =>
        {
            Ok(())
        }
        other => Err(StepError::Assertion(format!(
            "expected job {job_id} to fail the run, got {other}"
        ))),
    }
}

#[then("the monitoring hook saw a full replication for \"{source_id}\"")]
fn monitoring_saw_full(
    orchestration_context: &OrchestrationContext,
    source_id: String,
) -> Result<(), StepError> {
    let flagged = orchestration_context.checks.calls().into_iter().any(|call| {
        call.hook == CheckHook::ReplicationMonitoring
            && call.entity == source_id
            && call.flag == Some(true)
    });
    if flagged {
        return Ok(());
    }
    Err(StepError::Assertion(format!(
        "monitoring hook did not see a full replication for {source_id}"
    )))
}

#[then("the run fails with an exhausted \"{phase}\" budget")]
fn run_fails_with_exhausted_budget(
    orchestration_context: &OrchestrationContext,
    phase: String,
) -> Result<(), StepError> {
    match failed(orchestration_context)? {
        OrchestrationError::BudgetExhausted { phase: exhausted, .. }
            if exhausted.to_string() == phase =>
        {
            Ok(())
        }
        other => Err(StepError::Assertion(format!(
            "expected an exhausted {phase} budget, got {other}"
        ))),
    }
}
