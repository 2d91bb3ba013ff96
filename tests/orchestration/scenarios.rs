//! BDD scenarios for replication-group orchestration.

use rstest_bdd_macros::scenario;

use super::test_helpers::{OrchestrationContext, orchestration_context};

#[scenario(
    path = "tests/features/orchestration.feature",
    name = "One backup job covers every entity"
)]
fn scenario_single_backup(orchestration_context: OrchestrationContext) {
    let _ = orchestration_context;
}

#[scenario(
    path = "tests/features/orchestration.feature",
    name = "An in-progress replication is awaited"
)]
fn scenario_in_progress_replication(orchestration_context: OrchestrationContext) {
    let _ = orchestration_context;
}

#[scenario(
    path = "tests/features/orchestration.feature",
    name = "A warm-sync pair is never booted"
)]
fn scenario_warm_sync(orchestration_context: OrchestrationContext) {
    let _ = orchestration_context;
}

#[scenario(
    path = "tests/features/orchestration.feature",
    name = "A backup completed with errors fails the run"
)]
fn scenario_backup_with_errors(orchestration_context: OrchestrationContext) {
    let _ = orchestration_context;
}

#[scenario(
    path = "tests/features/orchestration.feature",
    name = "A full replication is reported to the monitoring hook"
)]
fn scenario_full_replication(orchestration_context: OrchestrationContext) {
    let _ = orchestration_context;
}

#[scenario(
    path = "tests/features/orchestration.feature",
    name = "Strict budgets fail on a missing pair registration"
)]
fn scenario_strict_budgets(orchestration_context: OrchestrationContext) {
    let _ = orchestration_context;
}
