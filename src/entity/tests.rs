//! Unit tests for the entity registry and group builder.

use super::*;
use crate::test_support::ScriptedSite;
use rstest::{fixture, rstest};

fn entity(source_id: &str) -> Entity {
    Entity::new(source_id, format!("{source_id}-dr").as_str(), EntityModes::standard())
}

#[fixture]
fn builder() -> GroupBuilder {
    Group::builder()
        .name(" group-1 ")
        .source_system("hv-01")
        .subclient_id("sc-7")
}

#[rstest]
fn build_trims_fields_and_keeps_entity_order(builder: GroupBuilder) {
    let group = builder
        .entity(entity("vm-b"))
        .entity(entity("vm-a"))
        .build()
        .expect("group should build");

    assert_eq!(group.name(), "group-1");
    let order: Vec<&str> = group.registry().iter().map(Entity::source_id).collect();
    assert_eq!(order, ["vm-b", "vm-a"]);
}

#[rstest]
fn build_rejects_duplicate_source_ids(builder: GroupBuilder) {
    let err = builder
        .entity(entity("vm-a"))
        .entity(Entity::new(" vm-a ", "other", EntityModes::standard()))
        .build()
        .expect_err("duplicate should fail");
    assert_eq!(
        err,
        GroupError::DuplicateEntity {
            source_id: String::from("vm-a")
        }
    );
}

#[rstest]
fn build_requires_entities(builder: GroupBuilder) {
    let err = builder.build().expect_err("empty group should fail");
    assert_eq!(
        err,
        GroupError::NoEntities {
            group: String::from("group-1")
        }
    );
}

#[rstest]
#[case("name", Group::builder().source_system("hv").subclient_id("sc"))]
#[case("source_system", Group::builder().name("g").subclient_id("sc"))]
#[case("subclient_id", Group::builder().name("g").source_system("hv").subclient_id("  "))]
fn build_rejects_blank_fields(#[case] field: &str, #[case] partial: GroupBuilder) {
    let err = partial
        .entity(entity("vm-a"))
        .build()
        .expect_err("blank field should fail");
    assert_eq!(err, GroupError::EmptyField(field.to_owned()));
}

#[rstest]
fn registry_rejects_blank_destination() {
    let err = EntityRegistry::from_entities([Entity::new("vm-a", " ", EntityModes::standard())])
        .expect_err("blank destination should fail");
    assert!(matches!(err, GroupError::EmptyField(ref field) if field.contains("vm-a")));
}

#[rstest]
fn in_progress_job_requires_sync_in_progress() {
    let mut vm = entity("vm-a");
    vm.apply(PairObservation::with_status(SyncStatus::InSync).replication_job("r-1"));
    assert_eq!(vm.in_progress_job(), None);
    assert_eq!(vm.last_replication_job_id(), Some(&JobId::from("r-1")));

    vm.apply(PairObservation::with_status(SyncStatus::SyncInProgress).replication_job("r-2"));
    assert_eq!(vm.in_progress_job(), Some(&JobId::from("r-2")));
}

#[rstest]
fn pending_sync_lists_non_terminal_entities() {
    let mut registry =
        EntityRegistry::from_entities([entity("vm-a"), entity("vm-b"), entity("vm-c")])
            .expect("registry should build");
    let observations = [
        SyncStatus::InSync,
        SyncStatus::SyncInProgress,
        SyncStatus::Unknown,
    ];
    for (vm, status) in registry.entities.iter_mut().zip(observations) {
        vm.apply(PairObservation::with_status(status));
    }

    assert_eq!(
        registry.pending_sync(),
        BTreeSet::from([String::from("vm-b"), String::from("vm-c")])
    );
    assert!(registry.any_in_progress());
}

#[tokio::test]
async fn refresh_all_is_idempotent_when_nothing_changes() {
    let site = ScriptedSite::new();
    site.set_pair(
        "vm-a",
        PairObservation::with_status(SyncStatus::InSync).replication_job("r-1"),
    );
    site.set_pair("vm-b", PairObservation::with_status(SyncStatus::SyncDisabled));
    let mut registry = EntityRegistry::from_entities([entity("vm-a"), entity("vm-b")])
        .expect("registry should build");

    registry.refresh_all(&site).await.expect("first refresh");
    let first = registry.clone();
    registry.refresh_all(&site).await.expect("second refresh");

    assert_eq!(registry, first);
    assert!(registry.pending_sync().is_empty());
}

#[tokio::test]
async fn failed_refresh_keeps_previous_observation() {
    let site = ScriptedSite::new();
    site.set_pair("vm-a", PairObservation::with_status(SyncStatus::InSync));
    let mut vm = entity("vm-a");
    vm.refresh(&site).await.expect("refresh should succeed");

    site.fail(crate::test_support::SiteOperation::Observe);
    vm.refresh(&site).await.expect_err("refresh should fail");

    assert_eq!(vm.sync_status(), SyncStatus::InSync);
}
