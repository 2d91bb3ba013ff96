//! Validation hooks supplied by the caller.
//!
//! The hooks cover checks that depend on the hypervisor or cloud vendor
//! behind a replication group: proxy selection, vendor artifacts, guest boot,
//! and guest content. The post-validation sequence decides which hooks run
//! for a pair; the hooks only decide whether the pair passes.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::entity::Entity;
use crate::job::JobSnapshot;
use crate::remote::RemoteError;

/// Failure reported by a validation hook.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CheckError {
    /// The hook could not reach the system it inspects.
    #[error(transparent)]
    Remote(#[from] RemoteError),
    /// The pair did not pass the check.
    #[error("{0}")]
    Failed(String),
}

impl CheckError {
    /// Creates a business validation failure.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Future returned by validation hooks.
pub type CheckFuture<'a> = Pin<Box<dyn Future<Output = Result<(), CheckError>> + Send + 'a>>;

/// Per-pair validation hooks.
pub trait PairChecks: Send + Sync {
    /// Checks that the backup ran through the expected proxy.
    fn validate_backup_proxy<'a>(
        &'a self,
        entity: &'a Entity,
        backup_job: &'a JobSnapshot,
    ) -> CheckFuture<'a>;

    /// Checks the differencing artifacts of a disk-differencing pair.
    fn validate_differencing_artifacts<'a>(&'a self, entity: &'a Entity) -> CheckFuture<'a>;

    /// Runs warm-sync specific validation.
    fn validate_warm_sync<'a>(&'a self, entity: &'a Entity) -> CheckFuture<'a>;

    /// Checks that the replication job is reflected in the monitoring system
    /// with the expected level.
    fn validate_replication_monitoring<'a>(
        &'a self,
        entity: &'a Entity,
        replication_job: &'a JobSnapshot,
        full_replication: bool,
    ) -> CheckFuture<'a>;

    /// Checks that the replication ran through the expected proxy.
    fn validate_replication_proxy<'a>(
        &'a self,
        entity: &'a Entity,
        replication_job: &'a JobSnapshot,
    ) -> CheckFuture<'a>;

    /// Checks that the powered-on destination booted.
    fn validate_boot<'a>(&'a self, entity: &'a Entity) -> CheckFuture<'a>;

    /// Compares hardware and advanced configuration of source and destination.
    fn validate_configuration<'a>(&'a self, entity: &'a Entity) -> CheckFuture<'a>;

    /// Checks that user test content is present (or absent) on the destination.
    fn validate_test_data<'a>(&'a self, entity: &'a Entity, expect_present: bool)
    -> CheckFuture<'a>;
}
