//! Validation of disaster-recovery replication groups.
//!
//! The crate drives a replication group through bounded waits (first
//! backup, pair registration, replication sync) and then validates each
//! pair according to its replication mode. Every remote system sits behind a
//! trait ([`JobControl`], [`StatusSource`], [`DestinationControl`],
//! [`PairChecks`]) so the orchestration logic can be exercised against
//! scripted doubles.

pub mod checks;
pub mod config;
pub mod destination;
pub mod entity;
pub mod job;
pub mod options;
pub mod orchestrator;
pub mod post_validation;
pub mod remote;
pub mod status;
pub mod test_support;
pub mod wait;

pub use checks::{CheckError, CheckFuture, PairChecks};
pub use config::{ConfigError, OrchestratorConfig};
pub use destination::{DestinationControl, PowerState};
pub use entity::{
    DestinationRef, Entity, EntityModes, EntityRegistry, FailoverStatus, Group, GroupBuilder,
    GroupError, SyncStatus,
};
pub use job::{BACKUP_JOB_KINDS, JobControl, JobId, JobKind, JobSnapshot, JobStatus};
pub use options::{OptionsError, PairOperation, ReplicationJobType, ValidationOptions};
pub use orchestrator::{
    EntityReport, OrchestrationError, OrchestrationPolicies, OrchestrationReport,
    ReplicationOrchestrator,
};
pub use post_validation::{PostValidator, ValidationBranch, ValidationError, ValidationStep};
pub use remote::{RemoteError, RemoteFuture};
pub use status::{PairObservation, StatusSource};
pub use wait::{
    BackupWaiter, PollPolicy, RegistrationWaiter, RoundBudget, SyncWaiter, WaitError, WaitOutcome,
    WaitPhase,
};
