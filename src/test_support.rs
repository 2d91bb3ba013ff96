//! Test support utilities shared across unit and integration tests.
//!
//! [`ScriptedSite`] stands in for the job-control system, the replication
//! monitor, and the destination platform at once, so a test can script a
//! whole replication site in a few lines. [`RecordingChecks`] records every
//! validation hook call and can be told to fail specific hooks.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::future::{pending, ready};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, MutexGuard};

use crate::checks::{CheckError, CheckFuture, PairChecks};
use crate::destination::{DestinationControl, PowerState};
use crate::entity::{DestinationRef, Entity, SyncStatus};
use crate::job::{JobControl, JobId, JobKind, JobSnapshot, JobStatus};
use crate::remote::{RemoteError, RemoteFuture};
use crate::status::{PairObservation, StatusSource};

/// Remote operation served by [`ScriptedSite`].
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum SiteOperation {
    /// [`JobControl::list_active_jobs`].
    ListActiveJobs,
    /// [`JobControl::get_job`].
    GetJob,
    /// [`JobControl::wait_for_completion`].
    WaitForCompletion,
    /// [`StatusSource::observe`].
    Observe,
    /// [`StatusSource::known_pairs`].
    KnownPairs,
    /// [`StatusSource::pair_registered`].
    PairRegistered,
    /// [`DestinationControl::power_state`].
    PowerState,
    /// [`DestinationControl::power_on`].
    PowerOn,
    /// [`DestinationControl::power_off`].
    PowerOff,
    /// [`DestinationControl::refresh_metadata`].
    RefreshMetadata,
    /// [`DestinationControl::exists`].
    Exists,
}

impl SiteOperation {
    /// Returns the operation name used in [`RemoteError`]s.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ListActiveJobs => "list_active_jobs",
            Self::GetJob => "get_job",
            Self::WaitForCompletion => "wait_for_completion",
            Self::Observe => "observe",
            Self::KnownPairs => "known_pairs",
            Self::PairRegistered => "pair_registered",
            Self::PowerState => "power_state",
            Self::PowerOn => "power_on",
            Self::PowerOff => "power_off",
            Self::RefreshMetadata => "refresh_metadata",
            Self::Exists => "exists",
        }
    }
}

/// Records a single call made against [`ScriptedSite`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SiteCall {
    /// Operation invoked.
    pub operation: SiteOperation,
    /// Job id, source id, group, or destination the call targeted.
    pub target: String,
}

/// A job known to [`ScriptedSite`].
#[derive(Clone, Debug)]
pub struct ScriptedJob {
    snapshot: JobSnapshot,
    final_status: Option<JobStatus>,
    visible_after_lists: u32,
    finished: bool,
}

impl ScriptedJob {
    fn new(id: impl Into<JobId>, kind: JobKind, subclient_id: &str, covered: &[&str]) -> Self {
        Self {
            snapshot: JobSnapshot {
                id: id.into(),
                kind,
                subclient_id: subclient_id.to_owned(),
                status: JobStatus::Running,
                covered_entities: covered.iter().map(|name| (*name).to_owned()).collect(),
                application_size: None,
            },
            final_status: Some(JobStatus::Completed),
            visible_after_lists: 0,
            finished: false,
        }
    }

    /// Running backup job that completes cleanly once waited on.
    #[must_use]
    pub fn backup(id: impl Into<JobId>, subclient_id: &str, covered: &[&str]) -> Self {
        Self::new(id, JobKind::Backup, subclient_id, covered)
    }

    /// Running replication job that completes cleanly once waited on.
    #[must_use]
    pub fn replication(id: impl Into<JobId>, covered: &[&str]) -> Self {
        Self::new(id, JobKind::Replication, "", covered)
    }

    /// Overrides the job kind.
    #[must_use]
    pub const fn kind(mut self, kind: JobKind) -> Self {
        self.snapshot.kind = kind;
        self
    }

    /// Sets the status the job ends with.
    #[must_use]
    pub const fn finishes_with(mut self, status: JobStatus) -> Self {
        self.final_status = Some(status);
        self
    }

    /// Makes waits on the job block forever.
    #[must_use]
    pub const fn never_finishes(mut self) -> Self {
        self.final_status = None;
        self
    }

    /// Marks the job as already finished with its final status.
    #[must_use]
    pub fn finished(mut self) -> Self {
        if let Some(status) = self.final_status {
            self.snapshot.status = status;
            self.finished = true;
        }
        self
    }

    /// Hides the job from the first `lists` job listings.
    #[must_use]
    pub const fn visible_after_lists(mut self, lists: u32) -> Self {
        self.visible_after_lists = lists;
        self
    }

    /// Sets the reported application size in bytes.
    #[must_use]
    pub const fn application_size(mut self, bytes: u64) -> Self {
        self.snapshot.application_size = Some(bytes);
        self
    }
}

#[derive(Debug)]
struct SiteState {
    jobs: BTreeMap<JobId, ScriptedJob>,
    pairs: BTreeMap<String, VecDeque<PairObservation>>,
    known_pairs: BTreeSet<String>,
    registration_visible_after: Option<u32>,
    registration_polls: u32,
    job_lists: u32,
    power: BTreeMap<DestinationRef, PowerState>,
    deployed: BTreeSet<DestinationRef>,
    failing: BTreeSet<SiteOperation>,
    calls: Vec<SiteCall>,
}

impl Default for SiteState {
    fn default() -> Self {
        Self {
            jobs: BTreeMap::new(),
            pairs: BTreeMap::new(),
            known_pairs: BTreeSet::new(),
            registration_visible_after: Some(1),
            registration_polls: 0,
            job_lists: 0,
            power: BTreeMap::new(),
            deployed: BTreeSet::new(),
            failing: BTreeSet::new(),
            calls: Vec::new(),
        }
    }
}

impl SiteState {
    fn record(&mut self, operation: SiteOperation, target: &str) -> Result<(), RemoteError> {
        self.calls.push(SiteCall {
            operation,
            target: target.to_owned(),
        });
        if self.failing.contains(&operation) {
            return Err(RemoteError::new(operation.as_str(), "simulated failure"));
        }
        Ok(())
    }

    fn current_pair(&self, source_id: &str) -> PairObservation {
        self.pairs
            .get(source_id)
            .and_then(VecDeque::front)
            .cloned()
            .unwrap_or_default()
    }

    fn set_pair(&mut self, source_id: &str, observation: PairObservation) {
        self.pairs
            .insert(source_id.to_owned(), VecDeque::from([observation]));
    }

    fn finish(&mut self, snapshot: &JobSnapshot) {
        match (snapshot.kind, snapshot.status) {
            (JobKind::Backup | JobKind::SyntheticFull, JobStatus::Completed) => {
                self.known_pairs
                    .extend(snapshot.covered_entities.iter().cloned());
            }
            (JobKind::Replication, status) => {
                let sync_status = if status == JobStatus::Completed {
                    SyncStatus::InSync
                } else {
                    SyncStatus::SyncFailed
                };
                for source_id in &snapshot.covered_entities {
                    let observation = PairObservation {
                        sync_status,
                        last_replication_job_id: Some(snapshot.id.clone()),
                        ..self.current_pair(source_id)
                    };
                    self.set_pair(source_id, observation);
                }
            }
            _ => {}
        }
    }
}

/// Scripted replication site implementing every remote collaborator.
///
/// Clones share state, so one handle can be given to the code under test
/// while another is kept for assertions.
///
/// Waiting on a job finishes it with its scripted status and applies the
/// effect a real site would show: a completed backup makes its entities
/// known pairs, and a finished replication moves its entities to `InSync`
/// (or `SyncFailed`).
#[derive(Clone, Debug, Default)]
pub struct ScriptedSite {
    state: Arc<Mutex<SiteState>>,
}

impl ScriptedSite {
    /// Creates an empty site. Pair registration is visible on the first poll.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut SiteState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Adds a job.
    pub fn add_job(&self, job: ScriptedJob) {
        self.with_state(|state| {
            state.jobs.insert(job.snapshot.id.clone(), job);
        });
    }

    /// Sets the live state of a pair.
    pub fn set_pair(&self, source_id: &str, observation: PairObservation) {
        self.with_state(|state| state.set_pair(source_id, observation));
    }

    /// Scripts successive observations of a pair. Each observation is
    /// served once, except the last, which repeats.
    pub fn script_pair(&self, source_id: &str, observations: impl IntoIterator<Item = PairObservation>) {
        self.with_state(|state| {
            state
                .pairs
                .insert(source_id.to_owned(), observations.into_iter().collect());
        });
    }

    /// Marks entities as already known pairs, meaning they have been backed up.
    pub fn mark_known(&self, source_ids: &[&str]) {
        self.with_state(|state| {
            state
                .known_pairs
                .extend(source_ids.iter().map(|id| (*id).to_owned()));
        });
    }

    /// Makes the pair registration visible from the given poll onwards, or
    /// never when `None`.
    pub fn registration_visible_after(&self, polls: Option<u32>) {
        self.with_state(|state| state.registration_visible_after = polls);
    }

    /// Sets the power state of a destination.
    pub fn set_power(&self, destination: &str, power: PowerState) {
        self.with_state(|state| {
            state.power.insert(DestinationRef::new(destination), power);
        });
    }

    /// Marks a destination as deployed.
    pub fn set_deployed(&self, destination: &str) {
        self.with_state(|state| {
            state.deployed.insert(DestinationRef::new(destination));
        });
    }

    /// Makes every call to `operation` fail with a [`RemoteError`].
    pub fn fail(&self, operation: SiteOperation) {
        self.with_state(|state| {
            state.failing.insert(operation);
        });
    }

    /// Returns a snapshot of all calls recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<SiteCall> {
        self.with_state(|state| state.calls.clone())
    }

    /// Number of calls made to `operation`.
    #[must_use]
    pub fn count(&self, operation: SiteOperation) -> usize {
        self.with_state(|state| {
            state
                .calls
                .iter()
                .filter(|call| call.operation == operation)
                .count()
        })
    }

    /// Current power state of a destination. Unscripted destinations are off.
    #[must_use]
    pub fn power(&self, destination: &str) -> PowerState {
        self.with_state(|state| {
            state
                .power
                .get(&DestinationRef::new(destination))
                .copied()
                .unwrap_or(PowerState::Off)
        })
    }

    /// Current status of a job, if the site knows it.
    #[must_use]
    pub fn job_status(&self, id: &str) -> Option<JobStatus> {
        self.with_state(|state| state.jobs.get(&JobId::new(id)).map(|job| job.snapshot.status))
    }
}

impl JobControl for ScriptedSite {
    fn list_active_jobs<'a>(
        &'a self,
        source_system: &'a str,
        kinds: &'a [JobKind],
    ) -> RemoteFuture<'a, Vec<JobSnapshot>> {
        let result: Result<Vec<JobSnapshot>, RemoteError> = self.with_state(|state| {
            state.record(SiteOperation::ListActiveJobs, source_system)?;
            state.job_lists += 1;
            let lists = state.job_lists;
            Ok(state
                .jobs
                .values()
                .filter(|job| !job.finished && lists > job.visible_after_lists)
                .filter(|job| kinds.contains(&job.snapshot.kind))
                .map(|job| job.snapshot.clone())
                .collect())
        });
        Box::pin(ready(result))
    }

    fn get_job<'a>(&'a self, id: &'a JobId) -> RemoteFuture<'a, JobSnapshot> {
        let result: Result<JobSnapshot, RemoteError> = self.with_state(|state| {
            state.record(SiteOperation::GetJob, id.as_str())?;
            state
                .jobs
                .get(id)
                .map(|job| job.snapshot.clone())
                .ok_or_else(|| RemoteError::new("get_job", format!("unknown job {id}")))
        });
        Box::pin(ready(result))
    }

    fn wait_for_completion<'a>(&'a self, id: &'a JobId) -> RemoteFuture<'a, JobSnapshot> {
        let result: Result<Option<JobSnapshot>, RemoteError> = self.with_state(|state| {
            state.record(SiteOperation::WaitForCompletion, id.as_str())?;
            let job = state
                .jobs
                .get_mut(id)
                .ok_or_else(|| RemoteError::new("wait_for_completion", format!("unknown job {id}")))?;
            let Some(status) = job.final_status else {
                return Ok(None);
            };
            let newly_finished = !job.finished;
            job.finished = true;
            job.snapshot.status = status;
            let snapshot = job.snapshot.clone();
            if newly_finished {
                state.finish(&snapshot);
            }
            Ok(Some(snapshot))
        });
        match result {
            Ok(Some(snapshot)) => Box::pin(ready(Ok(snapshot))),
            Ok(None) => Box::pin(pending::<Result<JobSnapshot, RemoteError>>()),
            Err(err) => Box::pin(ready(Err(err))),
        }
    }
}

impl StatusSource for ScriptedSite {
    fn observe<'a>(&'a self, source_id: &'a str) -> RemoteFuture<'a, PairObservation> {
        let result: Result<PairObservation, RemoteError> = self.with_state(|state| {
            state.record(SiteOperation::Observe, source_id)?;
            let observation = state.current_pair(source_id);
            if let Some(script) = state.pairs.get_mut(source_id)
                && script.len() > 1
            {
                script.pop_front();
            }
            Ok(observation)
        });
        Box::pin(ready(result))
    }

    fn known_pairs<'a>(&'a self, group: &'a str) -> RemoteFuture<'a, BTreeSet<String>> {
        let result: Result<BTreeSet<String>, RemoteError> = self.with_state(|state| {
            state.record(SiteOperation::KnownPairs, group)?;
            Ok(state.known_pairs.clone())
        });
        Box::pin(ready(result))
    }

    fn pair_registered<'a>(&'a self, group: &'a str) -> RemoteFuture<'a, bool> {
        let result: Result<bool, RemoteError> = self.with_state(|state| {
            state.record(SiteOperation::PairRegistered, group)?;
            state.registration_polls += 1;
            Ok(state
                .registration_visible_after
                .is_some_and(|after| state.registration_polls >= after))
        });
        Box::pin(ready(result))
    }
}

impl DestinationControl for ScriptedSite {
    fn power_state<'a>(&'a self, destination: &'a DestinationRef) -> RemoteFuture<'a, PowerState> {
        let result: Result<PowerState, RemoteError> = self.with_state(|state| {
            state.record(SiteOperation::PowerState, destination.as_str())?;
            Ok(state
                .power
                .get(destination)
                .copied()
                .unwrap_or(PowerState::Off))
        });
        Box::pin(ready(result))
    }

    fn power_on<'a>(&'a self, destination: &'a DestinationRef) -> RemoteFuture<'a, ()> {
        let result: Result<(), RemoteError> = self.with_state(|state| {
            state.record(SiteOperation::PowerOn, destination.as_str())?;
            state.power.insert(destination.clone(), PowerState::On);
            Ok(())
        });
        Box::pin(ready(result))
    }

    fn power_off<'a>(&'a self, destination: &'a DestinationRef) -> RemoteFuture<'a, ()> {
        let result: Result<(), RemoteError> = self.with_state(|state| {
            state.record(SiteOperation::PowerOff, destination.as_str())?;
            state.power.insert(destination.clone(), PowerState::Off);
            Ok(())
        });
        Box::pin(ready(result))
    }

    fn refresh_metadata<'a>(&'a self, destination: &'a DestinationRef) -> RemoteFuture<'a, ()> {
        let result =
            self.with_state(|state| state.record(SiteOperation::RefreshMetadata, destination.as_str()));
        Box::pin(ready(result))
    }

    fn exists<'a>(&'a self, destination: &'a DestinationRef) -> RemoteFuture<'a, bool> {
        let result: Result<bool, RemoteError> = self.with_state(|state| {
            state.record(SiteOperation::Exists, destination.as_str())?;
            Ok(state.deployed.contains(destination))
        });
        Box::pin(ready(result))
    }
}

/// Validation hook of [`PairChecks`].
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum CheckHook {
    /// [`PairChecks::validate_backup_proxy`].
    BackupProxy,
    /// [`PairChecks::validate_differencing_artifacts`].
    DifferencingArtifacts,
    /// [`PairChecks::validate_warm_sync`].
    WarmSync,
    /// [`PairChecks::validate_replication_monitoring`].
    ReplicationMonitoring,
    /// [`PairChecks::validate_replication_proxy`].
    ReplicationProxy,
    /// [`PairChecks::validate_boot`].
    Boot,
    /// [`PairChecks::validate_configuration`].
    Configuration,
    /// [`PairChecks::validate_test_data`].
    TestData,
}

/// Records a single hook invocation made through [`RecordingChecks`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HookCall {
    /// Hook invoked.
    pub hook: CheckHook,
    /// Source id of the entity passed to the hook.
    pub entity: String,
    /// Boolean argument of the hook (`full_replication` or
    /// `expect_present`), when it takes one.
    pub flag: Option<bool>,
}

#[derive(Debug, Default)]
struct ChecksState {
    calls: Vec<HookCall>,
    failures: BTreeMap<CheckHook, CheckError>,
}

/// [`PairChecks`] double that passes every check unless told otherwise.
#[derive(Clone, Debug, Default)]
pub struct RecordingChecks {
    state: Arc<Mutex<ChecksState>>,
}

impl RecordingChecks {
    /// Creates a double where every hook passes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call to `hook` fail with `error`.
    pub fn fail(&self, hook: CheckHook, error: CheckError) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .failures
            .insert(hook, error);
    }

    /// Returns a snapshot of all hook calls recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<HookCall> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .calls
            .clone()
    }

    /// Number of calls made to `hook`.
    #[must_use]
    pub fn count(&self, hook: CheckHook) -> usize {
        self.calls().iter().filter(|call| call.hook == hook).count()
    }

    /// Hooks called for `entity`, in call order.
    #[must_use]
    pub fn hooks_for(&self, entity: &str) -> Vec<CheckHook> {
        self.calls()
            .into_iter()
            .filter(|call| call.entity == entity)
            .map(|call| call.hook)
            .collect()
    }

    fn run<'a>(&'a self, hook: CheckHook, entity: &Entity, flag: Option<bool>) -> CheckFuture<'a> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.calls.push(HookCall {
            hook,
            entity: entity.source_id().to_owned(),
            flag,
        });
        let result = state.failures.get(&hook).cloned().map_or(Ok(()), Err);
        Box::pin(ready(result))
    }
}

impl PairChecks for RecordingChecks {
    fn validate_backup_proxy<'a>(
        &'a self,
        entity: &'a Entity,
        _backup_job: &'a JobSnapshot,
    ) -> CheckFuture<'a> {
        self.run(CheckHook::BackupProxy, entity, None)
    }

    fn validate_differencing_artifacts<'a>(&'a self, entity: &'a Entity) -> CheckFuture<'a> {
        self.run(CheckHook::DifferencingArtifacts, entity, None)
    }

    fn validate_warm_sync<'a>(&'a self, entity: &'a Entity) -> CheckFuture<'a> {
        self.run(CheckHook::WarmSync, entity, None)
    }

    fn validate_replication_monitoring<'a>(
        &'a self,
        entity: &'a Entity,
        _replication_job: &'a JobSnapshot,
        full_replication: bool,
    ) -> CheckFuture<'a> {
        self.run(CheckHook::ReplicationMonitoring, entity, Some(full_replication))
    }

    fn validate_replication_proxy<'a>(
        &'a self,
        entity: &'a Entity,
        _replication_job: &'a JobSnapshot,
    ) -> CheckFuture<'a> {
        self.run(CheckHook::ReplicationProxy, entity, None)
    }

    fn validate_boot<'a>(&'a self, entity: &'a Entity) -> CheckFuture<'a> {
        self.run(CheckHook::Boot, entity, None)
    }

    fn validate_configuration<'a>(&'a self, entity: &'a Entity) -> CheckFuture<'a> {
        self.run(CheckHook::Configuration, entity, None)
    }

    fn validate_test_data<'a>(
        &'a self,
        entity: &'a Entity,
        expect_present: bool,
    ) -> CheckFuture<'a> {
        self.run(CheckHook::TestData, entity, Some(expect_present))
    }
}

/// Serialises tests that touch `REPLCHECK_*` variables.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Keeps [`ENV_LOCK`] while configuration overrides are in the environment
/// and puts the earlier values back on drop.
#[derive(Debug)]
pub struct EnvGuard {
    saved: BTreeMap<String, Option<OsString>>,
    _lock: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Applies `overrides` in order, so a repeated key ends with its last
    /// value and is still restored to what it was before the guard.
    pub async fn set_vars(overrides: &[(&str, &str)]) -> Self {
        let lock = ENV_LOCK.lock().await;
        let mut saved = BTreeMap::new();
        for &(key, value) in overrides {
            saved
                .entry(key.to_owned())
                .or_insert_with(|| env::var_os(key));
            // SAFETY: every writer holds `ENV_LOCK`.
            unsafe { env::set_var(key, value) };
        }
        Self { saved, _lock: lock }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, earlier) in &self.saved {
            // SAFETY: `_lock` is released only after this loop.
            unsafe {
                match earlier {
                    Some(value) => env::set_var(key, value),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
