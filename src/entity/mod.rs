//! Entity registry and group model.
//!
//! A group is an ordered, caller-supplied set of replication pairs. Each pair
//! is keyed by its source id and carries the last observed sync state plus the
//! mode flags that decide how it is validated. Membership is fixed once the
//! group is built; only the observed state changes between polling rounds.

use std::collections::BTreeSet;
use std::fmt;

use thiserror::Error;

use crate::job::JobId;
use crate::remote::RemoteError;
use crate::status::{PairObservation, StatusSource};

/// Replication state of a pair.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum SyncStatus {
    /// Destination holds the latest replicated state.
    InSync,
    /// Replication is disabled, for example after a failover.
    SyncDisabled,
    /// The last replication attempt failed.
    SyncFailed,
    /// A replication job is currently running.
    SyncInProgress,
    /// No usable status has been observed.
    #[default]
    Unknown,
}

impl SyncStatus {
    /// Returns `true` for statuses that end a replication cycle.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::InSync | Self::SyncDisabled | Self::SyncFailed)
    }

    /// Returns the label used by the replication monitor.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InSync => "IN_SYNC",
            Self::SyncDisabled => "SYNC_DISABLED",
            Self::SyncFailed => "SYNC_FAILED",
            Self::SyncInProgress => "SYNC_IN_PROGRESS",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Failover state of a pair.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum FailoverStatus {
    /// No failover has happened.
    #[default]
    None,
    /// The destination has taken over from the source.
    FailoverComplete,
    /// Control has returned to the source after a failover.
    FailbackComplete,
    /// A failover or failback is running.
    InProgress,
}

impl FailoverStatus {
    /// Returns the label used by the replication monitor.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::FailoverComplete => "FAILOVER_COMPLETE",
            Self::FailbackComplete => "FAILBACK_COMPLETE",
            Self::InProgress => "IN_PROGRESS",
        }
    }
}

impl fmt::Display for FailoverStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Replication mode flags configured for a pair.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct EntityModes {
    /// Replication runs continuously rather than on a schedule.
    pub continuous: bool,
    /// Destination is only brought to a bootable state on demand.
    pub warm_sync: bool,
    /// Changes are tracked as differencing artifacts instead of a deployed
    /// destination resource.
    pub disk_differencing: bool,
}

impl EntityModes {
    /// Periodic, standard replication.
    #[must_use]
    pub const fn standard() -> Self {
        Self {
            continuous: false,
            warm_sync: false,
            disk_differencing: false,
        }
    }

    /// Sets the continuous flag.
    #[must_use]
    pub const fn continuous(mut self, value: bool) -> Self {
        self.continuous = value;
        self
    }

    /// Sets the warm-sync flag.
    #[must_use]
    pub const fn warm_sync(mut self, value: bool) -> Self {
        self.warm_sync = value;
        self
    }

    /// Sets the disk-differencing flag.
    #[must_use]
    pub const fn disk_differencing(mut self, value: bool) -> Self {
        self.disk_differencing = value;
        self
    }
}

/// Opaque handle to a destination resource.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct DestinationRef(String);

impl DestinationRef {
    /// Wraps a provider-specific destination identifier.
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

impl fmt::Display for DestinationRef {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl From<&str> for DestinationRef {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A source resource paired with its replicated destination.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Entity {
    source_id: String,
    destination: DestinationRef,
    modes: EntityModes,
    sync_status: SyncStatus,
    failover_status: FailoverStatus,
    last_replication_job_id: Option<JobId>,
}

impl Entity {
    /// Creates an entity with no observed state.
    #[must_use]
    pub fn new(
        source_id: impl Into<String>,
        destination: impl Into<DestinationRef>,
        modes: EntityModes,
    ) -> Self {
        Self {
            source_id: source_id.into().trim().to_owned(),
            destination: destination.into(),
            modes,
            sync_status: SyncStatus::Unknown,
            failover_status: FailoverStatus::None,
            last_replication_job_id: None,
        }
    }

    /// Source id, unique within a group.
    #[must_use]
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Destination resource handle.
    #[must_use]
    pub const fn destination(&self) -> &DestinationRef {
        &self.destination
    }

    /// Configured mode flags.
    #[must_use]
    pub const fn modes(&self) -> EntityModes {
        self.modes
    }

    /// Last observed sync status.
    #[must_use]
    pub const fn sync_status(&self) -> SyncStatus {
        self.sync_status
    }

    /// Last observed failover status.
    #[must_use]
    pub const fn failover_status(&self) -> FailoverStatus {
        self.failover_status
    }

    /// Last observed replication job id, whatever the sync status.
    #[must_use]
    pub const fn last_replication_job_id(&self) -> Option<&JobId> {
        self.last_replication_job_id.as_ref()
    }

    /// Replication job that is running for this pair, if any.
    ///
    /// Only trusted while the pair is `SyncInProgress`.
    #[must_use]
    pub fn in_progress_job(&self) -> Option<&JobId> {
        match self.sync_status {
            SyncStatus::SyncInProgress => self.last_replication_job_id.as_ref(),
            _ => None,
        }
    }

    /// Overwrites the observed state with a fresh observation.
    pub fn apply(&mut self, observation: PairObservation) {
        self.sync_status = observation.sync_status;
        self.failover_status = observation.failover_status;
        self.last_replication_job_id = observation.last_replication_job_id;
    }

    /// Re-reads the live state of the pair from `source`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] when the status query fails; the previously
    /// observed state is kept in that case.
    pub async fn refresh<S>(&mut self, source: &S) -> Result<(), RemoteError>
    where
        S: StatusSource + ?Sized,
    {
        let observation = source.observe(&self.source_id).await?;
        self.apply(observation);
        Ok(())
    }
}

/// Errors raised while assembling a group.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum GroupError {
    /// Raised when the group has no entities.
    #[error("no entities configured for group {group}")]
    NoEntities {
        /// Group name.
        group: String,
    },
    /// Raised when two entities share a source id.
    #[error("entity {source_id} is configured more than once")]
    DuplicateEntity {
        /// Duplicated source id.
        source_id: String,
    },
    /// Raised when a required field is blank.
    #[error("missing or empty field: {0}")]
    EmptyField(String),
}

/// Ordered set of entities with unique source ids.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct EntityRegistry {
    entities: Vec<Entity>,
}

impl EntityRegistry {
    /// Builds a registry, preserving input order.
    ///
    /// # Errors
    ///
    /// Returns [`GroupError::DuplicateEntity`] when two entities share a
    /// source id and [`GroupError::EmptyField`] when a source id or
    /// destination is blank.
    pub fn from_entities(
        entities: impl IntoIterator<Item = Entity>,
    ) -> Result<Self, GroupError> {
        let mut seen = BTreeSet::new();
        let mut ordered = Vec::new();
        for entity in entities {
            if entity.source_id.is_empty() {
                return Err(GroupError::EmptyField(String::from("source_id")));
            }
            if entity.destination.as_str().is_empty() {
                return Err(GroupError::EmptyField(format!(
                    "destination for {}",
                    entity.source_id
                )));
            }
            if !seen.insert(entity.source_id.clone()) {
                return Err(GroupError::DuplicateEntity {
                    source_id: entity.source_id,
                });
            }
            ordered.push(entity);
        }
        Ok(Self { entities: ordered })
    }

    /// Number of entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns `true` when the registry holds no entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Iterates entities in registry order.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter()
    }

    /// Looks up an entity by source id.
    #[must_use]
    pub fn get(&self, source_id: &str) -> Option<&Entity> {
        self.entities
            .iter()
            .find(|entity| entity.source_id == source_id)
    }

    /// All source ids.
    #[must_use]
    pub fn source_ids(&self) -> BTreeSet<String> {
        self.entities
            .iter()
            .map(|entity| entity.source_id.clone())
            .collect()
    }

    /// Source ids whose last observed status is not terminal.
    #[must_use]
    pub fn pending_sync(&self) -> BTreeSet<String> {
        self.entities
            .iter()
            .filter(|entity| !entity.sync_status.is_terminal())
            .map(|entity| entity.source_id.clone())
            .collect()
    }

    /// Returns `true` when any entity is observed `SyncInProgress`.
    #[must_use]
    pub fn any_in_progress(&self) -> bool {
        self.entities
            .iter()
            .any(|entity| entity.sync_status == SyncStatus::SyncInProgress)
    }

    /// Refreshes every entity in registry order.
    ///
    /// # Errors
    ///
    /// Returns the first [`RemoteError`] raised by the status source.
    pub async fn refresh_all<S>(&mut self, source: &S) -> Result<(), RemoteError>
    where
        S: StatusSource + ?Sized,
    {
        for entity in &mut self.entities {
            entity.refresh(source).await?;
        }
        Ok(())
    }
}

/// Entities validated together plus where their jobs run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Group {
    name: String,
    source_system: String,
    subclient_id: String,
    registry: EntityRegistry,
}

impl Group {
    /// Starts a builder for a [`Group`].
    #[must_use]
    pub fn builder() -> GroupBuilder {
        GroupBuilder::new()
    }

    /// Replication group name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Source system whose jobs back up the group.
    #[must_use]
    pub fn source_system(&self) -> &str {
        &self.source_system
    }

    /// Subclient the group's backup jobs run under.
    #[must_use]
    pub fn subclient_id(&self) -> &str {
        &self.subclient_id
    }

    /// Entities of the group.
    #[must_use]
    pub const fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    /// Mutable access for waiters that refresh observed state.
    pub const fn registry_mut(&mut self) -> &mut EntityRegistry {
        &mut self.registry
    }
}

/// Builder for [`Group`] that defers trimming and validation to construction.
#[derive(Clone, Debug, Default)]
pub struct GroupBuilder {
    name: String,
    source_system: String,
    subclient_id: String,
    entities: Vec<Entity>,
}

impl GroupBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the group name.
    #[must_use]
    pub fn name(mut self, value: impl Into<String>) -> Self {
        self.name = value.into();
        self
    }

    /// Sets the source system.
    #[must_use]
    pub fn source_system(mut self, value: impl Into<String>) -> Self {
        self.source_system = value.into();
        self
    }

    /// Sets the subclient id.
    #[must_use]
    pub fn subclient_id(mut self, value: impl Into<String>) -> Self {
        self.subclient_id = value.into();
        self
    }

    /// Appends an entity.
    #[must_use]
    pub fn entity(mut self, entity: Entity) -> Self {
        self.entities.push(entity);
        self
    }

    /// Builds and validates the [`Group`].
    ///
    /// # Errors
    ///
    /// Returns [`GroupError`] when a field is blank, no entities were added,
    /// or a source id repeats.
    pub fn build(self) -> Result<Group, GroupError> {
        let name = self.name.trim().to_owned();
        let source_system = self.source_system.trim().to_owned();
        let subclient_id = self.subclient_id.trim().to_owned();
        if name.is_empty() {
            return Err(GroupError::EmptyField(String::from("name")));
        }
        if source_system.is_empty() {
            return Err(GroupError::EmptyField(String::from("source_system")));
        }
        if subclient_id.is_empty() {
            return Err(GroupError::EmptyField(String::from("subclient_id")));
        }
        if self.entities.is_empty() {
            return Err(GroupError::NoEntities { group: name });
        }
        let registry = EntityRegistry::from_entities(self.entities)?;
        Ok(Group {
            name,
            source_system,
            subclient_id,
            registry,
        })
    }
}

#[cfg(test)]
mod tests;
