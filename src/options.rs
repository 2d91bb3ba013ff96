//! Options bag accepted by the orchestration entry point.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, de};
use thiserror::Error;

use crate::job::JobId;

/// Level of the replication job expected after the last backup.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum ReplicationJobType {
    /// Full replication of the pair.
    Full,
    /// Incremental replication of changes since the last sync.
    #[default]
    Incremental,
}

impl ReplicationJobType {
    /// Returns `true` for [`ReplicationJobType::Full`].
    #[must_use]
    pub const fn is_full(self) -> bool {
        matches!(self, Self::Full)
    }
}

impl fmt::Display for ReplicationJobType {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Full => "FULL",
            Self::Incremental => "INCREMENTAL",
        })
    }
}

impl FromStr for ReplicationJobType {
    type Err = OptionsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "FULL" => Ok(Self::Full),
            "INCREMENTAL" => Ok(Self::Incremental),
            other => Err(OptionsError::UnknownJobType(other.to_owned())),
        }
    }
}

// The options bag and `FromStr` accept the same spellings.
impl<'de> Deserialize<'de> for ReplicationJobType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// Operation the group last went through, which decides the expected sync
/// state of every pair.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PairOperation {
    /// Regular replication.
    #[default]
    Sync,
    /// Planned failover to the destination.
    PlannedFailover,
    /// Unplanned failover to the destination.
    UnplannedFailover,
    /// Failback to the source.
    Failback,
    /// Failover undone.
    UndoFailover,
}

impl PairOperation {
    /// Returns `true` when replication is expected to be disabled.
    #[must_use]
    pub const fn is_failover(self) -> bool {
        matches!(self, Self::PlannedFailover | Self::UnplannedFailover)
    }
}

/// Options recognised by the orchestration entry point.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct ValidationOptions {
    /// Backup job to attribute to every pair.
    pub backup_job_id: Option<JobId>,
    /// Whether to check user test content on the destination.
    pub validate_test_data: bool,
    /// Whether test content is expected to be present.
    pub test_data: bool,
    /// Expected replication job level.
    pub job_type: ReplicationJobType,
    /// Operation the group last went through.
    pub operation: PairOperation,
    /// Whether to bound incremental replication size by the backup size.
    pub check_replication_size: bool,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            backup_job_id: None,
            validate_test_data: true,
            test_data: true,
            job_type: ReplicationJobType::Incremental,
            operation: PairOperation::Sync,
            check_replication_size: true,
        }
    }
}

impl ValidationOptions {
    /// Parses the JSON options bag sent by the calling framework.
    ///
    /// # Errors
    ///
    /// Returns [`OptionsError::Parse`] for malformed JSON, unknown keys, or
    /// unknown enum values.
    pub fn from_json(input: &str) -> Result<Self, OptionsError> {
        serde_json::from_str(input).map_err(|err| OptionsError::Parse(err.to_string()))
    }

    /// Sets the backup job to attribute.
    #[must_use]
    pub fn backup_job_id(mut self, id: impl Into<JobId>) -> Self {
        self.backup_job_id = Some(id.into());
        self
    }

    /// Sets the expected replication job level.
    #[must_use]
    pub const fn job_type(mut self, job_type: ReplicationJobType) -> Self {
        self.job_type = job_type;
        self
    }

    /// Sets the operation the group last went through.
    #[must_use]
    pub const fn operation(mut self, operation: PairOperation) -> Self {
        self.operation = operation;
        self
    }

    /// Returns `true` when a full replication is expected.
    #[must_use]
    pub const fn full_replication(&self) -> bool {
        self.job_type.is_full()
    }
}

/// Errors raised while reading options.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum OptionsError {
    /// Raised when the options bag cannot be parsed.
    #[error("invalid options: {0}")]
    Parse(String),
    /// Raised when a job type is neither `FULL` nor `INCREMENTAL`.
    #[error("unknown replication job type: {0}")]
    UnknownJobType(String),
}
