//! Orchestration budgets loaded via `ortho-config`.

use std::ffi::OsString;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::orchestrator::OrchestrationPolicies;
use crate::wait::{PollPolicy, RoundBudget};

/// Wait budgets and pauses layered from defaults, `replcheck.toml`, and
/// `REPLCHECK_*` environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "REPLCHECK",
    discovery(
        app_name = "replcheck",
        env_var = "REPLCHECK_CONFIG_PATH",
        config_file_name = "replcheck.toml",
        dotfile_name = ".replcheck.toml",
        project_file_name = "replcheck.toml"
    )
)]
pub struct OrchestratorConfig {
    /// Outer rounds of the first-backup wait.
    #[ortho_config(default = 15)]
    pub backup_rounds: u32,
    /// Idle polls for a new backup job between outer rounds.
    #[ortho_config(default = 10)]
    pub backup_idle_polls: u32,
    /// Outer rounds of the replication-sync wait.
    #[ortho_config(default = 15)]
    pub sync_rounds: u32,
    /// Idle polls for sync activity between outer rounds.
    #[ortho_config(default = 10)]
    pub sync_idle_polls: u32,
    /// Seconds between idle polls.
    #[ortho_config(default = 60)]
    pub poll_interval_secs: u64,
    /// Polls of the pair-registration wait.
    #[ortho_config(default = 10)]
    pub registration_rounds: u32,
    /// Seconds between registration polls.
    #[ortho_config(default = 30)]
    pub registration_interval_secs: u64,
    /// Seconds a powered-on destination is given before inspection.
    #[ortho_config(default = 120)]
    pub settle_secs: u64,
    /// Fail the orchestration when a wait budget runs out instead of
    /// continuing to post-validation.
    #[ortho_config(default = false)]
    pub strict_budgets: bool,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl OrchestratorConfig {
    fn require_rounds(value: u32, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value == 0 {
            return Err(ConfigError::Invalid(format!(
                "{} must be at least 1: set {} or {} in replcheck.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("replcheck")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Rejects budgets that would skip a wait entirely.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the environment variable and
    /// TOML key of the first round count set to zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_rounds(
            self.backup_rounds,
            &FieldMetadata::new("backup rounds", "REPLCHECK_BACKUP_ROUNDS", "backup_rounds"),
        )?;
        Self::require_rounds(
            self.sync_rounds,
            &FieldMetadata::new("sync rounds", "REPLCHECK_SYNC_ROUNDS", "sync_rounds"),
        )?;
        Self::require_rounds(
            self.registration_rounds,
            &FieldMetadata::new(
                "registration rounds",
                "REPLCHECK_REGISTRATION_ROUNDS",
                "registration_rounds",
            ),
        )?;
        Ok(())
    }

    /// Converts the configuration into orchestration policies.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn policies(&self) -> Result<OrchestrationPolicies, ConfigError> {
        self.validate()?;
        let poll_interval = Duration::from_secs(self.poll_interval_secs);
        Ok(OrchestrationPolicies {
            backup: RoundBudget::new(
                self.backup_rounds,
                PollPolicy::new(self.backup_idle_polls, poll_interval),
            ),
            sync: RoundBudget::new(
                self.sync_rounds,
                PollPolicy::new(self.sync_idle_polls, poll_interval),
            ),
            registration: PollPolicy::new(
                self.registration_rounds,
                Duration::from_secs(self.registration_interval_secs),
            ),
            settle: Duration::from_secs(self.settle_secs),
            strict_budgets: self.strict_budgets,
        })
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a configured value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}
