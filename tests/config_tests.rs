//! Unit tests for orchestration configuration loading and validation.

use std::time::Duration;

use replcheck::config::ConfigError;
use replcheck::test_support::EnvGuard;
use replcheck::{OrchestrationPolicies, OrchestratorConfig, PollPolicy};
use rstest::*;

fn reference_config() -> OrchestratorConfig {
    OrchestratorConfig {
        backup_rounds: 15,
        backup_idle_polls: 10,
        sync_rounds: 15,
        sync_idle_polls: 10,
        poll_interval_secs: 60,
        registration_rounds: 10,
        registration_interval_secs: 30,
        settle_secs: 120,
        strict_budgets: false,
    }
}

#[fixture]
fn defaults() -> OrchestratorConfig {
    reference_config()
}

#[rstest]
fn default_values_match_default_policies(defaults: OrchestratorConfig) {
    let policies = defaults
        .policies()
        .expect("default configuration should validate");
    assert_eq!(policies, OrchestrationPolicies::default());
}

#[rstest]
#[case(
    "REPLCHECK_BACKUP_ROUNDS",
    "backup_rounds",
    OrchestratorConfig { backup_rounds: 0, ..reference_config() }
)]
#[case(
    "REPLCHECK_SYNC_ROUNDS",
    "sync_rounds",
    OrchestratorConfig { sync_rounds: 0, ..reference_config() }
)]
#[case(
    "REPLCHECK_REGISTRATION_ROUNDS",
    "registration_rounds",
    OrchestratorConfig { registration_rounds: 0, ..reference_config() }
)]
fn zero_rounds_are_rejected_with_actionable_errors(
    #[case] env_var: &str,
    #[case] toml_key: &str,
    #[case] cfg: OrchestratorConfig,
) {
    let error = cfg.validate().expect_err("zero rounds should fail");
    let ConfigError::Invalid(ref message) = error else {
        panic!("expected Invalid error, got {error:?}");
    };
    assert!(
        message.contains(env_var),
        "error should mention env var {env_var}: {message}"
    );
    assert!(
        message.contains(toml_key),
        "error should mention TOML key {toml_key}: {message}"
    );
    assert!(
        message.contains("replcheck.toml"),
        "error should mention config file: {message}"
    );
}

#[rstest]
fn idle_polls_share_the_poll_interval(defaults: OrchestratorConfig) {
    let cfg = OrchestratorConfig {
        backup_idle_polls: 4,
        sync_idle_polls: 6,
        poll_interval_secs: 5,
        ..defaults
    };
    let policies = cfg.policies().expect("configuration should validate");
    assert_eq!(policies.backup.idle, PollPolicy::new(4, Duration::from_secs(5)));
    assert_eq!(policies.sync.idle, PollPolicy::new(6, Duration::from_secs(5)));
}

#[tokio::test]
async fn environment_overrides_defaults() {
    let _guard = EnvGuard::set_vars(&[
        ("REPLCHECK_BACKUP_ROUNDS", "3"),
        ("REPLCHECK_STRICT_BUDGETS", "true"),
    ])
    .await;

    let cfg = OrchestratorConfig::load_without_cli_args()
        .expect("configuration should load with env overrides");

    assert_eq!(cfg.backup_rounds, 3);
    assert!(cfg.strict_budgets);
    assert_eq!(cfg.sync_rounds, 15, "unset values keep their defaults");
}

#[tokio::test]
async fn malformed_environment_value_is_a_parse_error() {
    let _guard = EnvGuard::set_vars(&[("REPLCHECK_SYNC_ROUNDS", "many")]).await;

    let err = OrchestratorConfig::load_without_cli_args()
        .expect_err("non-numeric rounds should fail to load");

    assert!(
        matches!(err, ConfigError::Parse(_)),
        "expected Parse error, got {err:?}"
    );
}

#[tokio::test]
async fn repeated_override_keeps_the_last_value_and_is_restored() {
    {
        let _guard = EnvGuard::set_vars(&[
            ("REPLCHECK_SETTLE_SECS", "5"),
            ("REPLCHECK_SETTLE_SECS", "7"),
        ])
        .await;
        let cfg = OrchestratorConfig::load_without_cli_args()
            .expect("configuration should load with env overrides");
        assert_eq!(cfg.settle_secs, 7);
    }

    let _guard = EnvGuard::set_vars(&[]).await;
    let cfg = OrchestratorConfig::load_without_cli_args()
        .expect("configuration should load without overrides");
    assert_eq!(cfg.settle_secs, 120, "override removed on drop");
}
