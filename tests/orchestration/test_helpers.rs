//! Shared fixtures for orchestration BDD scenarios.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use replcheck::test_support::{RecordingChecks, ScriptedSite};
use replcheck::{
    Entity, Group, OrchestrationError, OrchestrationPolicies, OrchestrationReport, PollPolicy,
    RoundBudget, ValidationOptions,
};
use rstest::fixture;

pub const GROUP_NAME: &str = "group-1";
pub const SUBCLIENT_ID: &str = "sc-7";

const TICK: Duration = Duration::from_millis(1);

#[derive(Clone, Debug)]
pub enum RunOutcome {
    Passed(OrchestrationReport),
    Failed(OrchestrationError),
}

#[derive(Debug, Default)]
struct ScenarioState {
    entities: Vec<Entity>,
    options: ValidationOptions,
    strict_budgets: bool,
    outcome: Option<RunOutcome>,
}

/// Scripted site plus the inputs and result of one orchestration run.
///
/// Clones share state, so steps that take the context by value still see
/// what earlier steps recorded.
#[derive(Clone, Debug)]
pub struct OrchestrationContext {
    pub site: ScriptedSite,
    pub checks: RecordingChecks,
    state: Arc<Mutex<ScenarioState>>,
}

impl OrchestrationContext {
    fn with_state<T>(&self, f: impl FnOnce(&mut ScenarioState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    pub fn add_entity(&self, entity: Entity) {
        self.with_state(|state| state.entities.push(entity));
    }

    pub fn source_ids(&self) -> Vec<String> {
        self.with_state(|state| {
            state
                .entities
                .iter()
                .map(|entity| entity.source_id().to_owned())
                .collect()
        })
    }

    pub fn update_options(&self, f: impl FnOnce(&mut ValidationOptions)) {
        self.with_state(|state| f(&mut state.options));
    }

    pub fn options(&self) -> ValidationOptions {
        self.with_state(|state| state.options.clone())
    }

    pub fn make_strict(&self) {
        self.with_state(|state| state.strict_budgets = true);
    }

    pub fn policies(&self) -> OrchestrationPolicies {
        let idle = PollPolicy::new(2, TICK);
        let strict_budgets = self.with_state(|state| state.strict_budgets);
        OrchestrationPolicies {
            backup: RoundBudget::new(3, idle),
            sync: RoundBudget::new(3, idle),
            registration: PollPolicy::new(3, TICK),
            settle: TICK,
            strict_budgets,
        }
    }

    pub fn group(&self) -> Group {
        let entities = self.with_state(|state| state.entities.clone());
        entities
            .into_iter()
            .fold(
                Group::builder()
                    .name(GROUP_NAME)
                    .source_system("hv-01")
                    .subclient_id(SUBCLIENT_ID),
                |builder, entity| builder.entity(entity),
            )
            .build()
            .unwrap_or_else(|err| panic!("scenario group should build: {err}"))
    }

    pub fn record_outcome(&self, outcome: RunOutcome) {
        self.with_state(|state| state.outcome = Some(outcome));
    }

    pub fn outcome(&self) -> Option<RunOutcome> {
        self.with_state(|state| state.outcome.clone())
    }
}

#[fixture]
pub fn orchestration_context() -> OrchestrationContext {
    OrchestrationContext {
        site: ScriptedSite::new(),
        checks: RecordingChecks::new(),
        state: Arc::new(Mutex::new(ScenarioState::default())),
    }
}
