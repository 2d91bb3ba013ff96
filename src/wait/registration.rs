//! Waits for a group's pair registration to become visible.

use std::collections::BTreeSet;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::status::StatusSource;

use super::{PollPolicy, WaitError, WaitOutcome, WaitPhase, ensure_active, pause};

const PHASE: WaitPhase = WaitPhase::Registration;

/// Polls the destination until the group's replication pairs are
/// registered, so later steps do not race asynchronous pair creation.
#[derive(Debug)]
pub struct RegistrationWaiter<'a, S: ?Sized> {
    status: &'a S,
    policy: PollPolicy,
}

impl<'a, S> RegistrationWaiter<'a, S>
where
    S: StatusSource + ?Sized,
{
    /// Creates a waiter over the given status source.
    #[must_use]
    pub const fn new(status: &'a S, policy: PollPolicy) -> Self {
        Self { status, policy }
    }

    /// Blocks until the registration for `group` is visible or the poll
    /// budget runs out. A failed lookup counts as "not visible yet".
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::Cancelled`] when `cancel` fires.
    pub async fn wait_for_pair_registration(
        &self,
        group: &str,
        cancel: &CancellationToken,
    ) -> Result<WaitOutcome, WaitError> {
        for poll in 1..=self.policy.rounds {
            ensure_active(cancel, PHASE)?;
            match self.status.pair_registered(group).await {
                Ok(true) => {
                    info!(group, poll, "pair registration visible");
                    return Ok(WaitOutcome::Satisfied { rounds: poll });
                }
                Ok(false) => debug!(group, poll, "pair registration not visible yet"),
                Err(err) => debug!(group, poll, error = %err, "pair registration lookup failed"),
            }
            if poll < self.policy.rounds {
                pause(cancel, self.policy.interval, PHASE).await?;
            }
        }

        warn!(group, polls = self.policy.rounds, "pair registration never became visible");
        Ok(WaitOutcome::Exhausted {
            rounds: self.policy.rounds,
            outstanding: BTreeSet::from([group.to_owned()]),
        })
    }
}
