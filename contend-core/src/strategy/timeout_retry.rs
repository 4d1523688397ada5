//! Bounded waits with retry: an actor that cannot complete its set within
//! the timeout gives everything back and starts over, so it never holds one
//! resource while waiting indefinitely for another.

use std::time::Duration;

use async_trait::async_trait;

use super::{
    AcquireOutcome, AcquiredSet, AcquisitionStrategy, Attempt, StrategyKind, release_set,
    take_bounded,
};
use crate::actor::ActorContext;
use crate::config::StrategyConfig;
use crate::resource::ArbitrationError;
use crate::topology::PickOrder;

#[derive(Debug, Clone)]
pub struct TimeoutRetryStrategy {
    timeout: Duration,
    retry_pause: Duration,
}

impl TimeoutRetryStrategy {
    pub fn new(config: &StrategyConfig) -> Self {
        Self {
            timeout: config.acquire_timeout,
            retry_pause: config.retry_pause,
        }
    }

    /// Pause after failing at `position`. A first-pick failure already waited
    /// out the timeout unless the timeout is a bare probe.
    fn pause_after(&self, position: usize) -> Duration {
        if position == 0 && !self.timeout.is_zero() {
            Duration::ZERO
        } else {
            self.retry_pause
        }
    }
}

#[async_trait]
impl AcquisitionStrategy for TimeoutRetryStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::TimeoutRetry
    }

    async fn acquire_all(&self, actor: &ActorContext) -> Result<AcquireOutcome, ArbitrationError> {
        let order = actor.needs().ordered(PickOrder::LeftFirst);

        loop {
            if actor.is_stopped() {
                return Ok(AcquireOutcome::Cancelled);
            }

            match take_bounded(actor, &order, self.timeout).await? {
                Attempt::Taken(set) => return Ok(AcquireOutcome::Acquired(set)),
                Attempt::Cancelled => return Ok(AcquireOutcome::Cancelled),
                Attempt::FailedAt(position) => {
                    tracing::trace!("{} gave up at pick {}, retrying", actor.id(), position);
                    actor.back_off(self.pause_after(position)).await;
                }
            }
        }
    }

    fn release_all(&self, actor: &ActorContext, set: AcquiredSet) -> Result<(), ArbitrationError> {
        release_set(actor, set)
    }
}
