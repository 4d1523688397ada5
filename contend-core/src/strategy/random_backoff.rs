//! Randomized backoff: after a failed pick the actor gives everything back
//! and sleeps a random delay, so colliding actors drift out of lockstep.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{
    AcquireOutcome, AcquiredSet, AcquisitionStrategy, Attempt, StrategyKind, release_set,
    take_bounded,
};
use crate::actor::ActorContext;
use crate::config::{BackoffRange, StrategyConfig};
use crate::resource::ArbitrationError;
use crate::rng::DeterministicRng;
use crate::topology::PickOrder;

#[derive(Debug)]
pub struct RandomBackoffStrategy {
    first: BackoffRange,
    second: BackoffRange,
    rng: Mutex<DeterministicRng>,
}

impl RandomBackoffStrategy {
    pub fn new(config: &StrategyConfig) -> Self {
        Self {
            first: config.backoff_first,
            second: config.backoff_second,
            rng: Mutex::new(DeterministicRng::from_seed(config.seed)),
        }
    }

    fn delay_after(&self, position: usize) -> Duration {
        let range = if position == 0 { self.first } else { self.second };
        self.rng.lock().random_duration(range)
    }
}

#[async_trait]
impl AcquisitionStrategy for RandomBackoffStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::RandomBackoff
    }

    async fn acquire_all(&self, actor: &ActorContext) -> Result<AcquireOutcome, ArbitrationError> {
        let order = actor.needs().ordered(PickOrder::LeftFirst);

        loop {
            if actor.is_stopped() {
                return Ok(AcquireOutcome::Cancelled);
            }

            match take_bounded(actor, &order, Duration::ZERO).await? {
                Attempt::Taken(set) => return Ok(AcquireOutcome::Acquired(set)),
                Attempt::Cancelled => return Ok(AcquireOutcome::Cancelled),
                Attempt::FailedAt(position) => {
                    let delay = self.delay_after(position);
                    actor.back_off(delay).await;
                }
            }
        }
    }

    fn release_all(&self, actor: &ActorContext, set: AcquiredSet) -> Result<(), ArbitrationError> {
        release_set(actor, set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_ranges_depend_on_failed_pick() {
        let config = StrategyConfig::default();
        let strategy = RandomBackoffStrategy::new(&config);

        for _ in 0..200 {
            let first = strategy.delay_after(0);
            assert!(first >= config.backoff_first.min && first <= config.backoff_first.max);

            let second = strategy.delay_after(1);
            assert!(second >= config.backoff_second.min && second <= config.backoff_second.max);
        }
    }

    #[test]
    fn test_same_seed_same_delays() {
        let config = StrategyConfig::default();
        let a = RandomBackoffStrategy::new(&config);
        let b = RandomBackoffStrategy::new(&config);

        let left: Vec<Duration> = (0..20).map(|i| a.delay_after(i % 2)).collect();
        let right: Vec<Duration> = (0..20).map(|i| b.delay_after(i % 2)).collect();
        assert_eq!(left, right);
    }
}
