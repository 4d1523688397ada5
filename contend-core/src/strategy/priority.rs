//! Priority bias: one designated actor picks in the opposite order from
//! everyone else and backs off for less time, so it is back first after a
//! collision.

use std::time::Duration;

use async_trait::async_trait;

use super::{
    AcquireOutcome, AcquiredSet, AcquisitionStrategy, Attempt, StrategyKind, release_set,
    take_bounded,
};
use crate::actor::ActorContext;
use crate::config::StrategyConfig;
use crate::resource::ArbitrationError;
use crate::topology::{ActorId, PickOrder};

#[derive(Debug, Clone)]
pub struct PriorityBiasedStrategy {
    designated: ActorId,
    priority_backoff: Duration,
    yield_backoff: Duration,
}

impl PriorityBiasedStrategy {
    pub fn new(config: &StrategyConfig) -> Self {
        Self {
            designated: ActorId::new(config.designated_actor),
            priority_backoff: config.priority_backoff,
            yield_backoff: config.yield_backoff,
        }
    }

    fn plan_for(&self, actor: ActorId) -> (PickOrder, Duration) {
        if actor == self.designated {
            (PickOrder::LowestFirst, self.priority_backoff)
        } else {
            (PickOrder::HighestFirst, self.yield_backoff)
        }
    }
}

#[async_trait]
impl AcquisitionStrategy for PriorityBiasedStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::PriorityBiased
    }

    async fn acquire_all(&self, actor: &ActorContext) -> Result<AcquireOutcome, ArbitrationError> {
        let (order, backoff) = self.plan_for(actor.id());
        let order = actor.needs().ordered(order);

        loop {
            if actor.is_stopped() {
                return Ok(AcquireOutcome::Cancelled);
            }

            match take_bounded(actor, &order, Duration::ZERO).await? {
                Attempt::Taken(set) => return Ok(AcquireOutcome::Acquired(set)),
                Attempt::Cancelled => return Ok(AcquireOutcome::Cancelled),
                Attempt::FailedAt(_) => actor.back_off(backoff).await,
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
    fn test_designated_actor_backs_off_less() {
        let config = StrategyConfig::default();
        let strategy = PriorityBiasedStrategy::new(&config);

        let (designated_order, designated_backoff) = strategy.plan_for(ActorId::new(0));
        let (other_order, other_backoff) = strategy.plan_for(ActorId::new(1));

        assert_eq!(designated_order, PickOrder::LowestFirst);
        assert_eq!(other_order, PickOrder::HighestFirst);
        assert!(designated_backoff < other_backoff);
    }
}
