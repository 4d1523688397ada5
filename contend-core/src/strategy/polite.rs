//! Polite lockstep: take one resource, hold it, probe the other, and on
//! failure hesitate and step aside. Two actors doing this in phase keep
//! stepping aside for each other and neither ever works.

use std::time::Duration;

use async_trait::async_trait;

use super::{AcquireOutcome, AcquiredSet, AcquisitionStrategy, StrategyKind, release_set};
use crate::actor::ActorContext;
use crate::config::StrategyConfig;
use crate::events::ActorState;
use crate::resource::ArbitrationError;
use crate::topology::PickOrder;

#[derive(Debug, Clone)]
pub struct PoliteStrategy {
    timeout: Duration,
    hold: Duration,
    pause: Duration,
}

impl PoliteStrategy {
    pub fn new(config: &StrategyConfig) -> Self {
        Self {
            timeout: config.acquire_timeout,
            hold: config.polite_hold,
            pause: config.polite_pause,
        }
    }
}

#[async_trait]
impl AcquisitionStrategy for PoliteStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Polite
    }

    async fn acquire_all(&self, actor: &ActorContext) -> Result<AcquireOutcome, ArbitrationError> {
        let order = actor.needs().ordered(PickOrder::LeftFirst);
        let first = order[0];

        loop {
            if actor.is_stopped() {
                return Ok(AcquireOutcome::Cancelled);
            }

            actor.enter(ActorState::RequestingFirst);
            match actor.try_take(first, self.timeout).await {
                Ok(()) => {}
                Err(error) if error.is_recoverable() => {
                    actor.back_off(self.pause).await;
                    continue;
                }
                Err(error) => return Err(error),
            }

            let Some(&second) = order.get(1) else {
                return Ok(AcquireOutcome::Acquired(AcquiredSet::new(order)));
            };

            tokio::time::sleep(self.hold).await;
            if actor.is_stopped() {
                actor.give_back(first)?;
                return Ok(AcquireOutcome::Cancelled);
            }

            actor.enter(ActorState::RequestingSecond);
            match actor.try_take(second, Duration::ZERO).await {
                Ok(()) => return Ok(AcquireOutcome::Acquired(AcquiredSet::new(order))),
                Err(error) if error.is_recoverable() => {
                    // Hesitate before stepping aside.
                    tokio::task::yield_now().await;
                    actor.give_back(first)?;
                    actor.back_off(self.pause).await;
                }
                Err(error) => {
                    actor.give_back(first)?;
                    return Err(error);
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
    use std::sync::Arc;

    use super::*;
    use crate::strategy::test_support::Harness;

    #[tokio::test(start_paused = true)]
    async fn test_lockstep_pair_never_acquires() {
        let harness = Arc::new(Harness::new(2, 2));
        let strategy = Arc::new(PoliteStrategy::new(&StrategyConfig::default()));

        let tasks: Vec<_> = (0..2)
            .map(|index| {
                let harness = harness.clone();
                let strategy = strategy.clone();
                tokio::spawn(async move {
                    let actor = harness.actor(index);
                    strategy.acquire_all(&actor).await
                })
            })
            .collect();

        tokio::time::sleep(Duration::from_secs(2)).await;
        harness.stop.trigger();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), AcquireOutcome::Cancelled);
        }
        assert!(harness.table.held().is_empty());
        assert!(harness.stats.snapshot().timeouts >= 10);
    }

    #[tokio::test]
    async fn test_lone_actor_acquires() {
        let harness = Harness::new(1, 2);
        let strategy = PoliteStrategy::new(&StrategyConfig::default());
        let actor = harness.actor(0);

        let outcome = strategy.acquire_all(&actor).await.unwrap();
        assert!(matches!(outcome, AcquireOutcome::Acquired(_)));
    }
}
