//! Naive pick order: left then right, waiting without bound on each.
//!
//! In a ring every actor can hold its left resource while waiting for its
//! neighbor's, which is the circular wait this strategy exists to show.

use async_trait::async_trait;

use super::{
    AcquireOutcome, AcquiredSet, AcquisitionStrategy, StrategyKind, release_set, take_blocking,
};
use crate::actor::ActorContext;
use crate::resource::ArbitrationError;
use crate::topology::PickOrder;

#[derive(Debug, Default, Clone, Copy)]
pub struct NaiveStrategy;

#[async_trait]
impl AcquisitionStrategy for NaiveStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Naive
    }

    async fn acquire_all(&self, actor: &ActorContext) -> Result<AcquireOutcome, ArbitrationError> {
        take_blocking(actor, actor.needs().ordered(PickOrder::LeftFirst)).await
    }

    fn release_all(&self, actor: &ActorContext, set: AcquiredSet) -> Result<(), ArbitrationError> {
        release_set(actor, set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_support::Harness;
    use crate::topology::ResourceId;

    #[tokio::test]
    async fn test_uncontended_actor_takes_left_then_right() {
        let harness = Harness::new(3, 3);
        let actor = harness.actor(2);

        let outcome = NaiveStrategy.acquire_all(&actor).await.unwrap();
        let AcquireOutcome::Acquired(set) = outcome else {
            panic!("expected acquisition");
        };

        assert_eq!(set.resources(), &[ResourceId::new(2), ResourceId::new(0)]);
        NaiveStrategy.release_all(&actor, set).unwrap();
        assert!(harness.table.held().is_empty());
    }
}
