//! Global resource ordering: every actor takes its lower-indexed resource
//! first, so no cycle of waits can form.

use async_trait::async_trait;

use super::{
    AcquireOutcome, AcquiredSet, AcquisitionStrategy, StrategyKind, release_set, take_blocking,
};
use crate::actor::ActorContext;
use crate::resource::ArbitrationError;
use crate::topology::PickOrder;

#[derive(Debug, Default, Clone, Copy)]
pub struct OrderedStrategy;

#[async_trait]
impl AcquisitionStrategy for OrderedStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Ordered
    }

    async fn acquire_all(&self, actor: &ActorContext) -> Result<AcquireOutcome, ArbitrationError> {
        take_blocking(actor, actor.needs().ordered(PickOrder::LowestFirst)).await
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
    async fn test_wraparound_actor_takes_lowest_first() {
        let harness = Harness::new(5, 5);
        let actor = harness.actor(4);

        let outcome = OrderedStrategy.acquire_all(&actor).await.unwrap();
        let AcquireOutcome::Acquired(set) = outcome else {
            panic!("expected acquisition");
        };

        assert_eq!(set.resources(), &[ResourceId::new(0), ResourceId::new(4)]);
        OrderedStrategy.release_all(&actor, set).unwrap();
    }
}
