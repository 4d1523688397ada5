//! Parity-based pick order: even actors reach right first, odd actors left
//! first. Adjacent actors then contend for the same first resource, which
//! breaks the cycle.

use async_trait::async_trait;

use super::{
    AcquireOutcome, AcquiredSet, AcquisitionStrategy, StrategyKind, release_set, take_blocking,
};
use crate::actor::ActorContext;
use crate::resource::ArbitrationError;
use crate::topology::PickOrder;

#[derive(Debug, Default, Clone, Copy)]
pub struct AsymmetricStrategy;

impl AsymmetricStrategy {
    fn order_for(actor: &ActorContext) -> PickOrder {
        if actor.id().is_even() {
            PickOrder::RightFirst
        } else {
            PickOrder::LeftFirst
        }
    }
}

#[async_trait]
impl AcquisitionStrategy for AsymmetricStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Asymmetric
    }

    async fn acquire_all(&self, actor: &ActorContext) -> Result<AcquireOutcome, ArbitrationError> {
        take_blocking(actor, actor.needs().ordered(Self::order_for(actor))).await
    }

    fn release_all(&self, actor: &ActorContext, set: AcquiredSet) -> Result<(), ArbitrationError> {
        release_set(actor, set)
    }
}
