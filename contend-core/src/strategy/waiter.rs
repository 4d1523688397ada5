//! Waiter-mediated acquisition: a central arbiter admits an actor only
//! while none of its neighbors is working.

use std::sync::Arc;

use async_trait::async_trait;

use super::{
    AcquireOutcome, AcquiredSet, AcquisitionStrategy, StrategyKind, StrategyMetrics,
    release_admitted, take_admitted,
};
use crate::actor::ActorContext;
use crate::arbiter::AdjacencyArbiter;
use crate::config::StrategyConfig;
use crate::resource::ArbitrationError;
use crate::topology::{PickOrder, Topology};

#[derive(Debug)]
pub struct WaiterStrategy {
    arbiter: Arc<AdjacencyArbiter>,
}

impl WaiterStrategy {
    pub fn new(topology: Topology, config: &StrategyConfig) -> Self {
        Self {
            arbiter: Arc::new(AdjacencyArbiter::new(topology, config.arbiter_poll)),
        }
    }
}

#[async_trait]
impl AcquisitionStrategy for WaiterStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::WaiterMediated
    }

    async fn acquire_all(&self, actor: &ActorContext) -> Result<AcquireOutcome, ArbitrationError> {
        let order = actor.needs().ordered(PickOrder::LeftFirst);
        take_admitted(actor, self.arbiter.as_ref(), order).await
    }

    fn release_all(&self, actor: &ActorContext, set: AcquiredSet) -> Result<(), ArbitrationError> {
        release_admitted(actor, self.arbiter.as_ref(), set)
    }

    fn metrics(&self) -> StrategyMetrics {
        StrategyMetrics {
            grants_issued: Some(self.arbiter.grants_issued()),
            ..Default::default()
        }
    }
}
