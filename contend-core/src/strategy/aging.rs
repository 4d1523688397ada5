//! Aging: every period a waiting actor gains priority, and only the
//! top-ranked waiter among its conflicts may go for its resources. The
//! priority resets once the actor holds its set.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use super::{
    AcquireOutcome, AcquiredSet, AcquisitionStrategy, StrategyKind, StrategyMetrics, release_set,
    take_admitted,
};
use crate::actor::{ActorContext, StopSignal};
use crate::arbiter::{AgingArbiter, Arbiter};
use crate::config::StrategyConfig;
use crate::resource::ArbitrationError;
use crate::topology::{PickOrder, Topology};

#[derive(Debug)]
pub struct AgingStrategy {
    arbiter: Arc<AgingArbiter>,
}

impl AgingStrategy {
    pub fn new(topology: Topology, config: &StrategyConfig) -> Self {
        Self {
            arbiter: Arc::new(AgingArbiter::new(
                topology,
                config.arbiter_poll,
                config.aging_period,
                config.aging_increment,
            )),
        }
    }
}

#[async_trait]
impl AcquisitionStrategy for AgingStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Aging
    }

    async fn acquire_all(&self, actor: &ActorContext) -> Result<AcquireOutcome, ArbitrationError> {
        let order = actor.needs().ordered(PickOrder::LowestFirst);
        match take_admitted(actor, self.arbiter.as_ref(), order).await? {
            AcquireOutcome::Acquired(set) => {
                if let Some(permit) = set.permit() {
                    self.arbiter.release(permit)?;
                }
                Ok(AcquireOutcome::Acquired(AcquiredSet::new(set.into_resources())))
            }
            AcquireOutcome::Cancelled => Ok(AcquireOutcome::Cancelled),
        }
    }

    fn release_all(&self, actor: &ActorContext, set: AcquiredSet) -> Result<(), ArbitrationError> {
        release_set(actor, set)
    }

    fn spawn_services(&self, stop: StopSignal) -> Vec<JoinHandle<()>> {
        let arbiter = self.arbiter.clone();
        vec![tokio::spawn(async move { arbiter.run_ticker(stop).await })]
    }

    fn metrics(&self) -> StrategyMetrics {
        StrategyMetrics {
            max_priority_observed: Some(self.arbiter.max_priority()),
            grants_issued: Some(self.arbiter.grants_issued()),
        }
    }
}
