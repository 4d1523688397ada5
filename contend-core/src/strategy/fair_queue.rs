//! Fair queue: actors line up with a FIFO scheduler and work one at a time
//! in arrival order, so nobody is overtaken twice.

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use super::{
    AcquireOutcome, AcquiredSet, AcquisitionStrategy, StrategyKind, StrategyMetrics,
    release_admitted, take_admitted,
};
use crate::actor::{ActorContext, StopSignal};
use crate::arbiter::fifo::fair_queue;
use crate::arbiter::{FairQueueHandle, FairQueueService};
use crate::config::StrategyConfig;
use crate::resource::ArbitrationError;
use crate::topology::PickOrder;

#[derive(Debug)]
pub struct FairQueueStrategy {
    handle: FairQueueHandle,
    service: Mutex<Option<FairQueueService>>,
}

impl FairQueueStrategy {
    pub fn new(config: &StrategyConfig) -> Self {
        let (handle, service) = fair_queue(config.arbiter_poll);
        Self {
            handle,
            service: Mutex::new(Some(service)),
        }
    }
}

#[async_trait]
impl AcquisitionStrategy for FairQueueStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::FairQueue
    }

    async fn acquire_all(&self, actor: &ActorContext) -> Result<AcquireOutcome, ArbitrationError> {
        let order = actor.needs().ordered(PickOrder::LowestFirst);
        take_admitted(actor, &self.handle, order).await
    }

    fn release_all(&self, actor: &ActorContext, set: AcquiredSet) -> Result<(), ArbitrationError> {
        release_admitted(actor, &self.handle, set)
    }

    fn spawn_services(&self, stop: StopSignal) -> Vec<JoinHandle<()>> {
        match self.service.lock().take() {
            Some(service) => vec![tokio::spawn(service.run(stop))],
            None => {
                tracing::warn!("Fair queue scheduler already spawned");
                Vec::new()
            }
        }
    }

    fn metrics(&self) -> StrategyMetrics {
        StrategyMetrics {
            grants_issued: Some(self.handle.grants_issued()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::strategy::test_support::Harness;

    #[tokio::test(start_paused = true)]
    async fn test_second_waiter_served_after_completion() {
        let harness = Arc::new(Harness::new(5, 1));
        let strategy = Arc::new(FairQueueStrategy::new(&StrategyConfig::default()));
        let services = strategy.spawn_services(harness.stop.clone());
        assert_eq!(services.len(), 1);
        assert!(strategy.spawn_services(harness.stop.clone()).is_empty());

        let first = harness.actor(3);
        let AcquireOutcome::Acquired(set) = strategy.acquire_all(&first).await.unwrap() else {
            panic!("expected acquisition");
        };

        let second = {
            let harness = harness.clone();
            let strategy = strategy.clone();
            tokio::spawn(async move {
                let actor = harness.actor(1);
                strategy.acquire_all(&actor).await
            })
        };

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!second.is_finished());

        strategy.release_all(&first, set).unwrap();
        let outcome = second.await.unwrap().unwrap();
        let AcquireOutcome::Acquired(set) = outcome else {
            panic!("expected acquisition");
        };
        assert_eq!(set.permit().map(|permit| permit.ticket), Some(2));

        harness.stop.trigger();
        for service in services {
            service.await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_queued_request() {
        let harness = Arc::new(Harness::new(2, 1));
        let strategy = Arc::new(FairQueueStrategy::new(&StrategyConfig::default()));
        let services = strategy.spawn_services(harness.stop.clone());

        let holder = harness.actor(0);
        let AcquireOutcome::Acquired(_set) = strategy.acquire_all(&holder).await.unwrap() else {
            panic!("expected acquisition");
        };

        let queued = {
            let harness = harness.clone();
            let strategy = strategy.clone();
            tokio::spawn(async move {
                let actor = harness.actor(1);
                strategy.acquire_all(&actor).await
            })
        };

        tokio::time::sleep(Duration::from_millis(150)).await;
        harness.stop.trigger();

        assert_eq!(queued.await.unwrap().unwrap(), AcquireOutcome::Cancelled);
        for service in services {
            service.await.unwrap();
        }
    }
}
