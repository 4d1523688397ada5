//! Greedy versus patient: the starvation baseline.
//!
//! Greedy actors queue on their resources without bound, work long and rest
//! briefly, so at least one of them is always in line. Patient actors only
//! wait a bounded time and step aside for a long pause when they give up.
//! Behind a line that never empties, a patient actor's wait always outlasts
//! its timeout and it never works.

use std::time::Duration;

use async_trait::async_trait;

use super::{
    AcquireOutcome, AcquiredSet, AcquisitionStrategy, Attempt, StrategyKind, release_set,
    take_blocking, take_bounded,
};
use crate::actor::ActorContext;
use crate::config::{ActorTiming, StrategyConfig};
use crate::resource::ArbitrationError;
use crate::topology::{ActorId, PickOrder};

#[derive(Debug, Clone)]
pub struct StarvationStrategy {
    greedy_actors: usize,
    greedy_hold: Duration,
    greedy_rest: Duration,
    patient_timeout: Duration,
    patient_hold: Duration,
    patient_pause: Duration,
}

impl StarvationStrategy {
    pub fn new(config: &StrategyConfig) -> Self {
        Self {
            greedy_actors: config.greedy_actors,
            greedy_hold: config.greedy_hold,
            greedy_rest: config.greedy_rest,
            patient_timeout: config.patient_timeout,
            patient_hold: config.patient_hold,
            patient_pause: config.patient_pause,
        }
    }

    /// Checks whether `actor` is one of the greedy ones.
    pub fn is_greedy(&self, actor: ActorId) -> bool {
        actor.index() < self.greedy_actors
    }
}

#[async_trait]
impl AcquisitionStrategy for StarvationStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Starvation
    }

    async fn acquire_all(&self, actor: &ActorContext) -> Result<AcquireOutcome, ArbitrationError> {
        let order = actor.needs().ordered(PickOrder::LowestFirst);
        if self.is_greedy(actor.id()) {
            return take_blocking(actor, order).await;
        }

        loop {
            if actor.is_stopped() {
                return Ok(AcquireOutcome::Cancelled);
            }

            match take_bounded(actor, &order, self.patient_timeout).await? {
                Attempt::Taken(set) => return Ok(AcquireOutcome::Acquired(set)),
                Attempt::Cancelled => return Ok(AcquireOutcome::Cancelled),
                Attempt::FailedAt(_) => actor.back_off(self.patient_pause).await,
            }
        }
    }

    fn release_all(&self, actor: &ActorContext, set: AcquiredSet) -> Result<(), ArbitrationError> {
        release_set(actor, set)
    }

    fn timing_for(&self, actor: ActorId, base: &ActorTiming) -> ActorTiming {
        if self.is_greedy(actor) {
            ActorTiming {
                think: Duration::ZERO,
                eat: self.greedy_hold,
                eat_skew: Duration::ZERO,
                rest: self.greedy_rest,
                pickup_gap: base.pickup_gap,
            }
        } else {
            ActorTiming {
                think: base.think,
                eat: self.patient_hold,
                eat_skew: Duration::ZERO,
                rest: self.patient_pause,
                pickup_gap: base.pickup_gap,
            }
        }
    }
}
