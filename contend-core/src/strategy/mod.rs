//! Acquisition strategies: how an actor obtains its resource set and how it
//! reacts to contention.
//!
//! A strategy is shared by every actor of a run. It is the only coupling
//! between the actor cycle and contention policy.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::actor::{ActorContext, StopSignal};
use crate::arbiter::{Arbiter, Permit};
use crate::config::{ActorTiming, StrategyConfig};
use crate::events::ActorState;
use crate::resource::ArbitrationError;
use crate::topology::{ActorId, ResourceId, Topology};
use crate::{ContendError, Result};

pub mod aging;
pub mod asymmetric;
pub mod fair_queue;
pub mod naive;
pub mod ordered;
pub mod polite;
pub mod priority;
pub mod random_backoff;
pub mod starvation;
pub mod timeout_retry;
pub mod waiter;

pub use aging::AgingStrategy;
pub use asymmetric::AsymmetricStrategy;
pub use fair_queue::FairQueueStrategy;
pub use naive::NaiveStrategy;
pub use ordered::OrderedStrategy;
pub use polite::PoliteStrategy;
pub use priority::PriorityBiasedStrategy;
pub use random_backoff::RandomBackoffStrategy;
pub use starvation::StarvationStrategy;
pub use timeout_retry::TimeoutRetryStrategy;
pub use waiter::WaiterStrategy;

/// Resources an actor holds after a successful `acquire_all`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquiredSet {
    resources: Vec<ResourceId>,
    permit: Option<Permit>,
}

impl AcquiredSet {
    /// Creates a set from resources in acquisition order.
    pub fn new(resources: Vec<ResourceId>) -> Self {
        Self {
            resources,
            permit: None,
        }
    }

    /// Attaches the arbiter permit that admitted this acquisition.
    pub fn with_permit(mut self, permit: Permit) -> Self {
        self.permit = Some(permit);
        self
    }

    /// Resources in acquisition order.
    pub fn resources(&self) -> &[ResourceId] {
        &self.resources
    }

    pub fn permit(&self) -> Option<Permit> {
        self.permit
    }

    /// Drops the permit, keeping only the resources.
    pub fn into_resources(self) -> Vec<ResourceId> {
        self.resources
    }
}

/// Result of one `acquire_all` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Every needed resource is held.
    Acquired(AcquiredSet),
    /// Stop was observed; nothing is held.
    Cancelled,
}

/// Strategy-specific figures reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StrategyMetrics {
    /// Highest aging priority reached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_priority_observed: Option<u64>,
    /// Permits handed out by an arbiter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grants_issued: Option<u64>,
}

/// Policy governing resource acquisition under contention.
///
/// Both operations are called concurrently from every actor. Implementations
/// check the stop signal inside every retry loop and never return
/// `Cancelled` while holding a resource.
#[async_trait]
pub trait AcquisitionStrategy: Send + Sync {
    /// Which variant this is.
    fn kind(&self) -> StrategyKind;

    /// Obtains every resource `actor` needs.
    ///
    /// # Errors
    /// - `ArbitrationError::InvariantViolation` - Resource pairing broke
    /// - `ArbitrationError::ArbiterUnavailable` - Arbitration service is gone
    async fn acquire_all(&self, actor: &ActorContext) -> Result<AcquireOutcome, ArbitrationError>;

    /// Releases a set previously returned by `acquire_all`.
    ///
    /// # Errors
    /// - `ArbitrationError::InvariantViolation` - Actor did not hold the set
    fn release_all(&self, actor: &ActorContext, set: AcquiredSet)
    -> Result<(), ArbitrationError>;

    /// Spawns background tasks the strategy needs (scheduler, ticker).
    fn spawn_services(&self, _stop: StopSignal) -> Vec<JoinHandle<()>> {
        Vec::new()
    }

    fn metrics(&self) -> StrategyMetrics {
        StrategyMetrics::default()
    }

    /// Pacing for `actor`. Most strategies run every actor at `base`.
    fn timing_for(&self, _actor: ActorId, base: &ActorTiming) -> ActorTiming {
        base.clone()
    }
}

/// Selectable strategy variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    Naive,
    Ordered,
    TimeoutRetry,
    Asymmetric,
    WaiterMediated,
    RandomBackoff,
    PriorityBiased,
    FairQueue,
    Aging,
    Polite,
    Starvation,
}

impl StrategyKind {
    /// Every variant, in presentation order.
    pub const ALL: [StrategyKind; 11] = [
        StrategyKind::Naive,
        StrategyKind::Ordered,
        StrategyKind::TimeoutRetry,
        StrategyKind::Asymmetric,
        StrategyKind::WaiterMediated,
        StrategyKind::Polite,
        StrategyKind::RandomBackoff,
        StrategyKind::PriorityBiased,
        StrategyKind::Starvation,
        StrategyKind::FairQueue,
        StrategyKind::Aging,
    ];

    /// Canonical selection name.
    pub fn name(self) -> &'static str {
        match self {
            StrategyKind::Naive => "naive",
            StrategyKind::Ordered => "ordered",
            StrategyKind::TimeoutRetry => "timeout-retry",
            StrategyKind::Asymmetric => "asymmetric",
            StrategyKind::WaiterMediated => "waiter",
            StrategyKind::RandomBackoff => "random-backoff",
            StrategyKind::PriorityBiased => "priority",
            StrategyKind::FairQueue => "fair-queue",
            StrategyKind::Aging => "aging",
            StrategyKind::Polite => "polite",
            StrategyKind::Starvation => "greedy",
        }
    }

    /// Demonstration alias accepted in addition to the canonical name.
    pub fn alias(self) -> &'static str {
        match self {
            StrategyKind::Naive => "deadlock",
            StrategyKind::Ordered => "deadlock-fix-resource-ordering",
            StrategyKind::TimeoutRetry => "deadlock-fix-timeout",
            StrategyKind::Asymmetric => "deadlock-fix-asymmetric-behavior",
            StrategyKind::WaiterMediated => "deadlock-fix-waiter",
            StrategyKind::RandomBackoff => "livelock-fix-random-backoff",
            StrategyKind::PriorityBiased => "livelock-fix-priority",
            StrategyKind::FairQueue => "starvation-fix-fair-scheduling",
            StrategyKind::Aging => "starvation-fix-aging",
            StrategyKind::Polite => "livelock",
            StrategyKind::Starvation => "starvation",
        }
    }

    /// One-line explanation shown by `contend list`.
    pub fn description(self) -> &'static str {
        match self {
            StrategyKind::Naive => "left then right, block forever; deadlocks in a ring",
            StrategyKind::Ordered => "lowest index first, block forever; no circular wait",
            StrategyKind::TimeoutRetry => {
                "bounded wait per resource; give up the partial set and retry"
            }
            StrategyKind::Asymmetric => {
                "even actors reverse their pick order; parity breaks the cycle"
            }
            StrategyKind::WaiterMediated => {
                "central waiter admits an actor only while no neighbor works"
            }
            StrategyKind::RandomBackoff => "step aside for a random delay after a failed pick",
            StrategyKind::PriorityBiased => {
                "one designated actor wins; everyone else backs off longer"
            }
            StrategyKind::FairQueue => "FIFO scheduler grants one holder at a time",
            StrategyKind::Aging => "waiting raises priority; top-ranked waiter goes first",
            StrategyKind::Polite => "hold, probe, step aside in lockstep; livelocks",
            StrategyKind::Starvation => {
                "greedy actors keep the line full; patient ones time out and starve"
            }
        }
    }

    /// Topology this strategy is usually demonstrated on.
    pub fn default_topology(self) -> (usize, usize) {
        match self {
            StrategyKind::Naive
            | StrategyKind::Ordered
            | StrategyKind::TimeoutRetry
            | StrategyKind::Asymmetric
            | StrategyKind::WaiterMediated => (5, 5),
            StrategyKind::Polite | StrategyKind::RandomBackoff | StrategyKind::PriorityBiased => {
                (2, 2)
            }
            StrategyKind::Starvation | StrategyKind::FairQueue | StrategyKind::Aging => (5, 1),
        }
    }

    /// Creates a fresh strategy instance for one run.
    ///
    /// # Errors
    /// - `ContendError::Configuration` - Invalid strategy parameters
    pub fn build(
        self,
        topology: Topology,
        config: &StrategyConfig,
    ) -> Result<Arc<dyn AcquisitionStrategy>> {
        config.validate()?;

        let strategy: Arc<dyn AcquisitionStrategy> = match self {
            StrategyKind::Naive => Arc::new(NaiveStrategy),
            StrategyKind::Ordered => Arc::new(OrderedStrategy),
            StrategyKind::TimeoutRetry => Arc::new(TimeoutRetryStrategy::new(config)),
            StrategyKind::Asymmetric => Arc::new(AsymmetricStrategy),
            StrategyKind::WaiterMediated => Arc::new(WaiterStrategy::new(topology, config)),
            StrategyKind::RandomBackoff => Arc::new(RandomBackoffStrategy::new(config)),
            StrategyKind::PriorityBiased => {
                if config.designated_actor >= topology.actor_count() {
                    return Err(ContendError::Configuration {
                        reason: format!(
                            "designated actor {} outside {}",
                            config.designated_actor, topology
                        ),
                    });
                }
                Arc::new(PriorityBiasedStrategy::new(config))
            }
            StrategyKind::FairQueue => Arc::new(FairQueueStrategy::new(config)),
            StrategyKind::Aging => Arc::new(AgingStrategy::new(topology, config)),
            StrategyKind::Polite => Arc::new(PoliteStrategy::new(config)),
            StrategyKind::Starvation => Arc::new(StarvationStrategy::new(config)),
        };

        Ok(strategy)
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StrategyKind {
    type Err = ContendError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_lowercase();
        StrategyKind::ALL
            .into_iter()
            .find(|kind| kind.name() == wanted || kind.alias() == wanted)
            .ok_or_else(|| ContendError::UnknownStrategy {
                name: s.to_string(),
            })
    }
}

/// State an actor is in while going for the resource at `position`.
pub(crate) fn requesting_state(position: usize) -> ActorState {
    if position == 0 {
        ActorState::RequestingFirst
    } else {
        ActorState::RequestingSecond
    }
}

/// Takes `order` without bounds, giving up only if stop arrives between
/// picks.
pub(crate) async fn take_blocking(
    actor: &ActorContext,
    order: Vec<ResourceId>,
) -> Result<AcquireOutcome, ArbitrationError> {
    if actor.is_stopped() {
        return Ok(AcquireOutcome::Cancelled);
    }

    let mut held = Vec::with_capacity(order.len());
    for (position, resource) in order.into_iter().enumerate() {
        if position > 0 {
            actor.pause_between_picks().await;
            if actor.is_stopped() {
                release_resources(actor, &held)?;
                return Ok(AcquireOutcome::Cancelled);
            }
        }
        actor.enter(requesting_state(position));

        if let Err(error) = actor.take(resource).await {
            release_resources(actor, &held)?;
            return Err(error);
        }
        held.push(resource);
    }

    Ok(AcquireOutcome::Acquired(AcquiredSet::new(held)))
}

/// Outcome of one bounded pass over the pick order.
#[derive(Debug)]
pub(crate) enum Attempt {
    Taken(AcquiredSet),
    /// Resource at `position` stayed held; nothing is retained.
    FailedAt(usize),
    Cancelled,
}

/// Tries each resource of `order` for at most `timeout`, releasing any
/// partial set when a pick fails.
pub(crate) async fn take_bounded(
    actor: &ActorContext,
    order: &[ResourceId],
    timeout: Duration,
) -> Result<Attempt, ArbitrationError> {
    let mut held = Vec::with_capacity(order.len());
    for (position, resource) in order.iter().copied().enumerate() {
        if position > 0 {
            actor.pause_between_picks().await;
            if actor.is_stopped() {
                release_resources(actor, &held)?;
                return Ok(Attempt::Cancelled);
            }
        }
        actor.enter(requesting_state(position));

        match actor.try_take(resource, timeout).await {
            Ok(()) => held.push(resource),
            Err(error) if error.is_recoverable() => {
                release_resources(actor, &held)?;
                return Ok(Attempt::FailedAt(position));
            }
            Err(error) => {
                release_resources(actor, &held)?;
                return Err(error);
            }
        }
    }

    Ok(Attempt::Taken(AcquiredSet::new(held)))
}

/// Releases `held` in reverse acquisition order. Every resource is attempted;
/// the first error is returned.
pub(crate) fn release_resources(
    actor: &ActorContext,
    held: &[ResourceId],
) -> Result<(), ArbitrationError> {
    let mut first_error = None;
    for resource in held.iter().rev() {
        if let Err(error) = actor.give_back(*resource) {
            first_error.get_or_insert(error);
        }
    }
    first_error.map_or(Ok(()), Err)
}

/// Asks `arbiter` for admission, then takes `order` without bounds. The
/// permit travels with the returned set.
pub(crate) async fn take_admitted(
    actor: &ActorContext,
    arbiter: &dyn Arbiter,
    order: Vec<ResourceId>,
) -> Result<AcquireOutcome, ArbitrationError> {
    let Some(permit) = arbiter.request(actor).await? else {
        return Ok(AcquireOutcome::Cancelled);
    };

    match take_blocking(actor, order).await {
        Ok(AcquireOutcome::Acquired(set)) => Ok(AcquireOutcome::Acquired(set.with_permit(permit))),
        Ok(AcquireOutcome::Cancelled) => {
            arbiter.release(permit)?;
            Ok(AcquireOutcome::Cancelled)
        }
        Err(error) => {
            if let Err(release_error) = arbiter.release(permit) {
                tracing::warn!("{} could not return permit: {}", actor.id(), release_error);
            }
            Err(error)
        }
    }
}

/// Releases resources first, then the arbiter permit.
pub(crate) fn release_admitted(
    actor: &ActorContext,
    arbiter: &dyn Arbiter,
    set: AcquiredSet,
) -> Result<(), ArbitrationError> {
    let resources = release_resources(actor, set.resources());
    let admission = set
        .permit()
        .map_or(Ok(()), |permit| arbiter.release(permit));
    resources.and(admission)
}

/// Plain resource release for strategies without an arbiter.
pub(crate) fn release_set(actor: &ActorContext, set: AcquiredSet) -> Result<(), ArbitrationError> {
    release_resources(actor, set.resources())
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use crate::actor::{ActorContext, StopSignal};
    use crate::config::ActorTiming;
    use crate::events::{EventEmitter, RecordingSink};
    use crate::resource::ResourceTable;
    use crate::stats::RunStatistics;
    use crate::topology::{ActorId, Topology};

    /// Actors sharing one table, one stop signal and one recorder.
    pub struct Harness {
        pub topology: Topology,
        pub table: Arc<ResourceTable>,
        pub stop: StopSignal,
        pub stats: Arc<RunStatistics>,
        pub sink: Arc<RecordingSink>,
    }

    impl Harness {
        pub fn new(actors: usize, resources: usize) -> Self {
            let topology = Topology::new(actors, resources).unwrap();
            Self {
                table: Arc::new(ResourceTable::new(&topology)),
                stop: StopSignal::new(),
                stats: Arc::new(RunStatistics::new(actors)),
                sink: Arc::new(RecordingSink::new()),
                topology,
            }
        }

        pub fn actor(&self, index: usize) -> ActorContext {
            let id = ActorId::new(index);
            ActorContext::new(
                id,
                self.topology.needs(id),
                self.table.clone(),
                self.stop.clone(),
                self.stats.clone(),
                EventEmitter::new(self.sink.clone()),
                ActorTiming::default(),
            )
        }
    }
}
