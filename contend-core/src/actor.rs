//! Simulated actors and the cycle they run.
//!
//! Each actor is one tokio task looping think, request, work, release, rest
//! until the shared [`StopSignal`] is observed. Stop is checked at step
//! boundaries only; an actor never abandons a held set mid-cycle, so
//! whatever it holds when stop arrives is released before it exits.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use tokio::time::Instant;

use crate::config::ActorTiming;
use crate::events::{ActorState, EventEmitter, EventKind};
use crate::resource::{ArbitrationError, ResourceTable};
use crate::stats::RunStatistics;
use crate::strategy::{AcquireOutcome, AcquisitionStrategy};
use crate::topology::{ActorId, ResourceId, ResourceNeeds};

/// Cooperative cancellation flag shared by every task of one run.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    stopped: Arc<AtomicBool>,
}

impl StopSignal {
    /// Creates an untriggered signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks every holder of this signal to stop.
    pub fn trigger(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    /// Checks whether stop has been requested.
    pub fn is_triggered(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

/// Everything one actor owns or shares during a run.
///
/// Strategies receive `&ActorContext` and do all resource movement through
/// it, so every acquisition and release is instrumented the same way.
#[derive(Debug)]
pub struct ActorContext {
    id: ActorId,
    needs: ResourceNeeds,
    resources: Arc<ResourceTable>,
    stop: StopSignal,
    stats: Arc<RunStatistics>,
    events: EventEmitter,
    timing: ActorTiming,
    state: AtomicU8,
}

impl ActorContext {
    pub fn new(
        id: ActorId,
        needs: ResourceNeeds,
        resources: Arc<ResourceTable>,
        stop: StopSignal,
        stats: Arc<RunStatistics>,
        events: EventEmitter,
        timing: ActorTiming,
    ) -> Self {
        Self {
            id,
            needs,
            resources,
            stop,
            stats,
            events,
            timing,
            state: AtomicU8::new(ActorState::Thinking.as_u8()),
        }
    }

    pub fn id(&self) -> ActorId {
        self.id
    }

    pub fn needs(&self) -> ResourceNeeds {
        self.needs
    }

    pub fn stats(&self) -> &RunStatistics {
        &self.stats
    }

    pub fn timing(&self) -> &ActorTiming {
        &self.timing
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ActorState {
        ActorState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Checks whether the run is stopping.
    pub fn is_stopped(&self) -> bool {
        self.stop.is_triggered()
    }

    /// Moves to `state`, emitting a transition event when it changes.
    pub fn enter(&self, state: ActorState) {
        let previous = ActorState::from_u8(self.state.swap(state.as_u8(), Ordering::AcqRel));
        if previous != state {
            self.emit(EventKind::StateChanged {
                from: previous,
                to: state,
            });
        }
    }

    /// Emits an event on behalf of this actor.
    pub fn emit(&self, kind: EventKind) {
        self.events.emit(self.id, kind);
    }

    /// Waits without bound for `resource`.
    ///
    /// # Errors
    /// - `ArbitrationError::InvariantViolation` - Resource was already held
    /// - `ArbitrationError::ResourceClosed` - Resource semaphore closed
    pub async fn take(&self, resource: ResourceId) -> Result<(), ArbitrationError> {
        self.resources
            .get(resource)
            .acquire(self.id)
            .await
            .inspect_err(|error| self.note_error(error))?;
        self.emit(EventKind::Acquired { resource });
        Ok(())
    }

    /// Waits at most `timeout` for `resource`. Zero probes once.
    ///
    /// # Errors
    /// - `ArbitrationError::AcquisitionTimeout` - Resource stayed held
    /// - `ArbitrationError::InvariantViolation` - Resource was already held
    pub async fn try_take(
        &self,
        resource: ResourceId,
        timeout: Duration,
    ) -> Result<(), ArbitrationError> {
        let acquired = self
            .resources
            .get(resource)
            .try_acquire(self.id, timeout)
            .await
            .inspect_err(|error| self.note_error(error))?;
        if acquired {
            self.emit(EventKind::Acquired { resource });
            Ok(())
        } else {
            self.stats.record_timeout();
            self.emit(EventKind::TimedOut { resource });
            Err(ArbitrationError::AcquisitionTimeout { resource, timeout })
        }
    }

    /// Releases `resource`. The event is emitted first so an observer never
    /// sees the next holder's acquisition before this release.
    ///
    /// # Errors
    /// - `ArbitrationError::InvariantViolation` - This actor is not the holder
    pub fn give_back(&self, resource: ResourceId) -> Result<(), ArbitrationError> {
        self.emit(EventKind::Released { resource });
        self.resources
            .get(resource)
            .release(self.id)
            .inspect_err(|error| self.note_error(error))
    }

    /// Lets competing actors run between the first and second pick.
    pub async fn pause_between_picks(&self) {
        tokio::task::yield_now().await;
        if !self.timing.pickup_gap.is_zero() {
            tokio::time::sleep(self.timing.pickup_gap).await;
        }
    }

    /// Steps aside for `delay`. A zero delay still yields once.
    pub async fn back_off(&self, delay: Duration) {
        if delay.is_zero() {
            tokio::task::yield_now().await;
            return;
        }
        self.stats.record_backoff();
        self.emit(EventKind::BackedOff { delay });
        tokio::time::sleep(delay).await;
    }

    fn note_error(&self, error: &ArbitrationError) {
        if matches!(error, ArbitrationError::InvariantViolation { .. }) {
            self.stats.record_violation();
        }
    }
}

/// Runs the actor cycle until stop is observed or a fatal error occurs.
///
/// # Errors
/// - `ArbitrationError::InvariantViolation` - Resource pairing broke
/// - `ArbitrationError::ArbiterUnavailable` - Arbitration service went away
pub async fn run_actor(
    actor: Arc<ActorContext>,
    strategy: Arc<dyn AcquisitionStrategy>,
) -> Result<(), ArbitrationError> {
    let result = run_cycles(&actor, strategy.as_ref()).await;
    actor.enter(ActorState::Stopped);

    if let Err(error) = &result {
        tracing::error!("{} stopped on fatal error: {}", actor.id(), error);
    } else {
        tracing::debug!(
            "{} stopped after {} cycles",
            actor.id(),
            actor.stats().completions(actor.id())
        );
    }
    result
}

async fn run_cycles(
    actor: &ActorContext,
    strategy: &dyn AcquisitionStrategy,
) -> Result<(), ArbitrationError> {
    let work = actor.timing().eat_for(actor.id().index());

    loop {
        if actor.is_stopped() {
            return Ok(());
        }

        actor.enter(ActorState::Thinking);
        tokio::time::sleep(actor.timing().think).await;

        if actor.is_stopped() {
            return Ok(());
        }

        actor.enter(ActorState::RequestingFirst);
        let wait_start = Instant::now();
        let set = match strategy.acquire_all(actor).await? {
            AcquireOutcome::Acquired(set) => set,
            AcquireOutcome::Cancelled => {
                actor.emit(EventKind::Cancelled);
                return Ok(());
            }
        };
        actor.stats().record_wait(actor.id(), wait_start.elapsed());

        actor.enter(ActorState::Eating);
        tokio::time::sleep(work).await;

        actor.enter(ActorState::Releasing);
        strategy.release_all(actor, set)?;
        actor.stats().record_completion(actor.id());

        tokio::time::sleep(actor.timing().rest).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingSink;
    use crate::topology::Topology;

    fn context(sink: Arc<RecordingSink>) -> ActorContext {
        let topology = Topology::new(2, 2).unwrap();
        let actor = ActorId::new(0);
        ActorContext::new(
            actor,
            topology.needs(actor),
            Arc::new(ResourceTable::new(&topology)),
            StopSignal::new(),
            Arc::new(RunStatistics::new(2)),
            EventEmitter::new(sink),
            ActorTiming::default(),
        )
    }

    #[test]
    fn test_stop_signal_is_shared() {
        let signal = StopSignal::new();
        let clone = signal.clone();

        assert!(!clone.is_triggered());
        signal.trigger();
        assert!(clone.is_triggered());
    }

    #[tokio::test]
    async fn test_enter_emits_only_on_change() {
        let sink = Arc::new(RecordingSink::new());
        let actor = context(sink.clone());

        actor.enter(ActorState::Thinking);
        actor.enter(ActorState::RequestingFirst);
        actor.enter(ActorState::RequestingFirst);

        assert_eq!(actor.state(), ActorState::RequestingFirst);
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn test_take_and_give_back_emit_events() {
        let sink = Arc::new(RecordingSink::new());
        let actor = context(sink.clone());
        let resource = ResourceId::new(1);

        actor.take(resource).await.unwrap();
        actor.give_back(resource).unwrap();

        let kinds: Vec<EventKind> = sink.events().into_iter().map(|event| event.kind).collect();
        let expected = vec![
            EventKind::Acquired { resource },
            EventKind::Released { resource },
        ];
        assert_eq!(kinds, expected);
    }

    #[tokio::test]
    async fn test_foreign_release_counts_violation() {
        let sink = Arc::new(RecordingSink::new());
        let actor = context(sink);

        assert!(actor.give_back(ResourceId::new(0)).is_err());
        assert_eq!(actor.stats().snapshot().violations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_take_timeout_is_recorded() {
        let sink = Arc::new(RecordingSink::new());
        let actor = context(sink.clone());
        let resource = ResourceId::new(0);
        actor.take(resource).await.unwrap();

        let error = actor
            .try_take(resource, Duration::from_millis(10))
            .await
            .unwrap_err();

        assert!(error.is_recoverable());
        assert_eq!(actor.stats().snapshot().timeouts, 1);
        assert!(matches!(
            sink.events().last().map(|event| event.kind.clone()),
            Some(EventKind::TimedOut { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_back_off_does_not_count() {
        let sink = Arc::new(RecordingSink::new());
        let actor = context(sink);

        actor.back_off(Duration::ZERO).await;
        actor.back_off(Duration::from_millis(5)).await;

        assert_eq!(actor.stats().snapshot().backoffs, 1);
    }
}
