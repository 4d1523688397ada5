//! Aging arbiter: waiting actors gain priority over time, and only the
//! top-ranked waiter among conflicting actors may go for its resources.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::{Instant, MissedTickBehavior};

use super::{Arbiter, Permit};
use crate::actor::{ActorContext, StopSignal};
use crate::events::EventKind;
use crate::resource::ArbitrationError;
use crate::topology::{ActorId, Topology};

#[derive(Debug)]
struct AgingState {
    priorities: Vec<u64>,
    waiting_since: Vec<Option<Instant>>,
    max_priority: u64,
    next_ticket: u64,
}

impl AgingState {
    /// Ordering key: higher priority, then longer wait, then lower id.
    fn outranks(&self, a: usize, b: usize) -> bool {
        let key = |index: usize| {
            (
                std::cmp::Reverse(self.priorities[index]),
                self.waiting_since[index],
                index,
            )
        };
        key(a) < key(b)
    }
}

/// Priority table shared by the aging strategy and its ticker.
#[derive(Debug)]
pub struct AgingArbiter {
    topology: Topology,
    poll: Duration,
    period: Duration,
    increment: u64,
    state: Mutex<AgingState>,
}

impl AgingArbiter {
    pub fn new(topology: Topology, poll: Duration, period: Duration, increment: u64) -> Self {
        let actors = topology.actor_count();
        Self {
            topology,
            poll,
            period,
            increment,
            state: Mutex::new(AgingState {
                priorities: vec![0; actors],
                waiting_since: vec![None; actors],
                max_priority: 0,
                next_ticket: 0,
            }),
        }
    }

    /// Marks `actor` as waiting, keeping an earlier start if present.
    pub fn register(&self, actor: ActorId) {
        let mut state = self.state.lock();
        let since = &mut state.waiting_since[actor.index()];
        if since.is_none() {
            *since = Some(Instant::now());
        }
    }

    /// Admits `actor` if no conflicting waiter outranks it.
    ///
    /// Every waiting neighbor counts, including one that is itself outranked
    /// further along. On a ring this can leave a single actor admitted where
    /// two non-adjacent ones could work, so throughput is lower than with
    /// ordering; the bounded wait is what it buys.
    ///
    /// # Errors
    /// - `ArbitrationError::ArbiterDenied` - `actor` is not registered, or a
    ///   conflicting waiter outranks it
    pub fn try_admit(&self, actor: ActorId) -> Result<Permit, ArbitrationError> {
        let mut state = self.state.lock();
        let me = actor.index();
        let denied = ArbitrationError::ArbiterDenied { actor };
        if state.waiting_since[me].is_none() {
            return Err(denied);
        }

        let outranked = self.topology.neighbors(actor).into_iter().any(|other| {
            state.waiting_since[other.index()].is_some() && state.outranks(other.index(), me)
        });
        if outranked {
            return Err(denied);
        }

        state.next_ticket += 1;
        Ok(Permit {
            actor,
            ticket: state.next_ticket,
        })
    }

    /// Adds the increment to every waiting actor.
    pub fn age(&self) {
        let mut state = self.state.lock();
        let state = &mut *state;
        for (priority, since) in state.priorities.iter_mut().zip(&state.waiting_since) {
            if since.is_some() {
                *priority += self.increment;
                state.max_priority = state.max_priority.max(*priority);
            }
        }
    }

    /// Drops `actor` from the waiting set without a grant.
    pub fn withdraw(&self, actor: ActorId) {
        let mut state = self.state.lock();
        state.priorities[actor.index()] = 0;
        state.waiting_since[actor.index()] = None;
    }

    /// Current priority of `actor`.
    pub fn priority(&self, actor: ActorId) -> u64 {
        self.state.lock().priorities[actor.index()]
    }

    /// Highest priority any actor reached during the run.
    pub fn max_priority(&self) -> u64 {
        self.state.lock().max_priority
    }

    /// Number of permits granted so far.
    pub fn grants_issued(&self) -> u64 {
        self.state.lock().next_ticket
    }

    /// Ages waiters every period until `stop` is observed.
    pub async fn run_ticker(&self, stop: StopSignal) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately.
        interval.tick().await;

        loop {
            interval.tick().await;
            if stop.is_triggered() {
                break;
            }
            self.age();
        }

        tracing::debug!(
            "Aging ticker stopped, max priority observed {}",
            self.max_priority()
        );
    }
}

#[async_trait]
impl Arbiter for AgingArbiter {
    async fn request(&self, actor: &ActorContext) -> Result<Option<Permit>, ArbitrationError> {
        self.register(actor.id());

        loop {
            if actor.is_stopped() {
                self.withdraw(actor.id());
                return Ok(None);
            }

            match self.try_admit(actor.id()) {
                Ok(permit) => {
                    actor.emit(EventKind::Granted {
                        ticket: permit.ticket,
                    });
                    return Ok(Some(permit));
                }
                Err(error) if error.is_recoverable() => {}
                Err(error) => return Err(error),
            }

            actor.stats().record_denial();
            actor.emit(EventKind::Denied);
            tokio::time::sleep(self.poll).await;
        }
    }

    fn release(&self, permit: Permit) -> Result<(), ArbitrationError> {
        let mut state = self.state.lock();
        let index = permit.actor.index();
        if state.waiting_since[index].take().is_none() {
            return Err(ArbitrationError::InvariantViolation {
                actor: permit.actor,
                detail: format!("released aging ticket {} while not waiting", permit.ticket),
            });
        }
        state.priorities[index] = 0;
        Ok(())
    }
}
