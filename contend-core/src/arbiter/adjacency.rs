//! Waiter arbiter: admits an actor only while none of its neighbors works.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Arbiter, Permit};
use crate::actor::ActorContext;
use crate::events::EventKind;
use crate::resource::ArbitrationError;
use crate::topology::{ActorId, Topology};

#[derive(Debug, Default)]
struct AdjacencyState {
    eating: BTreeSet<ActorId>,
    next_ticket: u64,
}

/// Central waiter tracking which actors are currently admitted.
///
/// Admitted actors never share a resource, so they cannot wait on each
/// other and no circular wait forms.
#[derive(Debug)]
pub struct AdjacencyArbiter {
    topology: Topology,
    poll: Duration,
    state: Mutex<AdjacencyState>,
}

impl AdjacencyArbiter {
    /// Creates an arbiter that re-asks every `poll` after a denial.
    pub fn new(topology: Topology, poll: Duration) -> Self {
        Self {
            topology,
            poll,
            state: Mutex::new(AdjacencyState::default()),
        }
    }

    /// Admits `actor` if no neighbor is admitted.
    ///
    /// # Errors
    /// - `ArbitrationError::ArbiterDenied` - A neighbor is admitted
    /// - `ArbitrationError::InvariantViolation` - `actor` is already admitted
    pub fn try_admit(&self, actor: ActorId) -> Result<Permit, ArbitrationError> {
        let mut state = self.state.lock();
        if state.eating.contains(&actor) {
            return Err(ArbitrationError::InvariantViolation {
                actor,
                detail: "asked the waiter twice without releasing".to_string(),
            });
        }

        let blocked = state
            .eating
            .iter()
            .any(|other| self.topology.conflicts(actor, *other));
        if blocked {
            return Err(ArbitrationError::ArbiterDenied { actor });
        }

        state.eating.insert(actor);
        state.next_ticket += 1;
        Ok(Permit {
            actor,
            ticket: state.next_ticket,
        })
    }

    /// Actors currently admitted.
    pub fn admitted(&self) -> Vec<ActorId> {
        self.state.lock().eating.iter().copied().collect()
    }

    /// Number of permits granted so far.
    pub fn grants_issued(&self) -> u64 {
        self.state.lock().next_ticket
    }
}

#[async_trait]
impl Arbiter for AdjacencyArbiter {
    async fn request(&self, actor: &ActorContext) -> Result<Option<Permit>, ArbitrationError> {
        loop {
            if actor.is_stopped() {
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
        if self.state.lock().eating.remove(&permit.actor) {
            Ok(())
        } else {
            Err(ArbitrationError::InvariantViolation {
                actor: permit.actor,
                detail: format!("released permit {} it does not hold", permit.ticket),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arbiter() -> AdjacencyArbiter {
        AdjacencyArbiter::new(Topology::new(5, 5).unwrap(), Duration::from_millis(100))
    }

    #[test]
    fn test_neighbors_are_denied() {
        let arbiter = arbiter();

        let permit = arbiter.try_admit(ActorId::new(0)).unwrap();
        assert_eq!(
            arbiter.try_admit(ActorId::new(1)),
            Err(ArbitrationError::ArbiterDenied {
                actor: ActorId::new(1)
            })
        );
        assert!(arbiter.try_admit(ActorId::new(4)).is_err());
        assert!(arbiter.try_admit(ActorId::new(2)).is_ok());

        arbiter.release(permit).unwrap();
        assert!(arbiter.try_admit(ActorId::new(1)).is_err());
        assert_eq!(arbiter.admitted(), vec![ActorId::new(2)]);
    }

    #[test]
    fn test_at_most_two_of_five_admitted() {
        let arbiter = arbiter();
        let admitted = (0..5)
            .filter(|index| arbiter.try_admit(ActorId::new(*index)).is_ok())
            .count();

        assert_eq!(admitted, 2);
        assert_eq!(arbiter.grants_issued(), 2);
    }

    #[test]
    fn test_double_release_is_violation() {
        let arbiter = arbiter();
        let permit = arbiter.try_admit(ActorId::new(3)).unwrap();

        arbiter.release(permit).unwrap();
        assert!(arbiter.release(permit).is_err());
    }

    #[test]
    fn test_second_admission_without_release_is_violation() {
        let arbiter = arbiter();
        arbiter.try_admit(ActorId::new(3)).unwrap();

        let error = arbiter.try_admit(ActorId::new(3)).unwrap_err();
        assert!(!error.is_recoverable());
        assert_eq!(arbiter.admitted(), vec![ActorId::new(3)]);
    }
}
