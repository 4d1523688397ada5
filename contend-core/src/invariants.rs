//! Invariant checking framework for run validation.
//!
//! Invariants are checked after a run against its [`RunReport`], except
//! mutual exclusion, which needs the full event stream and is checked by
//! [`check_event_exclusion`] and [`check_adjacency_exclusion`].

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::time::Duration;

use crate::events::{ActorState, ArbitrationEvent, EventKind};
use crate::report::{JoinOutcome, RunReport};
use crate::topology::{ActorId, ResourceId, Topology};

/// Violation of a run invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantViolation {
    /// Name of the violated invariant
    pub invariant: String,
    /// Detailed description of the violation
    pub description: String,
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invariant '{}' violated: {}",
            self.invariant, self.description
        )
    }
}

/// Trait for checking run invariants.
pub trait Invariant: Send + Sync {
    /// Checks if invariant holds for a finished run.
    ///
    /// # Errors
    /// Returns `InvariantViolation` if the invariant condition is not met.
    fn check(&self, report: &RunReport) -> Result<(), InvariantViolation>;

    /// Returns name of this invariant.
    fn name(&self) -> &str;

    fn violation(&self, description: String) -> InvariantViolation {
        InvariantViolation {
            invariant: self.name().to_string(),
            description,
        }
    }
}

/// No resource ever had two holders and no foreign release happened.
pub struct MutualExclusionInvariant;

impl Invariant for MutualExclusionInvariant {
    fn check(&self, report: &RunReport) -> Result<(), InvariantViolation> {
        if report.statistics.violations > 0 {
            return Err(self.violation(format!(
                "{} ownership violations recorded",
                report.statistics.violations
            )));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "MutualExclusion"
    }
}

/// Nothing is held once every actor has joined.
///
/// Aborted actors legitimately leave resources behind; the check only
/// applies when all actors exited on their own.
pub struct NoLeakInvariant;

impl Invariant for NoLeakInvariant {
    fn check(&self, report: &RunReport) -> Result<(), InvariantViolation> {
        if report.all_joined() && !report.leaked.is_empty() {
            let leaked: Vec<String> = report
                .leaked
                .iter()
                .map(|leak| format!("{} by {}", leak.resource, leak.holder))
                .collect();
            return Err(self.violation(format!("still held: {}", leaked.join(", "))));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "NoLeak"
    }
}

/// Every actor joined within the timeout.
pub struct AllJoinedInvariant;

impl Invariant for AllJoinedInvariant {
    fn check(&self, report: &RunReport) -> Result<(), InvariantViolation> {
        let stuck: Vec<String> = report
            .joins
            .iter()
            .filter(|join| join.outcome != JoinOutcome::Joined)
            .map(|join| format!("{} ({:?})", join.actor, join.outcome))
            .collect();
        if !stuck.is_empty() {
            return Err(self.violation(format!(
                "{} of {} actors did not join: {}",
                stuck.len(),
                report.joins.len(),
                stuck.join(", ")
            )));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "AllJoined"
    }
}

/// At least `min_completions` work cycles finished.
pub struct ProgressInvariant {
    min_completions: u64,
}

impl ProgressInvariant {
    pub fn new(min_completions: u64) -> Self {
        Self { min_completions }
    }
}

impl Invariant for ProgressInvariant {
    fn check(&self, report: &RunReport) -> Result<(), InvariantViolation> {
        if report.total_completions() < self.min_completions {
            return Err(self.violation(format!(
                "{} completions, at least {} required",
                report.total_completions(),
                self.min_completions
            )));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "Progress"
    }
}

/// Completion counts of any two actors differ by at most `max_gap`.
pub struct FairnessInvariant {
    max_gap: u64,
}

impl FairnessInvariant {
    pub fn new(max_gap: u64) -> Self {
        Self { max_gap }
    }
}

impl Invariant for FairnessInvariant {
    fn check(&self, report: &RunReport) -> Result<(), InvariantViolation> {
        let gap = report.statistics.max_completion_gap();
        if gap > self.max_gap {
            return Err(self.violation(format!(
                "completion gap {gap} exceeds {} ({:?})",
                self.max_gap, report.statistics.completions
            )));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "Fairness"
    }
}

/// Longest wait is bounded by the aging schedule:
/// `(max_priority / increment) * period + epsilon`.
pub struct AgingBoundInvariant {
    increment: u64,
    period: Duration,
    epsilon: Duration,
}

impl AgingBoundInvariant {
    pub fn new(increment: u64, period: Duration, epsilon: Duration) -> Self {
        Self {
            increment,
            period,
            epsilon,
        }
    }

    /// Bound implied by the highest priority reached.
    pub fn bound(&self, max_priority: u64) -> Duration {
        let ticks = max_priority / self.increment.max(1);
        self.period * u32::try_from(ticks).unwrap_or(u32::MAX) + self.epsilon
    }
}

impl Invariant for AgingBoundInvariant {
    fn check(&self, report: &RunReport) -> Result<(), InvariantViolation> {
        let Some(max_priority) = report.strategy_metrics.max_priority_observed else {
            return Err(self.violation("run did not report aging priorities".to_string()));
        };

        let bound = self.bound(max_priority);
        let max_wait = report.statistics.max_wait();
        if max_wait > bound {
            return Err(self.violation(format!(
                "max wait {max_wait:?} exceeds {bound:?} for max priority {max_priority}"
            )));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "AgingBound"
    }
}

/// Replays an event stream and reports every point where a resource would
/// have had two holders or was released by someone else.
pub fn check_event_exclusion(events: &[ArbitrationEvent]) -> Vec<InvariantViolation> {
    let mut holders: HashMap<ResourceId, ActorId> = HashMap::new();
    let mut violations = Vec::new();
    let mut violation = |description: String| {
        violations.push(InvariantViolation {
            invariant: "MutualExclusion".to_string(),
            description,
        });
    };

    for event in events {
        match event.kind {
            EventKind::Acquired { resource } => {
                if let Some(holder) = holders.insert(resource, event.actor) {
                    violation(format!(
                        "{} acquired {resource} at {:?} while {holder} held it",
                        event.actor, event.elapsed
                    ));
                }
            }
            EventKind::Released { resource } => match holders.remove(&resource) {
                Some(holder) if holder == event.actor => {}
                Some(holder) => {
                    violation(format!(
                        "{} released {resource} at {:?} held by {holder}",
                        event.actor, event.elapsed
                    ));
                    holders.insert(resource, holder);
                }
                None => violation(format!(
                    "{} released unheld {resource} at {:?}",
                    event.actor, event.elapsed
                )),
            },
            _ => {}
        }
    }

    violations
}

/// Replays an event stream and reports every point where an actor started
/// eating while a conflicting actor was still eating.
pub fn check_adjacency_exclusion(
    events: &[ArbitrationEvent],
    topology: &Topology,
) -> Vec<InvariantViolation> {
    let mut eating: BTreeSet<ActorId> = BTreeSet::new();
    let mut violations = Vec::new();

    for event in events {
        let EventKind::StateChanged { from, to } = event.kind else {
            continue;
        };

        if to == ActorState::Eating {
            if let Some(neighbor) = eating
                .iter()
                .find(|other| topology.conflicts(event.actor, **other))
            {
                violations.push(InvariantViolation {
                    invariant: "AdjacencyExclusion".to_string(),
                    description: format!(
                        "{} started eating at {:?} while neighbor {neighbor} was eating",
                        event.actor, event.elapsed
                    ),
                });
            }
            eating.insert(event.actor);
        } else if from == ActorState::Eating {
            eating.remove(&event.actor);
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(actor: usize, kind: EventKind) -> ArbitrationEvent {
        ArbitrationEvent {
            actor: ActorId::new(actor),
            elapsed: Duration::ZERO,
            kind,
        }
    }

    #[test]
    fn test_clean_handover_passes() {
        let resource = ResourceId::new(0);
        let events = vec![
            event(0, EventKind::Acquired { resource }),
            event(0, EventKind::Released { resource }),
            event(1, EventKind::Acquired { resource }),
            event(1, EventKind::Released { resource }),
        ];

        assert!(check_event_exclusion(&events).is_empty());
    }

    #[test]
    fn test_double_holder_detected() {
        let resource = ResourceId::new(2);
        let events = vec![
            event(0, EventKind::Acquired { resource }),
            event(1, EventKind::Acquired { resource }),
        ];

        let violations = check_event_exclusion(&events);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].description.contains("while A0 held it"));
    }

    #[test]
    fn test_foreign_release_detected() {
        let resource = ResourceId::new(0);
        let events = vec![
            event(0, EventKind::Acquired { resource }),
            event(1, EventKind::Released { resource }),
            event(0, EventKind::Released { resource }),
        ];

        let violations = check_event_exclusion(&events);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].invariant, "MutualExclusion");
    }

    fn eat(actor: usize) -> ArbitrationEvent {
        event(
            actor,
            EventKind::StateChanged {
                from: ActorState::RequestingSecond,
                to: ActorState::Eating,
            },
        )
    }

    fn finish(actor: usize) -> ArbitrationEvent {
        event(
            actor,
            EventKind::StateChanged {
                from: ActorState::Eating,
                to: ActorState::Releasing,
            },
        )
    }

    #[test]
    fn test_non_adjacent_actors_may_eat_together() {
        let topology = Topology::new(5, 5).unwrap();
        let events = vec![eat(0), eat(2), finish(0), eat(4), finish(2), finish(4)];

        assert!(check_adjacency_exclusion(&events, &topology).is_empty());
    }

    #[test]
    fn test_neighbors_eating_together_detected() {
        let topology = Topology::new(5, 5).unwrap();
        let events = vec![eat(0), eat(4), finish(4), finish(0)];

        let violations = check_adjacency_exclusion(&events, &topology);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].invariant, "AdjacencyExclusion");
        assert!(violations[0].description.contains("neighbor A0"));
    }

    #[test]
    fn test_aging_bound_formula() {
        let invariant = AgingBoundInvariant::new(
            2,
            Duration::from_millis(500),
            Duration::from_millis(600),
        );

        assert_eq!(invariant.bound(6), Duration::from_millis(2100));
        assert_eq!(invariant.bound(0), Duration::from_millis(600));
    }
}
