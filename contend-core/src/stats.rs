//! Run-scoped counters shared by every actor of one run.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::topology::ActorId;

/// Lock-free statistics updated by actors while the run is active.
#[derive(Debug)]
pub struct RunStatistics {
    completions: Vec<AtomicU64>,
    max_wait_nanos: Vec<AtomicU64>,
    total_wait_nanos: AtomicU64,
    waits: AtomicU64,
    timeouts: AtomicU64,
    denials: AtomicU64,
    backoffs: AtomicU64,
    violations: AtomicU64,
}

impl RunStatistics {
    /// Creates zeroed statistics for `actor_count` actors.
    pub fn new(actor_count: usize) -> Self {
        Self {
            completions: (0..actor_count).map(|_| AtomicU64::new(0)).collect(),
            max_wait_nanos: (0..actor_count).map(|_| AtomicU64::new(0)).collect(),
            total_wait_nanos: AtomicU64::new(0),
            waits: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            denials: AtomicU64::new(0),
            backoffs: AtomicU64::new(0),
            violations: AtomicU64::new(0),
        }
    }

    /// Counts one finished work cycle.
    pub fn record_completion(&self, actor: ActorId) {
        if let Some(counter) = self.completions.get(actor.index()) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records the time from entering requesting to holding the full set.
    pub fn record_wait(&self, actor: ActorId, waited: Duration) {
        let nanos = u64::try_from(waited.as_nanos()).unwrap_or(u64::MAX);
        self.total_wait_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.waits.fetch_add(1, Ordering::Relaxed);
        if let Some(max) = self.max_wait_nanos.get(actor.index()) {
            max.fetch_max(nanos, Ordering::Relaxed);
        }
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_denial(&self) {
        self.denials.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_backoff(&self) {
        self.backoffs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_violation(&self) {
        self.violations.fetch_add(1, Ordering::Relaxed);
    }

    /// Completions of one actor so far.
    pub fn completions(&self, actor: ActorId) -> u64 {
        self.completions
            .get(actor.index())
            .map_or(0, |counter| counter.load(Ordering::Relaxed))
    }

    /// Sum of completions across actors.
    pub fn total_completions(&self) -> u64 {
        self.completions
            .iter()
            .map(|counter| counter.load(Ordering::Relaxed))
            .sum()
    }

    /// Copies every counter into a serializable snapshot.
    pub fn snapshot(&self) -> StatisticsSnapshot {
        let completions: Vec<u64> = self
            .completions
            .iter()
            .map(|counter| counter.load(Ordering::Relaxed))
            .collect();
        let max_wait: Vec<Duration> = self
            .max_wait_nanos
            .iter()
            .map(|nanos| Duration::from_nanos(nanos.load(Ordering::Relaxed)))
            .collect();
        let total_wait = Duration::from_nanos(self.total_wait_nanos.load(Ordering::Relaxed));
        let waits = self.waits.load(Ordering::Relaxed);

        StatisticsSnapshot {
            total_completions: completions.iter().sum(),
            completions,
            timeouts: self.timeouts.load(Ordering::Relaxed),
            denials: self.denials.load(Ordering::Relaxed),
            backoffs: self.backoffs.load(Ordering::Relaxed),
            violations: self.violations.load(Ordering::Relaxed),
            mean_wait: if waits == 0 {
                Duration::ZERO
            } else {
                total_wait / waits as u32
            },
            total_wait,
            max_wait,
        }
    }
}

/// Point-in-time copy of [`RunStatistics`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatisticsSnapshot {
    /// Completed cycles, indexed by actor.
    pub completions: Vec<u64>,
    pub total_completions: u64,
    pub timeouts: u64,
    pub denials: u64,
    pub backoffs: u64,
    pub violations: u64,
    pub total_wait: Duration,
    pub mean_wait: Duration,
    /// Longest single wait, indexed by actor.
    pub max_wait: Vec<Duration>,
}

impl StatisticsSnapshot {
    /// Difference between the most and least productive actor.
    pub fn max_completion_gap(&self) -> u64 {
        let most = self.completions.iter().copied().max().unwrap_or(0);
        let least = self.completions.iter().copied().min().unwrap_or(0);
        most - least
    }

    /// Longest wait any actor experienced.
    pub fn max_wait(&self) -> Duration {
        self.max_wait.iter().copied().max().unwrap_or_default()
    }

    /// Number of actors that never completed a cycle.
    pub fn starved_actors(&self) -> usize {
        self.completions.iter().filter(|count| **count == 0).count()
    }
}
