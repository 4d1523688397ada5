//! End-of-run report produced by `stop_and_join`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::invariants::{Invariant, InvariantViolation};
use crate::stats::StatisticsSnapshot;
use crate::strategy::{StrategyKind, StrategyMetrics};
use crate::topology::{ActorId, ResourceId};

/// How an actor's task ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum JoinOutcome {
    /// Observed stop and exited on its own.
    Joined,
    /// Exited with a fatal arbitration error.
    Failed(String),
    /// Did not exit within the join timeout and was aborted.
    TimedOut,
}

/// Join result of one actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActorJoin {
    pub actor: ActorId,
    #[serde(flatten)]
    pub outcome: JoinOutcome,
}

/// Resource still held after every actor was joined or aborted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeakedResource {
    pub resource: ResourceId,
    pub holder: ActorId,
}

/// Snapshot of one completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub strategy: StrategyKind,
    pub actor_count: usize,
    pub resource_count: usize,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub statistics: StatisticsSnapshot,
    pub joins: Vec<ActorJoin>,
    pub services_joined: bool,
    pub leaked: Vec<LeakedResource>,
    pub strategy_metrics: StrategyMetrics,
}

impl RunReport {
    /// Checks whether every actor exited on its own.
    pub fn all_joined(&self) -> bool {
        self.joins
            .iter()
            .all(|join| join.outcome == JoinOutcome::Joined)
    }

    /// Actors that had to be aborted.
    pub fn timed_out(&self) -> Vec<ActorId> {
        self.joins
            .iter()
            .filter(|join| join.outcome == JoinOutcome::TimedOut)
            .map(|join| join.actor)
            .collect()
    }

    pub fn total_completions(&self) -> u64 {
        self.statistics.total_completions
    }

    /// True when actors hung, failed, or nobody ever worked.
    pub fn has_liveness_anomaly(&self) -> bool {
        !self.all_joined() || self.total_completions() == 0
    }

    /// Runs every invariant against this report, collecting violations.
    pub fn check(&self, invariants: &[Box<dyn Invariant>]) -> Vec<InvariantViolation> {
        invariants
            .iter()
            .filter_map(|invariant| invariant.check(self).err())
            .collect()
    }

    /// Generates human-readable summary.
    pub fn summary(&self) -> String {
        let mut summary = String::new();
        summary.push_str(&format!(
            "Run Report ({}, {} actors x {} resources)\n",
            self.strategy, self.actor_count, self.resource_count
        ));
        summary.push_str(&format!("Started: {}\n", self.started_at.to_rfc3339()));
        summary.push_str(&format!("Elapsed: {:?}\n", self.elapsed));
        let total = self.statistics.total_completions;
        summary.push_str(&format!("Completions: {total} total\n"));

        for (index, count) in self.statistics.completions.iter().enumerate() {
            let max_wait = self
                .statistics
                .max_wait
                .get(index)
                .copied()
                .unwrap_or_default();
            summary.push_str(&format!(
                "  {}: {count} completions, max wait {max_wait:?}\n",
                ActorId::new(index)
            ));
        }

        summary.push_str(&format!(
            "Timeouts: {}  Denials: {}  Backoffs: {}  Violations: {}\n",
            self.statistics.timeouts,
            self.statistics.denials,
            self.statistics.backoffs,
            self.statistics.violations
        ));
        summary.push_str(&format!("Mean wait: {:?}\n", self.statistics.mean_wait));

        if let Some(priority) = self.strategy_metrics.max_priority_observed {
            summary.push_str(&format!("Max aging priority: {priority}\n"));
        }
        if let Some(grants) = self.strategy_metrics.grants_issued {
            summary.push_str(&format!("Arbiter grants: {grants}\n"));
        }

        let anomalies: Vec<&ActorJoin> = self
            .joins
            .iter()
            .filter(|join| join.outcome != JoinOutcome::Joined)
            .collect();
        if !anomalies.is_empty() {
            summary.push_str("\nLiveness anomalies:\n");
            for join in anomalies {
                match &join.outcome {
                    JoinOutcome::TimedOut => {
                        summary.push_str(&format!("  - {} did not stop in time\n", join.actor));
                    }
                    JoinOutcome::Failed(reason) => {
                        summary.push_str(&format!("  - {} failed: {reason}\n", join.actor));
                    }
                    JoinOutcome::Joined => {}
                }
            }
        }

        if !self.leaked.is_empty() {
            summary.push_str("\nStill held at teardown:\n");
            for leak in &self.leaked {
                summary.push_str(&format!("  - {} held by {}\n", leak.resource, leak.holder));
            }
        }

        summary
    }
}
