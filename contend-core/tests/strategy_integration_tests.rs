//! Integration tests for the arbitration engine.
//!
//! Every run goes through the public `SimulationController` API on tokio's
//! paused clock, so timing is deterministic and multi-second runs finish
//! instantly.

use std::sync::Arc;
use std::time::Duration;

use contend_core::invariants::{
    AgingBoundInvariant, AllJoinedInvariant, FairnessInvariant, Invariant,
    MutualExclusionInvariant, NoLeakInvariant, ProgressInvariant,
};
use contend_core::{
    ContendConfig, RecordingSink, RunReport, SimulationController, StrategyKind,
    check_adjacency_exclusion, check_event_exclusion,
};

/// Test fixture that runs one strategy and keeps the recorded event stream.
struct RunFixture {
    controller: SimulationController,
    sink: Arc<RecordingSink>,
}

impl RunFixture {
    /// Creates a fixture on the strategy's default topology.
    fn new(kind: StrategyKind) -> Self {
        let (actors, resources) = kind.default_topology();
        Self::with_topology(kind, actors, resources, ContendConfig::for_testing())
    }

    fn with_topology(
        kind: StrategyKind,
        actors: usize,
        resources: usize,
        config: ContendConfig,
    ) -> Self {
        let sink = Arc::new(RecordingSink::new());
        let controller = SimulationController::configure(actors, resources, kind)
            .unwrap()
            .with_config(config)
            .unwrap()
            .with_event_sink(sink.clone());

        Self { controller, sink }
    }

    async fn run_for(&mut self, duration: Duration) -> RunReport {
        self.controller.run_for(duration).await.unwrap()
    }
}

#[tokio::test(start_paused = true)]
async fn test_mutual_exclusion_holds_for_every_strategy() {
    for kind in StrategyKind::ALL {
        let mut fixture = RunFixture::new(kind);
        let report = fixture.run_for(Duration::from_secs(3)).await;

        let violations = check_event_exclusion(&fixture.sink.events());
        assert!(violations.is_empty(), "{kind}: {violations:?}");
        assert!(
            MutualExclusionInvariant.check(&report).is_ok(),
            "{kind}: ownership violations recorded"
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_nothing_held_after_clean_join() {
    for kind in StrategyKind::ALL {
        if kind == StrategyKind::Naive {
            continue;
        }
        let mut fixture = RunFixture::new(kind);
        let report = fixture.run_for(Duration::from_secs(2)).await;

        assert!(report.all_joined(), "{kind} left actors behind");
        assert!(report.leaked.is_empty(), "{kind}: {:?}", report.leaked);
        assert!(NoLeakInvariant.check(&report).is_ok());
    }
}

#[tokio::test(start_paused = true)]
async fn test_naive_ring_deadlocks_where_ordering_progresses() {
    let mut naive = RunFixture::new(StrategyKind::Naive);
    let naive_report = naive.run_for(Duration::from_secs(5)).await;

    let mut ordered = RunFixture::new(StrategyKind::Ordered);
    let ordered_report = ordered.run_for(Duration::from_secs(5)).await;

    assert!(naive_report.total_completions() < ordered_report.total_completions());
    assert!(naive_report.has_liveness_anomaly());
    assert!(!naive_report.timed_out().is_empty());
    assert!(AllJoinedInvariant.check(&naive_report).is_err());
    assert!(naive_report.summary().contains("did not stop in time"));

    assert!(!ordered_report.has_liveness_anomaly());
}

#[tokio::test(start_paused = true)]
async fn test_avoidance_strategies_progress_and_join() {
    let invariants: Vec<Box<dyn Invariant>> = vec![
        Box::new(MutualExclusionInvariant),
        Box::new(NoLeakInvariant),
        Box::new(AllJoinedInvariant),
        Box::new(ProgressInvariant::new(1)),
    ];

    for kind in [
        StrategyKind::Ordered,
        StrategyKind::TimeoutRetry,
        StrategyKind::Asymmetric,
        StrategyKind::WaiterMediated,
    ] {
        let mut fixture = RunFixture::new(kind);
        let report = fixture.run_for(Duration::from_secs(5)).await;

        let violations = report.check(&invariants);
        assert!(violations.is_empty(), "{kind}: {violations:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_waiter_reports_grants() {
    let mut fixture = RunFixture::new(StrategyKind::WaiterMediated);
    let report = fixture.run_for(Duration::from_secs(3)).await;

    let grants = report.strategy_metrics.grants_issued.unwrap();
    assert!(grants >= report.total_completions());
}

#[tokio::test(start_paused = true)]
async fn test_waiter_never_lets_neighbors_eat_together() {
    let mut fixture = RunFixture::new(StrategyKind::WaiterMediated);
    let topology = fixture.controller.topology();
    let report = fixture.run_for(Duration::from_secs(5)).await;

    assert!(report.total_completions() > 0);
    let violations = check_adjacency_exclusion(&fixture.sink.events(), &topology);
    assert!(violations.is_empty(), "{violations:?}");
}

#[tokio::test(start_paused = true)]
async fn test_greedy_actors_starve_patient_ones() {
    let config = ContendConfig::for_testing();
    let greedy = config.strategy.greedy_actors;

    let mut fixture = RunFixture::with_topology(StrategyKind::Starvation, 5, 1, config);
    let report = fixture.run_for(Duration::from_secs(10)).await;

    let completions = &report.statistics.completions;
    assert!(completions[..greedy].iter().all(|count| *count > 0));
    assert!(completions[greedy..].iter().all(|count| *count == 0));
    assert_eq!(report.statistics.starved_actors(), 5 - greedy);
    assert!(report.statistics.timeouts > 0);
    assert!(report.statistics.max_completion_gap() >= 10);
    assert!(FairnessInvariant::new(1).check(&report).is_err());
    assert!(report.all_joined());
}

#[tokio::test(start_paused = true)]
async fn test_fair_queue_keeps_completions_level() {
    let mut fixture = RunFixture::new(StrategyKind::FairQueue);
    let report = fixture.run_for(Duration::from_secs(10)).await;

    assert!(report.total_completions() >= 5);
    assert!(FairnessInvariant::new(1).check(&report).is_ok());
    assert_eq!(report.statistics.starved_actors(), 0);
    assert!(report.services_joined);
}

#[tokio::test(start_paused = true)]
async fn test_aging_bounds_longest_wait() {
    let config = ContendConfig::for_testing();
    let period = config.strategy.aging_period;
    let increment = config.strategy.aging_increment;

    let mut fixture = RunFixture::with_topology(StrategyKind::Aging, 5, 1, config);
    let report = fixture.run_for(Duration::from_secs(10)).await;

    assert!(report.strategy_metrics.max_priority_observed.is_some());
    let bound = AgingBoundInvariant::new(increment, period, period + Duration::from_millis(100));
    assert!(
        bound.check(&report).is_ok(),
        "{:?}",
        report.statistics.max_wait
    );
    assert_eq!(report.statistics.starved_actors(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_random_backoff_escapes_livelock_across_seeds() {
    for seed in [1, 7, 42, 1234, 0xdead_beef] {
        let mut config = ContendConfig::for_testing();
        config.strategy.seed = seed;

        let mut fixture = RunFixture::with_topology(StrategyKind::RandomBackoff, 2, 2, config);
        let report = fixture.run_for(Duration::from_secs(3)).await;

        assert!(report.total_completions() > 0, "seed {seed} livelocked");
        assert!(report.all_joined());
    }
}

#[tokio::test(start_paused = true)]
async fn test_polite_pair_livelocks() {
    let mut fixture = RunFixture::new(StrategyKind::Polite);
    let report = fixture.run_for(Duration::from_secs(2)).await;

    assert_eq!(report.total_completions(), 0);
    assert!(report.all_joined());
    assert!(report.statistics.timeouts > 0);
    assert!(report.has_liveness_anomaly());
}

#[tokio::test(start_paused = true)]
async fn test_priority_bias_lets_designated_actor_work() {
    let mut fixture = RunFixture::new(StrategyKind::PriorityBiased);
    let report = fixture.run_for(Duration::from_secs(3)).await;

    assert!(report.statistics.completions[0] > 0);
    assert!(report.all_joined());
}

#[tokio::test(start_paused = true)]
async fn test_single_actor_single_resource() {
    for kind in StrategyKind::ALL {
        let mut fixture = RunFixture::with_topology(kind, 1, 1, ContendConfig::for_testing());
        let report = fixture.run_for(Duration::from_secs(2)).await;

        assert!(report.total_completions() > 0, "{kind} made no progress");
        assert!(report.all_joined(), "{kind} did not join");
    }
}

#[tokio::test(start_paused = true)]
async fn test_shared_single_resource_serializes_everyone() {
    for kind in [
        StrategyKind::Naive,
        StrategyKind::Ordered,
        StrategyKind::TimeoutRetry,
        StrategyKind::FairQueue,
        StrategyKind::Aging,
    ] {
        let mut fixture = RunFixture::with_topology(kind, 5, 1, ContendConfig::for_testing());
        let report = fixture.run_for(Duration::from_secs(3)).await;

        assert!(report.total_completions() > 0, "{kind} made no progress");
        assert!(report.all_joined(), "{kind} did not join");
        assert!(check_event_exclusion(&fixture.sink.events()).is_empty());
    }
}

#[tokio::test(start_paused = true)]
async fn test_zero_acquire_timeout_does_not_hang() {
    let mut config = ContendConfig::for_testing();
    config.strategy.acquire_timeout = Duration::ZERO;

    let mut fixture = RunFixture::with_topology(StrategyKind::TimeoutRetry, 5, 5, config);
    let report = fixture.run_for(Duration::from_secs(3)).await;

    assert!(report.total_completions() > 0);
    assert!(report.all_joined());
}

#[tokio::test(start_paused = true)]
async fn test_each_run_starts_from_fresh_state() {
    let mut fixture = RunFixture::new(StrategyKind::Ordered);

    let first = fixture.run_for(Duration::from_secs(3)).await;
    let second = fixture.run_for(Duration::from_secs(3)).await;

    assert!(first.total_completions() > 0);
    let (first_total, second_total) = (first.total_completions(), second.total_completions());
    assert!(second_total.abs_diff(first_total) <= 2);
    assert!(second.leaked.is_empty());
    assert!(second.started_at >= first.started_at);
}
