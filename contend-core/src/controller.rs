//! Simulation controller: wires actors to a fresh resource table and
//! strategy, runs them, and joins them into a [`RunReport`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::actor::{ActorContext, StopSignal, run_actor};
use crate::config::ContendConfig;
use crate::events::{EventEmitter, EventSink, TracingSink};
use crate::report::{ActorJoin, JoinOutcome, LeakedResource, RunReport};
use crate::resource::{ArbitrationError, ResourceTable};
use crate::stats::RunStatistics;
use crate::strategy::{AcquisitionStrategy, StrategyKind};
use crate::topology::{ActorId, Topology};
use crate::{ContendError, Result};

/// State owned by one active run. Dropping it stops and aborts every task.
struct ActiveRun {
    stop: StopSignal,
    resources: Arc<ResourceTable>,
    stats: Arc<RunStatistics>,
    strategy: Arc<dyn AcquisitionStrategy>,
    actors: Vec<(ActorId, JoinHandle<Result<(), ArbitrationError>>)>,
    services: Vec<JoinHandle<()>>,
    started_at: chrono::DateTime<Utc>,
    started: Instant,
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        self.stop.trigger();
        for (_, handle) in &self.actors {
            handle.abort();
        }
        for handle in &self.services {
            handle.abort();
        }
    }
}

/// Owns the topology, strategy choice and configuration for repeated runs.
///
/// Every `start` builds fresh resources, statistics and strategy state, so
/// runs never observe each other.
pub struct SimulationController {
    topology: Topology,
    kind: StrategyKind,
    config: ContendConfig,
    sink: Arc<dyn EventSink>,
    active: Option<ActiveRun>,
}

impl SimulationController {
    /// Creates a controller with default configuration.
    ///
    /// # Errors
    /// - `ContendError::Configuration` - Zero actors, zero resources, or
    ///   strategy parameters that do not fit the topology
    pub fn configure(
        actor_count: usize,
        resource_count: usize,
        kind: StrategyKind,
    ) -> Result<Self> {
        let topology = Topology::new(actor_count, resource_count)?;
        let config = ContendConfig::default();
        config.validate()?;
        kind.build(topology, &config.strategy)?;

        Ok(Self {
            topology,
            kind,
            config,
            sink: Arc::new(TracingSink),
            active: None,
        })
    }

    /// Replaces the configuration after validating it against the topology.
    ///
    /// # Errors
    /// - `ContendError::Configuration` - Invalid parameters
    pub fn with_config(mut self, config: ContendConfig) -> Result<Self> {
        config.validate()?;
        self.kind.build(self.topology, &config.strategy)?;
        self.config = config;
        Ok(self)
    }

    /// Routes the event stream of subsequent runs to `sink`.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    pub fn strategy_kind(&self) -> StrategyKind {
        self.kind
    }

    pub fn config(&self) -> &ContendConfig {
        &self.config
    }

    /// Checks whether a run is active.
    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    /// Spawns every actor plus the strategy's background services.
    ///
    /// # Errors
    /// - `ContendError::AlreadyRunning` - A run is active
    /// - `ContendError::Configuration` - Strategy could not be built
    pub fn start(&mut self) -> Result<()> {
        if self.active.is_some() {
            return Err(ContendError::AlreadyRunning);
        }

        let stop = StopSignal::new();
        let resources = Arc::new(ResourceTable::new(&self.topology));
        let stats = Arc::new(RunStatistics::new(self.topology.actor_count()));
        let strategy = self.kind.build(self.topology, &self.config.strategy)?;
        let emitter = EventEmitter::new(self.sink.clone());

        let services = strategy.spawn_services(stop.clone());
        let actors = self
            .topology
            .actors()
            .map(|id| {
                let actor = Arc::new(ActorContext::new(
                    id,
                    self.topology.needs(id),
                    resources.clone(),
                    stop.clone(),
                    stats.clone(),
                    emitter.clone(),
                    strategy.timing_for(id, &self.config.timing),
                ));
                (id, tokio::spawn(run_actor(actor, strategy.clone())))
            })
            .collect();

        tracing::info!(
            "Started {} run with {} ({} services)",
            self.kind,
            self.topology,
            services.len()
        );

        self.active = Some(ActiveRun {
            stop,
            resources,
            stats,
            strategy,
            actors,
            services,
            started_at: Utc::now(),
            started: Instant::now(),
        });
        Ok(())
    }

    /// Runs for `duration`, starting first if needed, then stops and joins
    /// with the configured join timeout.
    ///
    /// # Errors
    /// - `ContendError::Configuration` - Strategy could not be built
    pub async fn run_for(&mut self, duration: Duration) -> Result<RunReport> {
        if self.active.is_none() {
            self.start()?;
        }
        tokio::time::sleep(duration).await;

        let join_timeout = self.config.controller.join_timeout;
        self.stop_and_join(join_timeout).await
    }

    /// Signals stop and waits up to `join_timeout` for each task.
    ///
    /// Actors that do not exit in time are aborted and reported as
    /// [`JoinOutcome::TimedOut`].
    ///
    /// # Errors
    /// - `ContendError::NotStarted` - No run is active
    pub async fn stop_and_join(&mut self, join_timeout: Duration) -> Result<RunReport> {
        let mut run = self.active.take().ok_or(ContendError::NotStarted)?;
        run.stop.trigger();
        let elapsed = run.started.elapsed();

        let mut joins = Vec::with_capacity(run.actors.len());
        for (actor, handle) in &mut run.actors {
            let outcome = match tokio::time::timeout(join_timeout, &mut *handle).await {
                Ok(Ok(Ok(()))) => JoinOutcome::Joined,
                Ok(Ok(Err(error))) => JoinOutcome::Failed(error.to_string()),
                Ok(Err(join_error)) => JoinOutcome::Failed(join_error.to_string()),
                Err(_) => {
                    tracing::warn!("{} did not stop within {:?}, aborting", actor, join_timeout);
                    handle.abort();
                    let _ = (&mut *handle).await;
                    JoinOutcome::TimedOut
                }
            };
            joins.push(ActorJoin {
                actor: *actor,
                outcome,
            });
        }

        let mut services_joined = true;
        for handle in &mut run.services {
            let joined = tokio::time::timeout(join_timeout, &mut *handle).await;
            if joined.is_err() {
                tracing::warn!("Strategy service did not stop within {:?}", join_timeout);
                handle.abort();
                services_joined = false;
            }
        }

        let leaked: Vec<LeakedResource> = run
            .resources
            .held()
            .into_iter()
            .map(|(resource, holder)| LeakedResource { resource, holder })
            .collect();

        let report = RunReport {
            strategy: self.kind,
            actor_count: self.topology.actor_count(),
            resource_count: self.topology.resource_count(),
            started_at: run.started_at,
            elapsed,
            statistics: run.stats.snapshot(),
            joins,
            services_joined,
            leaked,
            strategy_metrics: run.strategy.metrics(),
        };

        tracing::info!(
            "Stopped {} run after {:?}: {} completions, {} actors aborted",
            self.kind,
            report.elapsed,
            report.total_completions(),
            report.timed_out().len()
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configure_rejects_empty_topology() {
        let error = SimulationController::configure(0, 5, StrategyKind::Naive)
            .err()
            .unwrap();
        assert!(error.is_user_error());
        assert!(SimulationController::configure(5, 0, StrategyKind::Ordered).is_err());
    }

    #[test]
    fn test_with_config_validates() {
        let controller =
            SimulationController::configure(2, 2, StrategyKind::PriorityBiased).unwrap();
        let mut config = ContendConfig::for_testing();
        config.strategy.yield_backoff = Duration::from_millis(10);

        assert!(controller.with_config(config).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_is_rejected() {
        let mut controller = SimulationController::configure(3, 3, StrategyKind::Ordered).unwrap();

        controller.start().unwrap();
        assert!(matches!(controller.start(), Err(ContendError::AlreadyRunning)));
        assert!(controller.is_running());

        controller
            .stop_and_join(Duration::from_secs(1))
            .await
            .unwrap();
        assert!(!controller.is_running());
    }

    #[tokio::test]
    async fn test_stop_without_start_is_rejected() {
        let mut controller = SimulationController::configure(3, 3, StrategyKind::Ordered).unwrap();
        let result = controller.stop_and_join(Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ContendError::NotStarted)));
    }
}
