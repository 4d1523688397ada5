//! Contend Core - Resource arbitration engine
//!
//! A fixed population of actors competes for shared exclusive resources under a
//! pluggable acquisition strategy. Running the same topology under different
//! strategies reproduces deadlock, livelock and starvation, and shows how each
//! remedy restores progress or fairness.

pub mod actor;
pub mod arbiter;
pub mod config;
pub mod controller;
pub mod events;
pub mod invariants;
pub mod report;
pub mod resource;
pub mod rng;
pub mod stats;
pub mod strategy;
pub mod topology;
pub mod tracing_setup;
pub mod worker_pool;

// Re-export main types for convenient access
pub use actor::{ActorContext, StopSignal};
pub use config::{ActorTiming, BackoffRange, ContendConfig, ControllerConfig, StrategyConfig};
pub use controller::SimulationController;
pub use events::{
    ActorState, ArbitrationEvent, ChannelSink, EventKind, EventSink, RecordingSink, TracingSink,
};
pub use invariants::{
    Invariant, InvariantViolation, check_adjacency_exclusion, check_event_exclusion,
};
pub use report::{ActorJoin, JoinOutcome, LeakedResource, RunReport};
pub use resource::{ArbitrationError, Resource, ResourceTable};
pub use stats::{RunStatistics, StatisticsSnapshot};
pub use strategy::{AcquireOutcome, AcquiredSet, AcquisitionStrategy, StrategyKind, StrategyMetrics};
pub use topology::{ActorId, ResourceId, Topology};
pub use worker_pool::{DispatchOrder, PoolError, TaskHandle, WorkerPool};

/// Errors that can bubble up from configuring or driving a simulation.
///
/// Liveness anomalies (actors that never join) are not errors; they are
/// reported through [`RunReport`].
#[derive(Debug, thiserror::Error)]
pub enum ContendError {
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("Unknown strategy '{name}'; see `contend list`")]
    UnknownStrategy { name: String },

    #[error("Arbitration error: {0}")]
    Arbitration(#[from] ArbitrationError),

    #[error("Simulation has not been started")]
    NotStarted,

    #[error("Simulation is already running")]
    AlreadyRunning,
}

impl ContendError {
    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            ContendError::Configuration { .. } | ContendError::UnknownStrategy { .. }
        )
    }
}

pub type Result<T, E = ContendError> = std::result::Result<T, E>;
