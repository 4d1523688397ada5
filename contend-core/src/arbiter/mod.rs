//! Shared coordination authorities consulted before touching resources.
//!
//! An arbiter decides *whether* an actor may try to take its resources now.
//! All of an arbiter's bookkeeping is mutated in one critical section that is
//! never held across an await.

use async_trait::async_trait;
use serde::Serialize;

use crate::actor::ActorContext;
use crate::resource::ArbitrationError;
use crate::topology::ActorId;

pub mod adjacency;
pub mod aging;
pub mod fifo;

pub use adjacency::AdjacencyArbiter;
pub use aging::AgingArbiter;
pub use fifo::{FairQueueHandle, FairQueueService};

/// Proof that an arbiter admitted an actor. Returned on release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Permit {
    pub actor: ActorId,
    /// Monotonic grant number, unique per arbiter.
    pub ticket: u64,
}

/// Admission policy shared by all actors of one run.
#[async_trait]
pub trait Arbiter: Send + Sync {
    /// Waits until `actor` is admitted.
    ///
    /// Returns `Ok(None)` when stop was observed while waiting; the actor
    /// then holds nothing from this arbiter.
    ///
    /// # Errors
    /// - `ArbitrationError::ArbiterUnavailable` - Arbitration service is gone
    async fn request(&self, actor: &ActorContext) -> Result<Option<Permit>, ArbitrationError>;

    /// Hands a permit back, letting waiting neighbors proceed.
    ///
    /// # Errors
    /// - `ArbitrationError::InvariantViolation` - Permit was not outstanding
    fn release(&self, permit: Permit) -> Result<(), ArbitrationError>;
}
