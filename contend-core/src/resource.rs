//! Exclusive-ownership resources with holder instrumentation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::topology::{ActorId, ResourceId, Topology};

/// Errors raised while actors compete for resources.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArbitrationError {
    /// Bounded wait on a resource expired. Strategies recover by retrying.
    #[error("Timed out after {timeout:?} waiting for {resource}")]
    AcquisitionTimeout {
        resource: ResourceId,
        timeout: Duration,
    },

    /// Arbiter refused to let the actor proceed yet. Actor waits and re-asks.
    #[error("Arbiter denied {actor}: a conflicting actor has precedence")]
    ArbiterDenied { actor: ActorId },

    /// Mutual exclusion or release pairing broke. Never expected.
    #[error("Invariant violated by {actor}: {detail}")]
    InvariantViolation { actor: ActorId, detail: String },

    /// Resource semaphore closed underneath a waiter. Tables never close
    /// their semaphores, so this only surfaces if a resource is torn down
    /// while an actor still waits on it.
    #[error("Resource {resource} is no longer available")]
    ResourceClosed { resource: ResourceId },

    /// Arbitration service is gone while the run is still active.
    #[error("Arbitration service unavailable")]
    ArbiterUnavailable,
}

impl ArbitrationError {
    /// Returns true for contention outcomes a strategy is expected to absorb.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ArbitrationError::AcquisitionTimeout { .. } | ArbitrationError::ArbiterDenied { .. }
        )
    }
}

/// Exclusive token held by at most one actor at a time.
///
/// Ownership is a single semaphore permit. The holder slot is bookkeeping on
/// top of it, used to catch foreign releases and double acquisition.
#[derive(Debug)]
pub struct Resource {
    id: ResourceId,
    permit: Semaphore,
    holder: Mutex<Option<ActorId>>,
    acquisitions: AtomicU64,
    violations: AtomicU64,
}

impl Resource {
    /// Creates an unheld resource.
    pub fn new(id: ResourceId) -> Self {
        Self {
            id,
            permit: Semaphore::new(1),
            holder: Mutex::new(None),
            acquisitions: AtomicU64::new(0),
            violations: AtomicU64::new(0),
        }
    }

    /// Returns this resource's id.
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Waits without bound until `actor` holds the resource.
    ///
    /// # Errors
    /// - `ArbitrationError::ResourceClosed` - Semaphore closed
    /// - `ArbitrationError::InvariantViolation` - Holder slot already occupied
    pub async fn acquire(&self, actor: ActorId) -> Result<(), ArbitrationError> {
        let permit = self
            .permit
            .acquire()
            .await
            .map_err(|_| ArbitrationError::ResourceClosed { resource: self.id })?;
        permit.forget();
        self.mark_held(actor)
    }

    /// Waits at most `timeout` for the resource. A zero timeout is a single
    /// non-blocking probe.
    ///
    /// Returns whether `actor` now holds the resource.
    ///
    /// # Errors
    /// - `ArbitrationError::InvariantViolation` - Holder slot already occupied
    pub async fn try_acquire(
        &self,
        actor: ActorId,
        timeout: Duration,
    ) -> Result<bool, ArbitrationError> {
        let acquired = if timeout.is_zero() {
            match self.permit.try_acquire() {
                Ok(permit) => {
                    permit.forget();
                    true
                }
                Err(_) => false,
            }
        } else {
            match tokio::time::timeout(timeout, self.permit.acquire()).await {
                Ok(Ok(permit)) => {
                    permit.forget();
                    true
                }
                _ => false,
            }
        };

        if !acquired {
            return Ok(false);
        }
        self.mark_held(actor)?;
        Ok(true)
    }

    /// Returns the resource. Only the current holder may release.
    ///
    /// # Errors
    /// - `ArbitrationError::InvariantViolation` - `actor` is not the holder
    pub fn release(&self, actor: ActorId) -> Result<(), ArbitrationError> {
        {
            let mut holder = self.holder.lock();
            if *holder != Some(actor) {
                self.violations.fetch_add(1, Ordering::Relaxed);
                tracing::error!("{} released {} held by {:?}", actor, self.id, *holder);
                return Err(ArbitrationError::InvariantViolation {
                    actor,
                    detail: format!("released {} held by {:?}", self.id, *holder),
                });
            }
            *holder = None;
        }

        self.permit.add_permits(1);
        Ok(())
    }

    /// Returns the current holder, if any.
    pub fn holder(&self) -> Option<ActorId> {
        *self.holder.lock()
    }

    /// Checks whether any actor currently holds the resource.
    pub fn is_held(&self) -> bool {
        self.holder().is_some()
    }

    /// Number of successful acquisitions over the resource's lifetime.
    pub fn acquisition_count(&self) -> u64 {
        self.acquisitions.load(Ordering::Relaxed)
    }

    /// Number of detected mutual-exclusion or pairing violations.
    pub fn violation_count(&self) -> u64 {
        self.violations.load(Ordering::Relaxed)
    }

    fn mark_held(&self, actor: ActorId) -> Result<(), ArbitrationError> {
        let mut holder = self.holder.lock();
        if let Some(current) = *holder {
            self.violations.fetch_add(1, Ordering::Relaxed);
            tracing::error!("{} acquired {} while {} holds it", actor, self.id, current);
            return Err(ArbitrationError::InvariantViolation {
                actor,
                detail: format!("acquired {} while {current} holds it", self.id),
            });
        }
        *holder = Some(actor);
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// All resources of one run, indexed by [`ResourceId`].
#[derive(Debug)]
pub struct ResourceTable {
    resources: Vec<Resource>,
}

impl ResourceTable {
    /// Creates one unheld resource per id in the topology.
    pub fn new(topology: &Topology) -> Self {
        Self {
            resources: topology.resources().map(Resource::new).collect(),
        }
    }

    /// Returns the resource for `id`.
    ///
    /// # Panics
    /// Panics if `id` is outside the topology this table was built from.
    pub fn get(&self, id: ResourceId) -> &Resource {
        &self.resources[id.index()]
    }

    /// Iterates over all resources.
    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.iter()
    }

    /// Number of resources.
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Checks whether the table has no resources.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Returns every resource that is currently held, with its holder.
    pub fn held(&self) -> Vec<(ResourceId, ActorId)> {
        self.resources
            .iter()
            .filter_map(|resource| resource.holder().map(|holder| (resource.id(), holder)))
            .collect()
    }

    /// Sum of violation counters across all resources.
    pub fn total_violations(&self) -> u64 {
        self.resources.iter().map(Resource::violation_count).sum()
    }
}
