//! Actor and resource identities plus the static wiring between them.
//!
//! Actor `i` needs resources `i mod R` and `(i + 1) mod R`. With a single
//! resource both collapse to one. Two actors are adjacent when they share a
//! resource; this is the conflict graph every arbiter reasons about.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{ContendError, Result};

/// Index of a simulated actor, `0..N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorId(usize);

impl ActorId {
    /// Creates an actor id from its index.
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns the zero-based index.
    pub fn index(self) -> usize {
        self.0
    }

    /// Returns true for even-indexed actors.
    pub fn is_even(self) -> bool {
        self.0 % 2 == 0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "A{}", self.0)
    }
}

/// Index of a shared exclusive resource, `0..R`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(usize);

impl ResourceId {
    /// Creates a resource id from its index.
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns the zero-based index.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.0)
    }
}

/// Order in which an actor walks its needed resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickOrder {
    /// `i` then `i + 1 mod R`.
    LeftFirst,
    /// `i + 1 mod R` then `i`.
    RightFirst,
    /// Lower index first (global total order).
    LowestFirst,
    /// Higher index first.
    HighestFirst,
}

/// Resources one actor needs before it may work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceNeeds {
    left: ResourceId,
    right: Option<ResourceId>,
}

impl ResourceNeeds {
    /// Returns the left (own-index) resource.
    pub fn left(&self) -> ResourceId {
        self.left
    }

    /// Returns the right resource, absent when the topology has one resource.
    pub fn right(&self) -> Option<ResourceId> {
        self.right
    }

    /// Number of distinct resources needed.
    pub fn len(&self) -> usize {
        if self.right.is_some() { 2 } else { 1 }
    }

    /// Always false; an actor needs at least one resource.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Checks whether `resource` is one of the needed resources.
    pub fn contains(&self, resource: ResourceId) -> bool {
        self.left == resource || self.right == Some(resource)
    }

    /// Returns the needed resources in the requested pick order.
    pub fn ordered(&self, order: PickOrder) -> Vec<ResourceId> {
        let Some(right) = self.right else {
            return vec![self.left];
        };

        match order {
            PickOrder::LeftFirst => vec![self.left, right],
            PickOrder::RightFirst => vec![right, self.left],
            PickOrder::LowestFirst => vec![self.left.min(right), self.left.max(right)],
            PickOrder::HighestFirst => vec![self.left.max(right), self.left.min(right)],
        }
    }
}

/// Static wiring of N actors to R resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    actor_count: usize,
    resource_count: usize,
}

impl Topology {
    /// Creates a topology.
    ///
    /// # Errors
    /// - `ContendError::Configuration` - Zero actors or zero resources
    pub fn new(actor_count: usize, resource_count: usize) -> Result<Self> {
        if actor_count == 0 {
            return Err(ContendError::Configuration {
                reason: "at least one actor is required".to_string(),
            });
        }
        if resource_count == 0 {
            return Err(ContendError::Configuration {
                reason: "at least one resource is required".to_string(),
            });
        }

        Ok(Self {
            actor_count,
            resource_count,
        })
    }

    /// Number of actors.
    pub fn actor_count(&self) -> usize {
        self.actor_count
    }

    /// Number of resources.
    pub fn resource_count(&self) -> usize {
        self.resource_count
    }

    /// Iterates over all actor ids in index order.
    pub fn actors(&self) -> impl Iterator<Item = ActorId> {
        (0..self.actor_count).map(ActorId::new)
    }

    /// Iterates over all resource ids in index order.
    pub fn resources(&self) -> impl Iterator<Item = ResourceId> {
        (0..self.resource_count).map(ResourceId::new)
    }

    /// Returns the resources `actor` needs.
    pub fn needs(&self, actor: ActorId) -> ResourceNeeds {
        let left = ResourceId::new(actor.index() % self.resource_count);
        let right = ResourceId::new((actor.index() + 1) % self.resource_count);

        ResourceNeeds {
            left,
            right: (right != left).then_some(right),
        }
    }

    /// Checks whether two distinct actors compete for a common resource.
    pub fn conflicts(&self, a: ActorId, b: ActorId) -> bool {
        if a == b {
            return false;
        }
        let needs_a = self.needs(a);
        let needs_b = self.needs(b);
        needs_a
            .ordered(PickOrder::LeftFirst)
            .into_iter()
            .any(|resource| needs_b.contains(resource))
    }

    /// Returns every actor adjacent to `actor` in the conflict graph.
    pub fn neighbors(&self, actor: ActorId) -> Vec<ActorId> {
        self.actors()
            .filter(|other| self.conflicts(actor, *other))
            .collect()
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} actors x {} resources",
            self.actor_count, self.resource_count
        )
    }
}
