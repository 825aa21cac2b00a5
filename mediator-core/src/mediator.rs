//! Per-entity mediation state.
//!
//! A [`Mediator`] tracks how many mediated operations are currently open for
//! one entity. It moves from inactive (depth 0) to mediating (depth >= 1) and
//! back. Only the outermost entry and the outermost exit trigger the callback
//! chain; everything in between just moves the depth counter.

use mediator_types::{EntityKey, EntityType, InstanceId};
use std::fmt;

/// Opaque handle to a Mediator owned by a [`MediatorRegistry`](crate::MediatorRegistry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MediatorId(u64);

impl MediatorId {
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for MediatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mediator#{}", self.0)
    }
}

/// Externally observable mediation phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Mediating,
}

/// Whether an `enter` opened the outermost scope or a nested one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    Outermost,
    Nested,
}

#[derive(Debug)]
pub struct Mediator {
    id: MediatorId,
    entity_type: EntityType,
    /// Weak back-reference: identifies the instance without owning it.
    instance: InstanceId,
    key: Option<EntityKey>,
    keyed_at_creation: bool,
    /// Set while the host runs pre-creation hooks and the key is not yet assigned.
    creating: bool,
    depth: usize,
}

impl Mediator {
    pub(crate) fn new(
        id: MediatorId,
        entity_type: EntityType,
        instance: InstanceId,
        key: Option<EntityKey>,
    ) -> Self {
        Self {
            id,
            entity_type,
            instance,
            keyed_at_creation: key.is_some(),
            key,
            creating: false,
            depth: 0,
        }
    }

    pub fn id(&self) -> MediatorId {
        self.id
    }

    pub fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    /// The instance this Mediator was created for.
    pub fn mediated_instance(&self) -> InstanceId {
        self.instance
    }

    pub fn key(&self) -> Option<EntityKey> {
        self.key
    }

    /// Whether the entity already had a durable key when this Mediator was created.
    pub fn keyed_at_creation(&self) -> bool {
        self.keyed_at_creation
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_mediating(&self) -> bool {
        self.depth > 0
    }

    pub fn current_phase(&self) -> Option<Phase> {
        self.is_mediating().then_some(Phase::Mediating)
    }

    pub fn is_creating(&self) -> bool {
        self.creating
    }

    pub(crate) fn enter(&mut self) -> Entry {
        self.depth += 1;
        if self.depth == 1 {
            Entry::Outermost
        } else {
            Entry::Nested
        }
    }

    /// Closes one scope. Returns true when the Mediator became inactive.
    pub(crate) fn exit(&mut self) -> bool {
        debug_assert!(self.depth > 0, "exit without matching enter on {}", self.id);
        self.depth = self.depth.saturating_sub(1);
        self.depth == 0
    }

    pub(crate) fn set_creating(&mut self, creating: bool) {
        self.creating = creating;
    }

    pub(crate) fn assign_key(&mut self, key: EntityKey) {
        self.key = Some(key);
    }
}
