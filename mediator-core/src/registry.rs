//! Finds or creates the Mediator of an entity.
//!
//! Mediators are kept per entity type in two areas:
//! - a transient list for entities without a durable key, searched by the exact
//!   runtime identity of the instance
//! - a keyed map from durable key to Mediator
//!
//! When an entity acquires its key while its Mediator lives in the transient
//! list, the Mediator is re-homed into the keyed map under the new key, so a
//! lookup that only knows the key (another instance loaded from the same row,
//! a dependent resolving a foreign key) finds the same Mediator.
//!
//! A registry belongs to one execution context and is never shared between
//! threads of control.

use crate::config::Retention;
use crate::error::{MediationError, MediationResult};
use crate::mediator::{Entry, Mediator, MediatorId};
use crate::Mediated;
use mediator_types::{EntityKey, EntityType, InstanceId};
use std::collections::HashMap;
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct TypeSlots {
    transient: Vec<MediatorId>,
    keyed: HashMap<EntityKey, MediatorId>,
}

/// Owner of every Mediator of one execution context.
#[derive(Debug)]
pub struct MediatorRegistry {
    mediators: HashMap<MediatorId, Mediator>,
    slots: HashMap<EntityType, TypeSlots>,
    next_id: u64,
    retention: Retention,
}

impl MediatorRegistry {
    pub fn new(retention: Retention) -> Self {
        Self {
            mediators: HashMap::new(),
            slots: HashMap::new(),
            next_id: 0,
            retention,
        }
    }

    pub fn retention(&self) -> Retention {
        self.retention
    }

    /// Returns the Mediator for `entity`, creating it if none exists.
    ///
    /// Fails with [`MediationError::IdentityUnavailable`] if the entity has no
    /// key and its Mediator is inside the host's creation window.
    pub fn get_or_create<E: Mediated + ?Sized>(&mut self, entity: &E) -> MediationResult<MediatorId> {
        self.resolve(entity).map(|mediator| mediator.id())
    }

    /// Resolves the Mediator for `entity` and opens one scope on it.
    pub fn enter<E: Mediated + ?Sized>(
        &mut self,
        entity: &E,
    ) -> MediationResult<(MediatorId, Entry)> {
        let mediator = self.resolve(entity)?;
        let entry = mediator.enter();
        trace!(mediator = %mediator.id(), depth = mediator.depth(), "enter");
        Ok((mediator.id(), entry))
    }

    /// Closes one scope on `id`. When the Mediator becomes inactive, it and
    /// every other idle Mediator the retention policy does not keep are
    /// evicted, including ones created by [`get_or_create`](Self::get_or_create)
    /// outside any operation.
    ///
    /// Returns true when the Mediator became inactive.
    pub fn release(&mut self, id: MediatorId) -> bool {
        let Some(mediator) = self.mediators.get_mut(&id) else {
            return false;
        };
        let inactive = mediator.exit();
        trace!(mediator = %id, depth = mediator.depth(), "exit");
        if inactive {
            self.sweep();
        }
        inactive
    }

    /// Looks up the Mediator for `entity` without creating or migrating anything.
    pub fn find<E: Mediated + ?Sized>(&self, entity: &E) -> Option<&Mediator> {
        self.lookup(entity).and_then(|id| self.mediators.get(&id))
    }

    pub fn get(&self, id: MediatorId) -> Option<&Mediator> {
        self.mediators.get(&id)
    }

    /// Re-homes the transient Mediator of `entity` under its new durable key.
    ///
    /// Returns the migrated Mediator, or `None` if the entity has no key yet or
    /// no transient Mediator for this instance exists.
    pub fn migrate<E: Mediated + ?Sized>(&mut self, entity: &E) -> Option<MediatorId> {
        let key = entity.durable_key()?;
        let entity_type = entity.entity_type();
        let id = self.transient_id(entity_type, entity.instance_id())?;

        let slots = self.slots.get_mut(entity_type)?;
        slots.transient.retain(|candidate| *candidate != id);
        slots.keyed.insert(key, id);
        if let Some(mediator) = self.mediators.get_mut(&id) {
            mediator.assign_key(key);
        }
        debug!(mediator = %id, %entity_type, %key, "migrated mediator to keyed map");
        Some(id)
    }

    /// Removes an inactive Mediator unless the retention policy keeps it.
    ///
    /// Mediators created before their entity had a key are always removed.
    /// Returns true if the Mediator was removed.
    pub fn evict(&mut self, id: MediatorId) -> bool {
        let Some(mediator) = self.mediators.get(&id) else {
            return false;
        };
        if mediator.is_mediating() {
            return false;
        }
        if self.retains(mediator) {
            trace!(mediator = %id, "retaining persisted mediator");
            return false;
        }

        let Some(mediator) = self.mediators.remove(&id) else {
            return false;
        };
        if let Some(slots) = self.slots.get_mut(mediator.entity_type()) {
            slots.transient.retain(|candidate| *candidate != id);
            if let Some(key) = mediator.key() {
                if slots.keyed.get(&key) == Some(&id) {
                    slots.keyed.remove(&key);
                }
            }
        }
        debug!(mediator = %id, entity_type = %mediator.entity_type(), "evicted mediator");
        true
    }

    /// Marks the in-flight Mediator of a keyless entity as being created.
    pub fn begin_creation<E: Mediated + ?Sized>(&mut self, entity: &E) {
        if entity.has_durable_key() {
            return;
        }
        if let Some(id) = self.transient_id(entity.entity_type(), entity.instance_id()) {
            if let Some(mediator) = self.mediators.get_mut(&id) {
                if mediator.is_mediating() {
                    mediator.set_creating(true);
                }
            }
        }
    }

    /// Closes the creation window once the entity has its durable key,
    /// migrating its Mediator to the keyed map.
    pub fn finish_creation<E: Mediated + ?Sized>(&mut self, entity: &E) {
        let id = self.migrate(entity).or_else(|| self.lookup(entity));
        if let Some(mediator) = id.and_then(|id| self.mediators.get_mut(&id)) {
            mediator.set_creating(false);
        }
    }

    /// Closes the creation window after a failed creation.
    pub fn abort_creation<E: Mediated + ?Sized>(&mut self, entity: &E) {
        if let Some(mediator) = self.lookup(entity).and_then(|id| self.mediators.get_mut(&id)) {
            mediator.set_creating(false);
        }
    }

    pub fn len(&self) -> usize {
        self.mediators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mediators.is_empty()
    }

    fn resolve<E: Mediated + ?Sized>(&mut self, entity: &E) -> MediationResult<&mut Mediator> {
        let entity_type = entity.entity_type();
        let instance = entity.instance_id();
        let key = entity.durable_key();

        let existing = match key {
            Some(key) => self
                .keyed_id(entity_type, key)
                .or_else(|| self.migrate(entity)),
            None => {
                let found = self.transient_id(entity_type, instance);
                let creating = found
                    .and_then(|id| self.mediators.get(&id))
                    .is_some_and(Mediator::is_creating);
                if creating {
                    return Err(MediationError::IdentityUnavailable {
                        entity_type: entity_type.clone(),
                        instance,
                    });
                }
                found
            }
        };

        let id = match existing {
            Some(id) => id,
            None => self.allocate(entity_type, key),
        };
        Ok(self.mediators.entry(id).or_insert_with(|| {
            debug!(mediator = %id, %entity_type, keyed = key.is_some(), "created mediator");
            Mediator::new(id, entity_type.clone(), instance, key)
        }))
    }

    fn retains(&self, mediator: &Mediator) -> bool {
        self.retention == Retention::RetainPersisted && mediator.keyed_at_creation()
    }

    fn sweep(&mut self) {
        let idle: Vec<MediatorId> = self
            .mediators
            .values()
            .filter(|mediator| !mediator.is_mediating() && !self.retains(mediator))
            .map(Mediator::id)
            .collect();
        for id in idle {
            self.evict(id);
        }
    }

    fn allocate(&mut self, entity_type: &EntityType, key: Option<EntityKey>) -> MediatorId {
        self.next_id += 1;
        let id = MediatorId::new(self.next_id);
        let slots = self.slots.entry(entity_type.clone()).or_default();
        match key {
            Some(key) => {
                slots.keyed.insert(key, id);
            }
            None => slots.transient.push(id),
        }
        id
    }

    fn lookup<E: Mediated + ?Sized>(&self, entity: &E) -> Option<MediatorId> {
        let entity_type = entity.entity_type();
        entity
            .durable_key()
            .and_then(|key| self.keyed_id(entity_type, key))
            .or_else(|| self.transient_id(entity_type, entity.instance_id()))
    }

    fn keyed_id(&self, entity_type: &EntityType, key: EntityKey) -> Option<MediatorId> {
        self.slots.get(entity_type)?.keyed.get(&key).copied()
    }

    fn transient_id(&self, entity_type: &EntityType, instance: InstanceId) -> Option<MediatorId> {
        self.slots.get(entity_type)?.transient.iter().copied().find(|id| {
            self.mediators
                .get(id)
                .is_some_and(|mediator| mediator.mediated_instance() == instance)
        })
    }
}

impl Default for MediatorRegistry {
    fn default() -> Self {
        Self::new(Retention::default())
    }
}
