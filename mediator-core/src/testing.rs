//! Minimal entity and host used by the unit tests of this crate.

use crate::{Mediated, MediationContext, MediationResult, PersistenceHost};
use mediator_types::{EntityKey, EntityType, InstanceId};
use std::cell::Cell;

#[derive(Debug)]
pub(crate) struct TestEntity {
    entity_type: EntityType,
    instance: InstanceId,
    pub key: Option<EntityKey>,
    pub version: u64,
    enabled: bool,
}

impl TestEntity {
    pub fn new(entity_type: &str) -> Self {
        Self {
            entity_type: entity_type.into(),
            instance: InstanceId::new(),
            key: None,
            version: 0,
            enabled: true,
        }
    }

    pub fn with_key(mut self, key: EntityKey) -> Self {
        self.key = Some(key);
        self
    }
}

impl Mediated for TestEntity {
    fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    fn instance_id(&self) -> InstanceId {
        self.instance
    }

    fn durable_key(&self) -> Option<EntityKey> {
        self.key
    }

    fn supports_versioning(&self) -> bool {
        true
    }

    fn mediation_enabled(&self) -> bool {
        self.enabled
    }

    fn set_mediation_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
}

#[derive(Debug, Default)]
pub(crate) struct TestHost {
    pub touches: Cell<usize>,
}

impl PersistenceHost for TestHost {
    type Entity = TestEntity;

    fn run_in_atomic_scope<T>(
        &self,
        body: impl FnOnce() -> MediationResult<T>,
    ) -> MediationResult<T> {
        body()
    }

    fn bump_version(&self, entity: &mut TestEntity) -> MediationResult<()> {
        entity.version += 1;
        Ok(())
    }

    fn touch(&self, _ctx: &MediationContext<'_, Self>, _entity: &mut TestEntity) -> MediationResult<()> {
        self.touches.set(self.touches.get() + 1);
        Ok(())
    }
}
