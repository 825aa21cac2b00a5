use crate::{MediationContext, MediationResult};
use mediator_types::{EntityKey, EntityType, InstanceId};

/// An entity whose saves can be mediated.
///
/// Implemented by the host's in-memory entity representation. The core only
/// reads identity and capability information from it; all mutation of stored
/// state goes through [`PersistenceHost`].
pub trait Mediated {
    /// The entity's type name. Selects the callback chain and the type switch.
    fn entity_type(&self) -> &EntityType;

    /// Runtime identity of this in-memory instance.
    fn instance_id(&self) -> InstanceId;

    /// The durable key, once the entity has been persisted.
    fn durable_key(&self) -> Option<EntityKey>;

    fn has_durable_key(&self) -> bool {
        self.durable_key().is_some()
    }

    /// Whether the entity carries both a version counter and a last-modified
    /// timestamp. Only such entities are touched when mediation unwinds.
    fn supports_versioning(&self) -> bool {
        false
    }

    /// Per-instance mediation switch. Lives as long as the instance does.
    fn mediation_enabled(&self) -> bool;

    fn set_mediation_enabled(&mut self, enabled: bool);
}

/// The storage side of mediation, implemented by the host persistence layer.
///
/// Lifecycle hooks around the actual write (before create, after create,
/// after save) are host concerns; they may call back into
/// [`MediationContext::mediated_transaction`] for the same or other entities.
pub trait PersistenceHost: Sized {
    type Entity: Mediated;

    /// Runs `body` inside an all-or-nothing storage scope.
    ///
    /// Scopes nest: an inner scope must not commit anything on its own, and a
    /// failing scope must roll back every write made inside it.
    fn run_in_atomic_scope<T>(
        &self,
        body: impl FnOnce() -> MediationResult<T>,
    ) -> MediationResult<T>;

    /// Increments the entity's version counter.
    fn bump_version(&self, entity: &mut Self::Entity) -> MediationResult<()>;

    /// Updates the entity's last-modified timestamp and persists it.
    ///
    /// Receives the context so that host hooks triggered by the write can
    /// mediate reentrantly.
    fn touch(
        &self,
        ctx: &MediationContext<'_, Self>,
        entity: &mut Self::Entity,
    ) -> MediationResult<()>;
}
