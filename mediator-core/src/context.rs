//! The coordinator entrypoint.
//!
//! A [`MediationContext`] is created per logical unit of work (one request,
//! one top-level call stack). It owns the [`MediatorRegistry`] for that unit of
//! work and shares the frozen [`MediationTypes`] with every other context.
//!
//! ```text
//! mediated_transaction(entity, body)
//!   host.run_in_atomic_scope {
//!     enter                       depth 0 -> 1 runs before steps
//!     body(entity)                nested calls only move the depth
//!     reconcile, cache, touch     once, after every nested scope unwound
//!     release                     depth 1 -> 0, evict per retention
//!   }
//! ```

use crate::chain::{CallbackChain, StepKind};
use crate::config::MediationConfig;
use crate::error::{MediationError, MediationResult};
use crate::mediator::{Entry, Mediator, MediatorId, Phase};
use crate::policy::MediationMode;
use crate::registration::MediationTypes;
use crate::registry::MediatorRegistry;
use crate::{Mediated, PersistenceHost};
use mediator_types::EntityType;
use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;
use tracing::{trace, warn};

/// Per-unit-of-work mediation state bound to one host.
///
/// Not `Sync`: a context serves one thread of control. It is reentrant, so
/// steps and host hooks receive it and may open nested mediated operations.
pub struct MediationContext<'h, H: PersistenceHost> {
    host: &'h H,
    types: Arc<MediationTypes<H>>,
    registry: RefCell<MediatorRegistry>,
    config: MediationConfig,
}

impl<'h, H: PersistenceHost> MediationContext<'h, H> {
    pub fn new(host: &'h H, types: Arc<MediationTypes<H>>) -> Self {
        Self::with_config(host, types, MediationConfig::default())
    }

    pub fn with_config(host: &'h H, types: Arc<MediationTypes<H>>, config: MediationConfig) -> Self {
        Self {
            host,
            types,
            registry: RefCell::new(MediatorRegistry::new(config.retention)),
            config,
        }
    }

    pub fn host(&self) -> &'h H {
        self.host
    }

    pub fn types(&self) -> &MediationTypes<H> {
        &self.types
    }

    pub fn config(&self) -> &MediationConfig {
        &self.config
    }

    // ── Coordinator ─────────────────────────────────────────────

    /// Runs `body` inside one atomic storage scope, mediated if the global,
    /// type and instance switches all allow it.
    ///
    /// Reentrant: a nested call for the same entity only runs `body`. The
    /// before steps run when the outermost call starts; reconcile and cache
    /// steps, followed by a single version bump and touch, run once when the
    /// outermost body returned. Any error rolls the whole scope back and is
    /// returned to the caller of the outermost call.
    pub fn mediated_transaction<T>(
        &self,
        entity: &mut H::Entity,
        body: impl FnOnce(&mut H::Entity) -> MediationResult<T>,
    ) -> MediationResult<T> {
        self.transaction(MediationMode::Configured, entity, body)
    }

    /// Like [`mediated_transaction`](Self::mediated_transaction), but mediates
    /// regardless of the switches.
    pub fn with_mediation<T>(
        &self,
        entity: &mut H::Entity,
        body: impl FnOnce(&mut H::Entity) -> MediationResult<T>,
    ) -> MediationResult<T> {
        self.transaction(MediationMode::Forced, entity, body)
    }

    /// Runs `body` in an atomic scope without any mediation.
    pub fn without_mediation<T>(
        &self,
        entity: &mut H::Entity,
        body: impl FnOnce(&mut H::Entity) -> MediationResult<T>,
    ) -> MediationResult<T> {
        self.transaction(MediationMode::Bypassed, entity, body)
    }

    fn transaction<T>(
        &self,
        mode: MediationMode,
        entity: &mut H::Entity,
        body: impl FnOnce(&mut H::Entity) -> MediationResult<T>,
    ) -> MediationResult<T> {
        if !self.types.policy().decide(mode, &*entity) {
            trace!(entity_type = %entity.entity_type(), ?mode, "mediation off, passing through");
            return self.host.run_in_atomic_scope(|| body(entity));
        }
        self.host.run_in_atomic_scope(|| self.mediate(entity, body))
    }

    fn mediate<T>(
        &self,
        entity: &mut H::Entity,
        body: impl FnOnce(&mut H::Entity) -> MediationResult<T>,
    ) -> MediationResult<T> {
        let (id, entry) = self.registry.borrow_mut().enter(&*entity)?;
        let _release = Release {
            registry: &self.registry,
            id,
        };
        if entry == Entry::Nested {
            return body(entity);
        }

        let chain = self.types.chain(entity.entity_type());
        self.run_steps(chain, StepKind::Before, entity)?;
        let output = body(entity)?;
        self.finalize(chain, entity)?;
        Ok(output)
    }

    /// Reconcile, cache, then one version bump and touch.
    ///
    /// Runs while the outermost scope is still open, so mediated calls made
    /// from these steps or from the host's touch hooks nest instead of
    /// starting a new top-level operation.
    fn finalize(&self, chain: &CallbackChain<H>, entity: &mut H::Entity) -> MediationResult<()> {
        self.run_steps(chain, StepKind::Reconcile, entity)?;
        self.run_steps(chain, StepKind::Cache, entity)?;
        if entity.supports_versioning() {
            self.host.bump_version(entity)?;
            self.host.touch(self, entity)?;
        }
        Ok(())
    }

    fn run_steps(
        &self,
        chain: &CallbackChain<H>,
        kind: StepKind,
        entity: &mut H::Entity,
    ) -> MediationResult<()> {
        for step in chain.steps(kind) {
            trace!(entity_type = %entity.entity_type(), %kind, step = step.name(), "running step");
            if let Err(source) = step.run(entity, self) {
                warn!(entity_type = %entity.entity_type(), %kind, step = step.name(), error = %source, "mediation step failed");
                // Errors from nested mediated operations keep their own shape.
                return Err(match source.downcast::<MediationError>() {
                    Ok(inner) => inner,
                    Err(source) => MediationError::Step {
                        entity_type: entity.entity_type().clone(),
                        kind,
                        step: step.name().to_string(),
                        source,
                    },
                });
            }
        }
        Ok(())
    }

    // ── Introspection ───────────────────────────────────────────

    /// Whether a mediated operation is open for `entity`. Never creates a Mediator.
    pub fn is_mediating(&self, entity: &H::Entity) -> bool {
        self.registry
            .borrow()
            .find(entity)
            .is_some_and(Mediator::is_mediating)
    }

    pub fn current_phase(&self, entity: &H::Entity) -> Option<Phase> {
        self.registry
            .borrow()
            .find(entity)
            .and_then(Mediator::current_phase)
    }

    /// Nesting depth of the open mediated operations for `entity`.
    pub fn depth(&self, entity: &H::Entity) -> usize {
        self.registry.borrow().find(entity).map_or(0, Mediator::depth)
    }

    /// Returns the Mediator of `entity`, creating it if needed.
    ///
    /// A Mediator created here while nothing is mediating stays idle until
    /// the next top-level operation of this context finishes, which evicts it
    /// unless the retention policy keeps it.
    pub fn mediator_for(&self, entity: &H::Entity) -> MediationResult<MediatorId> {
        self.registry.borrow_mut().get_or_create(entity)
    }

    /// Returns the Mediator of `entity` if one exists.
    pub fn current_mediator(&self, entity: &H::Entity) -> Option<MediatorId> {
        self.registry.borrow().find(entity).map(Mediator::id)
    }

    /// Number of Mediators currently held by this context.
    pub fn mediator_count(&self) -> usize {
        self.registry.borrow().len()
    }

    // ── Switches ────────────────────────────────────────────────

    pub fn enable_mediation(&self, entity: &mut H::Entity) {
        entity.set_mediation_enabled(true);
    }

    pub fn disable_mediation(&self, entity: &mut H::Entity) {
        entity.set_mediation_enabled(false);
    }

    /// Enables mediation for every instance of `entity_type`, in every context
    /// sharing these registrations.
    pub fn enable_all_mediation(&self, entity_type: impl Into<EntityType>) {
        self.types.policy().enable_type(&entity_type.into());
    }

    pub fn disable_all_mediation(&self, entity_type: impl Into<EntityType>) {
        self.types.policy().disable_type(&entity_type.into());
    }

    /// Whether a [`mediated_transaction`](Self::mediated_transaction) for
    /// `entity` would mediate.
    pub fn mediation_allowed(&self, entity: &H::Entity) -> bool {
        self.types.policy().allows(entity)
    }

    // ── Creation protocol ───────────────────────────────────────

    /// Opens the creation window for a keyless entity about to be inserted.
    ///
    /// Until [`finish_creation`](Self::finish_creation) or
    /// [`abort_creation`](Self::abort_creation), a nested mediated operation
    /// for this entity fails with [`MediationError::IdentityUnavailable`].
    pub fn begin_creation(&self, entity: &H::Entity) {
        self.registry.borrow_mut().begin_creation(entity);
    }

    /// Closes the creation window once `entity` holds its durable key.
    pub fn finish_creation(&self, entity: &H::Entity) {
        self.registry.borrow_mut().finish_creation(entity);
    }

    pub fn abort_creation(&self, entity: &H::Entity) {
        self.registry.borrow_mut().abort_creation(entity);
    }
}

impl<H: PersistenceHost> fmt::Debug for MediationContext<'_, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediationContext")
            .field("types", &self.types)
            .field("mediators", &self.mediator_count())
            .field("config", &self.config)
            .finish()
    }
}

/// Closes one scope on drop, on success and failure paths alike.
struct Release<'r> {
    registry: &'r RefCell<MediatorRegistry>,
    id: MediatorId,
}

impl Drop for Release<'_> {
    fn drop(&mut self) {
        match self.registry.try_borrow_mut() {
            Ok(mut registry) => {
                registry.release(self.id);
            }
            Err(_) => warn!(mediator = %self.id, "registry busy, mediator not released"),
        }
    }
}
