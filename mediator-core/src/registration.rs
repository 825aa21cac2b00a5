//! Declarative per-type registration of mediation steps.
//!
//! Registrations accumulate: registering a type twice returns the same
//! [`TypeRegistration`], and later steps append to its lists. Once built, the
//! whole [`MediationTypes`] is frozen behind an `Arc` and shared read-only by
//! every [`MediationContext`].

use crate::chain::{CallbackChain, StepKind};
use crate::policy::MediationPolicy;
use crate::{MediationContext, PersistenceHost};
use mediator_types::EntityType;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Everything declared for one entity type.
pub struct TypeRegistration<H: PersistenceHost> {
    entity_type: EntityType,
    chain: CallbackChain<H>,
    dependencies: Vec<EntityType>,
}

impl<H: PersistenceHost> TypeRegistration<H> {
    fn new(entity_type: EntityType) -> Self {
        Self {
            entity_type,
            chain: CallbackChain::new(),
            dependencies: Vec::new(),
        }
    }

    /// Registers a step run once when the outermost mediated operation starts.
    pub fn before<F>(&mut self, name: &str, step: F) -> &mut Self
    where
        F: Fn(&mut H::Entity, &MediationContext<'_, H>) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
    {
        self.add(StepKind::Before, name, Arc::new(step))
    }

    /// Registers a reconciliation step.
    pub fn reconciles<F>(&mut self, name: &str, step: F) -> &mut Self
    where
        F: Fn(&mut H::Entity, &MediationContext<'_, H>) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
    {
        self.add(StepKind::Reconcile, name, Arc::new(step))
    }

    /// Registers a caching step.
    pub fn caches<F>(&mut self, name: &str, step: F) -> &mut Self
    where
        F: Fn(&mut H::Entity, &MediationContext<'_, H>) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
    {
        self.add(StepKind::Cache, name, Arc::new(step))
    }

    /// Declares that this type's steps may look up instances of `dependency`.
    ///
    /// Informational only; the core does not enforce it.
    pub fn depends_on(&mut self, dependency: impl Into<EntityType>) -> &mut Self {
        let dependency = dependency.into();
        if !self.dependencies.contains(&dependency) {
            self.dependencies.push(dependency);
        }
        self
    }

    pub fn chain(&self) -> &CallbackChain<H> {
        &self.chain
    }

    pub fn dependencies(&self) -> &[EntityType] {
        &self.dependencies
    }

    fn add(
        &mut self,
        kind: StepKind,
        name: &str,
        step: Arc<crate::chain::StepFn<H>>,
    ) -> &mut Self {
        if !self.chain.add(kind, name, step) {
            debug!(entity_type = %self.entity_type, %kind, step = name, "step already registered, ignoring");
        }
        self
    }
}

/// All type registrations plus the type-level switches.
pub struct MediationTypes<H: PersistenceHost> {
    types: HashMap<EntityType, TypeRegistration<H>>,
    policy: MediationPolicy,
    empty: CallbackChain<H>,
}

impl<H: PersistenceHost> MediationTypes<H> {
    pub fn new() -> Self {
        Self {
            types: HashMap::new(),
            policy: MediationPolicy::new(),
            empty: CallbackChain::new(),
        }
    }

    /// Returns the registration for `entity_type`, creating it on first use.
    pub fn register(&mut self, entity_type: impl Into<EntityType>) -> &mut TypeRegistration<H> {
        let entity_type = entity_type.into();
        self.types
            .entry(entity_type.clone())
            .or_insert_with(|| TypeRegistration::new(entity_type))
    }

    pub fn is_registered(&self, entity_type: &EntityType) -> bool {
        self.types.contains_key(entity_type)
    }

    /// The chain for `entity_type`. Unregistered types get an empty chain.
    pub fn chain(&self, entity_type: &EntityType) -> &CallbackChain<H> {
        self.types
            .get(entity_type)
            .map(TypeRegistration::chain)
            .unwrap_or(&self.empty)
    }

    pub fn dependencies(&self, entity_type: &EntityType) -> &[EntityType] {
        self.types
            .get(entity_type)
            .map(TypeRegistration::dependencies)
            .unwrap_or(&[])
    }

    pub fn policy(&self) -> &MediationPolicy {
        &self.policy
    }

    /// Freezes the registrations for sharing between contexts.
    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl<H: PersistenceHost> Default for MediationTypes<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: PersistenceHost> fmt::Debug for MediationTypes<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.types.keys().collect();
        types.sort();
        f.debug_struct("MediationTypes")
            .field("types", &types)
            .field("policy", &self.policy)
            .finish()
    }
}
