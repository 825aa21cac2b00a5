//! Mediation switches.
//!
//! Three independent switches gate mediation, and all three must be on:
//! - a process-wide switch
//! - a per-type switch, shared by every context using the same [`MediationTypes`](crate::MediationTypes)
//! - a per-instance switch, stored on the entity itself ([`Mediated::mediation_enabled`])
//!
//! A single call can override the switches with [`MediationMode::Forced`] or
//! [`MediationMode::Bypassed`].

use crate::Mediated;
use mediator_types::EntityType;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

static GLOBAL_MEDIATION: AtomicBool = AtomicBool::new(true);

/// How a single mediated call consults the switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MediationMode {
    /// Mediate only if the global, type and instance switches are all on.
    #[default]
    Configured,
    /// Mediate regardless of the switches.
    Forced,
    /// Never mediate; run the body as a plain pass-through.
    Bypassed,
}

/// Type-level switches plus access to the process-wide switch.
#[derive(Debug, Default)]
pub struct MediationPolicy {
    disabled_types: RwLock<HashSet<EntityType>>,
}

impl MediationPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the process-wide switch. Defaults to enabled.
    pub fn global_enabled() -> bool {
        GLOBAL_MEDIATION.load(Ordering::SeqCst)
    }

    /// Sets the process-wide switch.
    pub fn set_global_enabled(enabled: bool) {
        GLOBAL_MEDIATION.store(enabled, Ordering::SeqCst);
    }

    /// Whether mediation is enabled for every instance of `entity_type`.
    pub fn type_enabled(&self, entity_type: &EntityType) -> bool {
        !self
            .disabled_types
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(entity_type)
    }

    pub fn enable_type(&self, entity_type: &EntityType) {
        self.disabled_types
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(entity_type);
    }

    pub fn disable_type(&self, entity_type: &EntityType) {
        self.disabled_types
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entity_type.clone());
    }

    /// Conjunction of the global, type and instance switches.
    pub fn allows<E: Mediated + ?Sized>(&self, entity: &E) -> bool {
        Self::global_enabled()
            && self.type_enabled(entity.entity_type())
            && entity.mediation_enabled()
    }

    /// Resolves whether a call in `mode` mediates `entity`.
    pub fn decide<E: Mediated + ?Sized>(&self, mode: MediationMode, entity: &E) -> bool {
        match mode {
            MediationMode::Configured => self.allows(entity),
            MediationMode::Forced => true,
            MediationMode::Bypassed => false,
        }
    }
}
