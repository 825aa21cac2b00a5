//! Reentrant save mediation.
//!
//! Coordinates the before / reconcile / cache steps registered for an entity
//! type around the host's save operation, so that each list runs exactly once
//! per top-level operation no matter how deeply saves of the same entity nest
//! (a step saving the entity again, a dependent created from a host hook that
//! saves its parent, ...).
//!
//! - [`MediationTypes`] holds the declarative per-type registrations
//! - [`MediationContext`] is the coordinator, one per unit of work
//! - [`MediatorRegistry`] finds or creates the [`Mediator`] of an entity
//! - [`MediationPolicy`] gates mediation by global, type and instance switches
//! - [`PersistenceHost`] and [`Mediated`] are implemented by the storage layer

mod chain;
mod config;
mod context;
mod error;
mod host;
mod mediator;
mod policy;
mod registration;
mod registry;

#[cfg(test)]
mod testing;

pub use chain::{CallbackChain, NamedStep, StepFn, StepKind};
pub use config::{MediationConfig, Retention};
pub use context::MediationContext;
pub use error::{MediationError, MediationResult};
pub use host::{Mediated, PersistenceHost};
pub use mediator::{Entry, Mediator, MediatorId, Phase};
pub use policy::{MediationMode, MediationPolicy};
pub use registration::{MediationTypes, TypeRegistration};
pub use registry::MediatorRegistry;
