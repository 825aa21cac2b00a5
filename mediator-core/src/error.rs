//! Error types for the mediation core.

use crate::chain::StepKind;
use mediator_types::{EntityType, InstanceId};
use thiserror::Error;

/// Result type for mediation operations.
pub type MediationResult<T> = Result<T, MediationError>;

/// Errors that can occur while mediating a save.
///
/// The coordinator never swallows errors from steps or from the wrapped body.
/// Body errors come back unchanged; step errors are wrapped in [`MediationError::Step`].
#[derive(Debug, Error)]
pub enum MediationError {
    /// A nested mediated operation was attempted for an entity that has no
    /// durable key while its creation is still in progress, so its Mediator
    /// cannot be resolved unambiguously.
    #[error("identity unavailable: {entity_type} {instance} has no durable key while its creation is in progress")]
    IdentityUnavailable {
        entity_type: EntityType,
        instance: InstanceId,
    },

    /// A before, reconcile or cache step failed.
    #[error("{kind} step '{step}' failed for {entity_type}: {source}")]
    Step {
        entity_type: EntityType,
        kind: StepKind,
        step: String,
        #[source]
        source: anyhow::Error,
    },

    /// Storage failure reported by the host.
    #[error("storage error: {0}")]
    Storage(String),

    /// Any other host or body failure.
    #[error(transparent)]
    Host(#[from] anyhow::Error),
}

impl MediationError {
    /// Returns true for [`MediationError::IdentityUnavailable`].
    pub fn is_identity_unavailable(&self) -> bool {
        matches!(self, Self::IdentityUnavailable { .. })
    }
}
