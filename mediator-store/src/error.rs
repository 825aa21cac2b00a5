//! Error types for the in-memory store.

use mediator_core::MediationError;
use mediator_types::{EntityKey, EntityType};
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No row with this key and type.
    #[error("record not found: {entity_type} {key}")]
    NotFound {
        entity_type: EntityType,
        key: EntityKey,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid data.
    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl From<StoreError> for MediationError {
    fn from(err: StoreError) -> Self {
        MediationError::Storage(err.to_string())
    }
}
