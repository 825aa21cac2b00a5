//! Core type definitions for the graph mediator.
//!
//! This crate defines the host-agnostic value types used by every other crate:
//! - Durable entity keys and runtime instance ids (UUID v7)
//! - Entity type names
//! - Monotonic last-modified timestamps
//!
//! Anything describing how entities are stored belongs in the host layer, not here.

mod ids;
mod timestamp;

pub use ids::{EntityKey, EntityType, InstanceId};
pub use timestamp::Timestamp;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid entity key: {0}")]
    InvalidKey(#[from] uuid::Error),
}
