//! In-memory persistence host for the mediation core.
//!
//! Stores [`Record`]s as JSON data plus optional bookkeeping columns
//! (`lock_version`, `created_at`, `updated_at`) and implements
//! [`PersistenceHost`](mediator_core::PersistenceHost) for them:
//! - nestable atomic scopes with rollback
//! - durable key assignment on first write, bracketed by the creation window
//! - `before_create` / `after_create` / `after_save` hooks that may save or
//!   mediate other records reentrantly
//!
//! Saves go through [`RecordSession`], implemented on [`StoreContext`].

mod error;
mod record;
mod session;
mod store;

pub use error::{StoreError, StoreResult};
pub use record::{Record, RecordSchema};
pub use session::RecordSession;
pub use store::{MemoryStore, StoreContext};
