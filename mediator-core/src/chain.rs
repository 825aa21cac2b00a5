//! Ordered, deduplicated step lists run around a mediated save.
//!
//! Each entity type owns one [`CallbackChain`] with three lists:
//! - `before` steps run once when the outermost mediated operation starts
//! - `reconcile` steps run once after the body and every nested operation unwound
//! - `cache` steps run once after the reconcile steps
//!
//! Steps are named at registration time; the name only serves ordering and
//! deduplication. At run time a chain is a plain slice traversal.

use crate::{MediationContext, PersistenceHost};
use std::fmt;
use std::sync::Arc;

/// Which list of a chain a step belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    Before,
    Reconcile,
    Cache,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::Reconcile => "reconcile",
            Self::Cache => "cache",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signature of a step body.
///
/// Steps receive the mediated entity and the context they run in, so they can
/// open nested mediated operations of their own.
pub type StepFn<H> = dyn Fn(&mut <H as PersistenceHost>::Entity, &MediationContext<'_, H>) -> anyhow::Result<()>
    + Send
    + Sync;

/// A step body together with the name it was registered under.
pub struct NamedStep<H: PersistenceHost> {
    name: String,
    run: Arc<StepFn<H>>,
}

impl<H: PersistenceHost> NamedStep<H> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn run(
        &self,
        entity: &mut H::Entity,
        ctx: &MediationContext<'_, H>,
    ) -> anyhow::Result<()> {
        (self.run)(entity, ctx)
    }
}

impl<H: PersistenceHost> Clone for NamedStep<H> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            run: Arc::clone(&self.run),
        }
    }
}

/// The before / reconcile / cache lists of one entity type.
pub struct CallbackChain<H: PersistenceHost> {
    before: Vec<NamedStep<H>>,
    reconcile: Vec<NamedStep<H>>,
    cache: Vec<NamedStep<H>>,
}

impl<H: PersistenceHost> CallbackChain<H> {
    /// Creates a chain with three empty lists.
    pub fn new() -> Self {
        Self {
            before: Vec::new(),
            reconcile: Vec::new(),
            cache: Vec::new(),
        }
    }

    /// Appends a step to the `kind` list.
    ///
    /// Returns false, leaving the list untouched, if a step with the same name
    /// is already registered in that list.
    pub fn add(&mut self, kind: StepKind, name: impl Into<String>, run: Arc<StepFn<H>>) -> bool {
        let name = name.into();
        let list = self.list_mut(kind);
        if list.iter().any(|step| step.name == name) {
            return false;
        }
        list.push(NamedStep { name, run });
        true
    }

    /// Steps of the `kind` list, in registration order.
    pub fn steps(&self, kind: StepKind) -> &[NamedStep<H>] {
        match kind {
            StepKind::Before => &self.before,
            StepKind::Reconcile => &self.reconcile,
            StepKind::Cache => &self.cache,
        }
    }

    /// Names of the `kind` list, in registration order.
    pub fn names(&self, kind: StepKind) -> Vec<&str> {
        self.steps(kind).iter().map(NamedStep::name).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.reconcile.is_empty() && self.cache.is_empty()
    }

    fn list_mut(&mut self, kind: StepKind) -> &mut Vec<NamedStep<H>> {
        match kind {
            StepKind::Before => &mut self.before,
            StepKind::Reconcile => &mut self.reconcile,
            StepKind::Cache => &mut self.cache,
        }
    }
}

impl<H: PersistenceHost> Default for CallbackChain<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: PersistenceHost> fmt::Debug for CallbackChain<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackChain")
            .field("before", &self.names(StepKind::Before))
            .field("reconcile", &self.names(StepKind::Reconcile))
            .field("cache", &self.names(StepKind::Cache))
            .finish()
    }
}
