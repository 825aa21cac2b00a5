//! In-memory persistence host.
//!
//! Rows live in a map keyed by durable key. Atomic scopes snapshot the map on
//! entry and restore the snapshot if the scope fails, so nested scopes compose
//! and only the outermost successful scope leaves its writes in place.

use crate::error::StoreError;
use crate::record::{Record, RecordSchema, Row};
use mediator_core::{Mediated, MediationContext, MediationResult, PersistenceHost};
use mediator_types::{EntityKey, EntityType, Timestamp};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, trace};

/// A mediation context bound to a [`MemoryStore`].
pub type StoreContext<'s> = MediationContext<'s, MemoryStore>;

type Hook = Box<dyn Fn(&mut Record, &StoreContext<'_>) -> MediationResult<()>>;

#[derive(Default)]
struct Hooks {
    before_create: Vec<Hook>,
    after_create: Vec<Hook>,
    after_save: Vec<Hook>,
}

#[derive(Debug, Clone, Copy)]
enum HookKind {
    BeforeCreate,
    AfterCreate,
    AfterSave,
}

pub struct MemoryStore {
    schemas: HashMap<EntityType, RecordSchema>,
    hooks: HashMap<EntityType, Hooks>,
    rows: RefCell<HashMap<EntityKey, Row>>,
    scope_depth: Cell<usize>,
    clock: Cell<Timestamp>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            schemas: HashMap::new(),
            hooks: HashMap::new(),
            rows: RefCell::new(HashMap::new()),
            scope_depth: Cell::new(0),
            clock: Cell::new(Timestamp::now()),
        }
    }

    /// Declares the bookkeeping columns of `entity_type`.
    ///
    /// Undeclared types use [`RecordSchema::default`].
    pub fn define(&mut self, entity_type: impl Into<EntityType>, schema: RecordSchema) -> &mut Self {
        self.schemas.insert(entity_type.into(), schema);
        self
    }

    pub fn schema(&self, entity_type: &EntityType) -> RecordSchema {
        self.schemas.get(entity_type).copied().unwrap_or_default()
    }

    /// Runs before a new record of `entity_type` gets its key.
    pub fn before_create<F>(&mut self, entity_type: impl Into<EntityType>, hook: F) -> &mut Self
    where
        F: Fn(&mut Record, &StoreContext<'_>) -> MediationResult<()> + 'static,
    {
        self.hooks_mut(entity_type).before_create.push(Box::new(hook));
        self
    }

    /// Runs after a new record of `entity_type` was inserted.
    pub fn after_create<F>(&mut self, entity_type: impl Into<EntityType>, hook: F) -> &mut Self
    where
        F: Fn(&mut Record, &StoreContext<'_>) -> MediationResult<()> + 'static,
    {
        self.hooks_mut(entity_type).after_create.push(Box::new(hook));
        self
    }

    /// Runs after every write of a record of `entity_type`, touches included.
    pub fn after_save<F>(&mut self, entity_type: impl Into<EntityType>, hook: F) -> &mut Self
    where
        F: Fn(&mut Record, &StoreContext<'_>) -> MediationResult<()> + 'static,
    {
        self.hooks_mut(entity_type).after_save.push(Box::new(hook));
        self
    }

    /// Builds a new, keyless record of `entity_type`.
    pub fn new_record(&self, entity_type: impl Into<EntityType>, data: Value) -> Record {
        let entity_type = entity_type.into();
        let schema = self.schema(&entity_type);
        Record::new(entity_type, schema, data)
    }

    /// Loads a fresh instance of the stored record.
    pub fn find(&self, entity_type: impl Into<EntityType>, key: EntityKey) -> Option<Record> {
        let entity_type = entity_type.into();
        self.rows
            .borrow()
            .get(&key)
            .filter(|row| row.entity_type == entity_type)
            .map(|row| Record::load(key, row))
    }

    pub fn row_count(&self) -> usize {
        self.rows.borrow().len()
    }

    /// Whether an atomic scope is open.
    pub fn in_scope(&self) -> bool {
        self.scope_depth.get() > 0
    }

    /// Inserts or updates `record`, running the lifecycle hooks.
    ///
    /// The write itself never touches the version counter; that is left to
    /// mediation or to an explicit touch.
    pub(crate) fn write(&self, ctx: &StoreContext<'_>, record: &mut Record) -> MediationResult<()> {
        if record.is_new() {
            self.create(ctx, record)?;
        } else {
            self.update(record)?;
        }
        self.run_hooks(HookKind::AfterSave, ctx, record)
    }

    /// Touches a record outside of mediation.
    ///
    /// Untimestamped or unsaved records are left alone.
    pub(crate) fn touch_record(&self, ctx: &StoreContext<'_>, record: &mut Record) -> MediationResult<()> {
        if !self.touchable(record) {
            trace!(entity_type = %record.entity_type(), "record not touchable, skipping");
            return Ok(());
        }
        self.run_in_atomic_scope(|| {
            self.bump_version(record)?;
            self.stamp(ctx, record)
        })
    }

    fn create(&self, ctx: &StoreContext<'_>, record: &mut Record) -> MediationResult<()> {
        ctx.begin_creation(record);
        if let Err(err) = self.run_hooks(HookKind::BeforeCreate, ctx, record) {
            ctx.abort_creation(record);
            return Err(err);
        }

        let key = EntityKey::new();
        record.assign_key(key);
        if record.schema().timestamped {
            record.stamp_created(self.tick());
        }
        self.rows.borrow_mut().insert(key, record.to_row());
        ctx.finish_creation(record);
        debug!(entity_type = %record.entity_type(), %key, "created record");

        self.run_hooks(HookKind::AfterCreate, ctx, record)
    }

    fn update(&self, record: &Record) -> MediationResult<()> {
        let Some(key) = record.key() else {
            return Err(StoreError::InvalidData("update of an unsaved record".into()).into());
        };
        let mut rows = self.rows.borrow_mut();
        match rows.get_mut(&key) {
            Some(row) if row.entity_type == *record.entity_type() => {
                *row = record.to_row();
                trace!(entity_type = %record.entity_type(), %key, "updated record");
                Ok(())
            }
            _ => Err(StoreError::NotFound {
                entity_type: record.entity_type().clone(),
                key,
            }
            .into()),
        }
    }

    /// Sets `updated_at`, persists and runs the after-save hooks.
    fn stamp(&self, ctx: &StoreContext<'_>, record: &mut Record) -> MediationResult<()> {
        if !self.touchable(record) {
            return Ok(());
        }
        record.stamp_updated(self.tick());
        self.update(record)?;
        self.run_hooks(HookKind::AfterSave, ctx, record)
    }

    fn touchable(&self, record: &Record) -> bool {
        record.schema().timestamped && !record.is_new()
    }

    fn run_hooks(&self, kind: HookKind, ctx: &StoreContext<'_>, record: &mut Record) -> MediationResult<()> {
        let Some(hooks) = self.hooks.get(record.entity_type()) else {
            return Ok(());
        };
        let list = match kind {
            HookKind::BeforeCreate => &hooks.before_create,
            HookKind::AfterCreate => &hooks.after_create,
            HookKind::AfterSave => &hooks.after_save,
        };
        for hook in list {
            trace!(entity_type = %record.entity_type(), ?kind, "running hook");
            hook(&mut *record, ctx)?;
        }
        Ok(())
    }

    fn tick(&self) -> Timestamp {
        let next = self.clock.get().tick();
        self.clock.set(next);
        next
    }

    fn hooks_mut(&mut self, entity_type: impl Into<EntityType>) -> &mut Hooks {
        self.hooks.entry(entity_type.into()).or_default()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("schemas", &self.schemas)
            .field("rows", &self.row_count())
            .field("scope_depth", &self.scope_depth.get())
            .finish()
    }
}

impl PersistenceHost for MemoryStore {
    type Entity = Record;

    fn run_in_atomic_scope<T>(
        &self,
        body: impl FnOnce() -> MediationResult<T>,
    ) -> MediationResult<T> {
        let snapshot = self.rows.borrow().clone();
        self.scope_depth.set(self.scope_depth.get() + 1);
        let result = body();
        self.scope_depth.set(self.scope_depth.get().saturating_sub(1));
        if result.is_err() {
            *self.rows.borrow_mut() = snapshot;
            debug!(depth = self.scope_depth.get(), "rolled back atomic scope");
        }
        result
    }

    fn bump_version(&self, record: &mut Record) -> MediationResult<()> {
        if !record.is_new() {
            record.increment_version();
        }
        Ok(())
    }

    fn touch(&self, ctx: &StoreContext<'_>, record: &mut Record) -> MediationResult<()> {
        self.stamp(ctx, record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediator_core::MediationTypes;
    use serde_json::json;
    use std::sync::Arc;

    fn context(store: &MemoryStore) -> StoreContext<'_> {
        MediationContext::new(store, Arc::new(MediationTypes::new()))
    }

    #[test]
    fn undeclared_types_get_the_default_schema() {
        let store = MemoryStore::new();
        assert_eq!(store.schema(&"foo".into()), RecordSchema::default());
    }

    #[test]
    fn write_assigns_key_and_timestamps() {
        let store = MemoryStore::new();
        let ctx = context(&store);
        let mut record = store.new_record("foo", json!({}));

        store.write(&ctx, &mut record).unwrap();

        let key = record.key().unwrap();
        assert_eq!(store.row_count(), 1);
        assert!(record.created_at().is_some());
        assert_eq!(record.created_at(), record.updated_at());
        assert_eq!(record.lock_version(), Some(0));
        assert!(store.find("foo", key).is_some());
    }

    #[test]
    fn find_checks_the_type() {
        let store = MemoryStore::new();
        let ctx = context(&store);
        let mut record = store.new_record("foo", json!({}));
        store.write(&ctx, &mut record).unwrap();

        assert!(store.find("bar", record.key().unwrap()).is_none());
        assert!(store.find("foo", EntityKey::new()).is_none());
    }

    #[test]
    fn update_of_a_missing_row_fails() {
        let store = MemoryStore::new();
        let ctx = context(&store);
        let mut record = store.new_record("foo", json!({}));
        record.assign_key(EntityKey::new());

        let err = store.write(&ctx, &mut record).unwrap_err();
        assert!(err.to_string().contains("record not found"));
    }

    #[test]
    fn failed_scope_restores_rows() {
        let store = MemoryStore::new();
        let ctx = context(&store);

        let result: MediationResult<()> = store.run_in_atomic_scope(|| {
            let mut record = store.new_record("foo", json!({}));
            store.write(&ctx, &mut record)?;
            assert!(store.in_scope());
            Err(StoreError::InvalidData("boom".into()).into())
        });

        assert!(result.is_err());
        assert_eq!(store.row_count(), 0);
        assert!(!store.in_scope());
    }

    #[test]
    fn inner_failure_keeps_outer_writes() {
        let store = MemoryStore::new();
        let ctx = context(&store);

        store
            .run_in_atomic_scope(|| {
                let mut kept = store.new_record("foo", json!({}));
                store.write(&ctx, &mut kept)?;
                let inner: MediationResult<()> = store.run_in_atomic_scope(|| {
                    let mut dropped = store.new_record("foo", json!({}));
                    store.write(&ctx, &mut dropped)?;
                    Err(StoreError::InvalidData("inner".into()).into())
                });
                assert!(inner.is_err());
                Ok(())
            })
            .unwrap();

        assert_eq!(store.row_count(), 1);
    }

    #[test]
    fn clock_ticks_forward() {
        let store = MemoryStore::new();
        let a = store.tick();
        let b = store.tick();
        assert!(a.is_before(&b));
    }
}
