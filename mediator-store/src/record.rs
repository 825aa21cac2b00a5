//! Records: the in-memory entity representation of the store.

use crate::error::{StoreError, StoreResult};
use mediator_core::Mediated;
use mediator_types::{EntityKey, EntityType, InstanceId, Timestamp};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Which bookkeeping columns a record type carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordSchema {
    /// Carries a `lock_version` counter.
    pub versioned: bool,
    /// Carries `created_at` / `updated_at`.
    pub timestamped: bool,
}

impl RecordSchema {
    /// Neither a version counter nor timestamps.
    pub const PLAIN: Self = Self {
        versioned: false,
        timestamped: false,
    };
}

impl Default for RecordSchema {
    fn default() -> Self {
        Self {
            versioned: true,
            timestamped: true,
        }
    }
}

/// One in-memory instance of a stored entity.
///
/// Not `Clone`: two instances loaded from the same row are distinct instances
/// with their own [`InstanceId`] and their own mediation switch.
#[derive(Debug)]
pub struct Record {
    entity_type: EntityType,
    instance: InstanceId,
    key: Option<EntityKey>,
    schema: RecordSchema,
    data: Value,
    lock_version: Option<u64>,
    created_at: Option<Timestamp>,
    updated_at: Option<Timestamp>,
    mediation_enabled: bool,
}

impl Record {
    pub(crate) fn new(entity_type: EntityType, schema: RecordSchema, data: Value) -> Self {
        Self {
            entity_type,
            instance: InstanceId::new(),
            key: None,
            schema,
            data,
            lock_version: schema.versioned.then_some(0),
            created_at: None,
            updated_at: None,
            mediation_enabled: true,
        }
    }

    pub(crate) fn load(key: EntityKey, row: &Row) -> Self {
        Self {
            entity_type: row.entity_type.clone(),
            instance: InstanceId::new(),
            key: Some(key),
            schema: row.schema,
            data: row.data.clone(),
            lock_version: row.lock_version,
            created_at: row.created_at,
            updated_at: row.updated_at,
            mediation_enabled: true,
        }
    }

    pub(crate) fn to_row(&self) -> Row {
        Row {
            entity_type: self.entity_type.clone(),
            schema: self.schema,
            data: self.data.clone(),
            lock_version: self.lock_version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn key(&self) -> Option<EntityKey> {
        self.key
    }

    pub fn is_new(&self) -> bool {
        self.key.is_none()
    }

    pub fn schema(&self) -> RecordSchema {
        self.schema
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Value {
        &mut self.data
    }

    /// Reads a top-level field. `Ok(None)` if the field is absent.
    pub fn get<T: DeserializeOwned>(&self, field: &str) -> StoreResult<Option<T>> {
        match self.data.get(field) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    /// Writes a top-level field. The record's data must be a JSON object.
    pub fn set(&mut self, field: &str, value: impl Serialize) -> StoreResult<()> {
        let value = serde_json::to_value(value)?;
        match self.data.as_object_mut() {
            Some(object) => {
                object.insert(field.to_string(), value);
                Ok(())
            }
            None => Err(StoreError::InvalidData(format!(
                "{} data is not an object",
                self.entity_type
            ))),
        }
    }

    /// Appends to a top-level array field, creating it if absent.
    pub fn push(&mut self, field: &str, value: impl Serialize) -> StoreResult<()> {
        let value = serde_json::to_value(value)?;
        let object = self.data.as_object_mut().ok_or_else(|| {
            StoreError::InvalidData(format!("{} data is not an object", self.entity_type))
        })?;
        match object
            .entry(field.to_string())
            .or_insert_with(|| Value::Array(Vec::new()))
        {
            Value::Array(items) => {
                items.push(value);
                Ok(())
            }
            _ => Err(StoreError::InvalidData(format!("{field} is not an array"))),
        }
    }

    /// `None` unless the schema is versioned.
    pub fn lock_version(&self) -> Option<u64> {
        self.lock_version
    }

    pub fn created_at(&self) -> Option<Timestamp> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<Timestamp> {
        self.updated_at
    }

    pub(crate) fn assign_key(&mut self, key: EntityKey) {
        self.key = Some(key);
    }

    pub(crate) fn stamp_created(&mut self, now: Timestamp) {
        self.created_at = Some(now);
        self.updated_at = Some(now);
    }

    pub(crate) fn stamp_updated(&mut self, now: Timestamp) {
        self.updated_at = Some(now);
    }

    pub(crate) fn increment_version(&mut self) {
        if let Some(version) = self.lock_version.as_mut() {
            *version += 1;
        }
    }

    pub(crate) fn bookkeeping(&self) -> Bookkeeping {
        Bookkeeping {
            key: self.key,
            lock_version: self.lock_version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// Puts back the columns a failed write may have changed. Data is left
    /// as the caller set it.
    pub(crate) fn restore(&mut self, saved: Bookkeeping) {
        self.key = saved.key;
        self.lock_version = saved.lock_version;
        self.created_at = saved.created_at;
        self.updated_at = saved.updated_at;
    }
}

/// The columns a write assigns, captured before it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Bookkeeping {
    key: Option<EntityKey>,
    lock_version: Option<u64>,
    created_at: Option<Timestamp>,
    updated_at: Option<Timestamp>,
}

impl Mediated for Record {
    fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    fn instance_id(&self) -> InstanceId {
        self.instance
    }

    fn durable_key(&self) -> Option<EntityKey> {
        self.key
    }

    fn supports_versioning(&self) -> bool {
        self.schema.versioned && self.schema.timestamped
    }

    fn mediation_enabled(&self) -> bool {
        self.mediation_enabled
    }

    fn set_mediation_enabled(&mut self, enabled: bool) {
        self.mediation_enabled = enabled;
    }
}

/// Stored state of one record.
#[derive(Debug, Clone)]
pub(crate) struct Row {
    pub(crate) entity_type: EntityType,
    schema: RecordSchema,
    data: Value,
    lock_version: Option<u64>,
    created_at: Option<Timestamp>,
    updated_at: Option<Timestamp>,
}
