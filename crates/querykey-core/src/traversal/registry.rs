//! Kind → traversal schema registry.
//!
//! Schemas are registered once per node kind at definition time and read by
//! every key-generation pass. Re-registering an identical schema is a no-op;
//! a different schema under the same kind is a configuration error.

use crate::{
    obs::sink::{MetricsEvent, record},
    traversal::{AttributeDecl, KindDecl, SchemaError, Slot, TraversalSchema},
};
use std::{
    collections::BTreeMap,
    sync::{Arc, LazyLock, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

///
/// REGISTRY
/// process-wide schema table, written at kind definition time
///

static REGISTRY: LazyLock<RwLock<SchemaRegistry>> =
    LazyLock::new(|| RwLock::new(SchemaRegistry::new()));

///
/// RegisterOutcome
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RegisterOutcome {
    Registered,
    Unchanged,
}

///
/// SchemaRegistry
///

#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<&'static str, Arc<TraversalSchema>>,
}

impl SchemaRegistry {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            schemas: BTreeMap::new(),
        }
    }

    /// Register the traversal schema for one declared kind.
    pub fn register(
        &mut self,
        decl: &KindDecl,
        slots: &[Slot],
    ) -> Result<RegisterOutcome, SchemaError> {
        self.register_attributes(decl.name, decl.attributes, slots)
    }

    pub(crate) fn register_attributes(
        &mut self,
        kind: &'static str,
        attributes: &[AttributeDecl],
        slots: &[Slot],
    ) -> Result<RegisterOutcome, SchemaError> {
        let schema = TraversalSchema::build(kind, attributes, slots)?;

        if let Some(existing) = self.schemas.get(kind) {
            if **existing == schema {
                return Ok(RegisterOutcome::Unchanged);
            }

            tracing::warn!(kind, "conflicting traversal schema registration");
            record(MetricsEvent::SchemaConflict { kind });

            return Err(SchemaError::Conflict { kind });
        }

        tracing::debug!(kind, slots = schema.slots().len(), "registered traversal schema");
        record(MetricsEvent::SchemaRegistered { kind });
        self.schemas.insert(kind, Arc::new(schema));

        Ok(RegisterOutcome::Registered)
    }

    #[must_use]
    pub fn get(&self, kind: &str) -> Option<&TraversalSchema> {
        self.schemas.get(kind).map(AsRef::as_ref)
    }

    /// Shared handle to the schema for `kind`, usable after the registry
    /// borrow ends.
    pub(crate) fn schema(&self, kind: &str) -> Option<Arc<TraversalSchema>> {
        self.schemas.get(kind).cloned()
    }

    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.schemas.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.schemas.keys().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

// registry_write
fn registry_write() -> RwLockWriteGuard<'static, SchemaRegistry> {
    REGISTRY
        .write()
        .expect("schema registry RwLock poisoned while acquiring write lock")
}

// registry_read
pub(crate) fn registry_read() -> RwLockReadGuard<'static, SchemaRegistry> {
    REGISTRY
        .read()
        .expect("schema registry RwLock poisoned while acquiring read lock")
}

/// Register a kind's traversal schema in the process registry.
pub fn register_schema(decl: &KindDecl, slots: &[Slot]) -> Result<RegisterOutcome, SchemaError> {
    registry_write().register(decl, slots)
}

pub(crate) fn register_attributes(
    kind: &'static str,
    attributes: &[AttributeDecl],
    slots: &[Slot],
) -> Result<RegisterOutcome, SchemaError> {
    registry_write().register_attributes(kind, attributes, slots)
}

/// Snapshot the registered schema for `kind`, if any.
#[must_use]
pub fn registered_schema(kind: &str) -> Option<TraversalSchema> {
    registry_read().get(kind).cloned()
}

/// Run `f` against the process registry under a read guard.
pub fn with_registry<R>(f: impl FnOnce(&SchemaRegistry) -> R) -> R {
    f(&registry_read())
}
