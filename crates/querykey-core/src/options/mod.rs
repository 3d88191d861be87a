//! Option bundles: records of named, defaultable fields that participate in
//! keys like any other node.
//!
//! Composition is flattening. `merge` produces a new bundle holding the final
//! field values, so the key of a merged bundle depends only on where it ended
//! up, never on the chain of overrides that produced it.


use crate::{
    builder::generate_key,
    key::CacheKey,
    node::{Attr, Node},
    traversal::{
        AttributeDecl, Opcode, RegisterOutcome, SchemaError, Shape, Slot,
        registry::register_attributes,
    },
    value::Value,
};
use std::{fmt, sync::Arc};
use thiserror::Error as ThisError;

///
/// OptionsError
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
pub enum OptionsError {
    #[error("option bundle '{kind}' has no field '{field}'")]
    UnknownField { kind: &'static str, field: String },
}

///
/// OptionField
///

#[derive(Clone, Copy, Debug)]
pub struct OptionField {
    pub name: &'static str,
    pub opcode: Opcode,
    pub default: fn() -> Value,
}

impl OptionField {
    #[must_use]
    pub const fn new(name: &'static str, opcode: Opcode, default: fn() -> Value) -> Self {
        Self {
            name,
            opcode,
            default,
        }
    }

    /// Field keyed verbatim; the only opcode bundle fields can carry.
    #[must_use]
    pub const fn plain(name: &'static str, default: fn() -> Value) -> Self {
        Self::new(name, Opcode::Plain, default)
    }
}

///
/// OptionsDecl
///
/// Static declaration of one bundle kind. Field order is the key order.
///

#[derive(Debug)]
pub struct OptionsDecl {
    pub kind: &'static str,
    pub fields: &'static [OptionField],
}

impl OptionsDecl {
    #[must_use]
    pub const fn new(kind: &'static str, fields: &'static [OptionField]) -> Self {
        Self { kind, fields }
    }

    /// Register the bundle's traversal schema in the process registry.
    ///
    /// Fields hold plain values, so any non-plain opcode is rejected.
    pub fn register(&self) -> Result<RegisterOutcome, SchemaError> {
        let attributes: Vec<AttributeDecl> = self
            .fields
            .iter()
            .map(|field| AttributeDecl::new(field.name, Shape::Plain))
            .collect();
        let slots: Vec<Slot> = self
            .fields
            .iter()
            .map(|field| Slot::new(field.name, field.opcode))
            .collect();

        register_attributes(self.kind, &attributes, &slots)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.name == name)
    }
}

///
/// OptionBundle
///

#[derive(Clone)]
pub struct OptionBundle {
    decl: &'static OptionsDecl,
    values: Arc<[Value]>,
}

impl OptionBundle {
    /// Bundle holding every field's default.
    #[must_use]
    pub fn new(decl: &'static OptionsDecl) -> Self {
        Self {
            decl,
            values: decl.fields.iter().map(|field| (field.default)()).collect(),
        }
    }

    #[must_use]
    pub const fn decl(&self) -> &'static OptionsDecl {
        self.decl
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.decl.position(name).map(|index| &self.values[index])
    }

    /// New bundle with the named fields replaced; `self` is unchanged.
    ///
    /// A name repeated within `overrides` takes its last value.
    pub fn merge<I, N, V>(&self, overrides: I) -> Result<Self, OptionsError>
    where
        I: IntoIterator<Item = (N, V)>,
        N: AsRef<str>,
        V: Into<Value>,
    {
        let mut values = self.values.to_vec();

        for (name, value) in overrides {
            let name = name.as_ref();
            let index = self
                .decl
                .position(name)
                .ok_or_else(|| OptionsError::UnknownField {
                    kind: self.decl.kind,
                    field: name.to_string(),
                })?;

            values[index] = value.into();
        }

        Ok(Self {
            decl: self.decl,
            values: values.into(),
        })
    }

    /// Cache key of the bundle's final field values.
    #[must_use]
    pub fn generate_key(&self) -> Option<CacheKey> {
        generate_key(self)
    }
}

impl Node for OptionBundle {
    fn kind(&self) -> &'static str {
        self.decl.kind
    }

    fn attribute(&self, name: &str) -> Option<Attr<'_>> {
        self.decl
            .position(name)
            .map(|index| Attr::value(&self.values[index]))
    }
}

impl fmt::Debug for OptionBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (field, value) in self.decl.fields.iter().zip(self.values.iter()) {
            map.entry(&field.name, value);
        }
        map.finish()
    }
}
