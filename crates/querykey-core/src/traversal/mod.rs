//! Dispatch vocabulary and per-kind traversal schemas.
//!
//! A node kind declares, once, the shape of each attribute it carries
//! ([`KindDecl`]) and the ordered list of `(attribute, opcode)` slots that
//! contribute to its cache key. The key builder never special-cases a kind;
//! it only follows the registered slots.

pub(crate) mod registry;


use std::fmt;
use thiserror::Error as ThisError;

// re-exports
pub use registry::{
    RegisterOutcome, SchemaRegistry, register_schema, registered_schema, with_registry,
};

///
/// Opcode
///
/// How one declared attribute contributes to a key.
///
/// IMPORTANT:
/// Tags are part of the digest contract and must stay fixed.
///

#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Opcode {
    /// Hashable value inserted verbatim.
    Plain = 0x01,
    /// Single nested node; its sub-key is emitted in place.
    SubNode = 0x02,
    /// Ordered nested nodes; count then each sub-key.
    SubNodeList = 0x03,
    /// Name → plain value entries, emitted sorted by name.
    Mapping = 0x04,
    /// Literal intended for parameterized execution; only its role is keyed.
    BoundParameter = 0x05,
    /// Internally generated unique name, normalized per pass.
    AnonymousSymbol = 0x06,
    /// String name or resolved reference, resolved before emission.
    DeferredAttributeRef = 0x07,
    /// User-supplied callable keyed by identity.
    Extension = 0x08,
}

impl Opcode {
    #[must_use]
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// The attribute shape this opcode can traverse.
    #[must_use]
    pub const fn expected_shape(self) -> Shape {
        match self {
            Self::Plain => Shape::Plain,
            Self::SubNode => Shape::Node,
            Self::SubNodeList => Shape::NodeList,
            Self::Mapping => Shape::Mapping,
            Self::BoundParameter => Shape::Bound,
            Self::AnonymousSymbol => Shape::Symbol,
            Self::DeferredAttributeRef => Shape::Deferred,
            Self::Extension => Shape::Extension,
        }
    }

    #[must_use]
    pub fn accepts(self, shape: Shape) -> bool {
        self.expected_shape() == shape
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::SubNode => "sub_node",
            Self::SubNodeList => "sub_node_list",
            Self::Mapping => "mapping",
            Self::BoundParameter => "bound_parameter",
            Self::AnonymousSymbol => "anonymous_symbol",
            Self::DeferredAttributeRef => "deferred_attribute_ref",
            Self::Extension => "extension",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

///
/// Shape
///
/// The actual value shape of a declared attribute.
/// `Opaque` marks values that are neither hashable nor comparable.
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Shape {
    Plain,
    Node,
    NodeList,
    Mapping,
    Bound,
    Symbol,
    Deferred,
    Extension,
    Opaque,
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Plain => "plain",
            Self::Node => "node",
            Self::NodeList => "node_list",
            Self::Mapping => "mapping",
            Self::Bound => "bound",
            Self::Symbol => "symbol",
            Self::Deferred => "deferred",
            Self::Extension => "extension",
            Self::Opaque => "opaque",
        };
        write!(f, "{label}")
    }
}

///
/// AttributeDecl
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AttributeDecl {
    pub name: &'static str,
    pub shape: Shape,
}

impl AttributeDecl {
    #[must_use]
    pub const fn new(name: &'static str, shape: Shape) -> Self {
        Self { name, shape }
    }
}

///
/// KindDecl
///
/// Static declaration of one node kind: its stable name and the shape of
/// every attribute it exposes.
///

#[derive(Clone, Copy, Debug)]
pub struct KindDecl {
    pub name: &'static str,
    pub attributes: &'static [AttributeDecl],
}

impl KindDecl {
    #[must_use]
    pub const fn new(name: &'static str, attributes: &'static [AttributeDecl]) -> Self {
        Self { name, attributes }
    }

    #[must_use]
    pub fn shape_of(&self, attribute: &str) -> Option<Shape> {
        self.attributes
            .iter()
            .find(|decl| decl.name == attribute)
            .map(|decl| decl.shape)
    }
}

///
/// Slot
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Slot {
    pub name: &'static str,
    pub opcode: Opcode,
}

impl Slot {
    #[must_use]
    pub const fn new(name: &'static str, opcode: Opcode) -> Self {
        Self { name, opcode }
    }
}

///
/// TraversalSchema
///
/// Validated, ordered slot list for one kind. Slot order is part of the
/// key contract: reordering changes every key containing the kind.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TraversalSchema {
    kind: &'static str,
    slots: Vec<Slot>,
}

impl TraversalSchema {
    /// Validate `slots` against the attribute shapes declared for `kind`.
    pub(crate) fn build(
        kind: &'static str,
        attributes: &[AttributeDecl],
        slots: &[Slot],
    ) -> Result<Self, SchemaError> {
        if kind.is_empty() {
            return Err(SchemaError::EmptyKind);
        }

        for (index, slot) in slots.iter().enumerate() {
            if slots[..index].iter().any(|prev| prev.name == slot.name) {
                return Err(SchemaError::DuplicateSlot {
                    kind,
                    attribute: slot.name,
                });
            }

            let Some(shape) = attributes
                .iter()
                .find(|decl| decl.name == slot.name)
                .map(|decl| decl.shape)
            else {
                return Err(SchemaError::UnknownAttribute {
                    kind,
                    attribute: slot.name,
                });
            };

            if shape == Shape::Opaque {
                return Err(SchemaError::Unhashable {
                    kind,
                    attribute: slot.name,
                    opcode: slot.opcode,
                });
            }

            if !slot.opcode.accepts(shape) {
                return Err(SchemaError::IncompatibleOpcode {
                    kind,
                    attribute: slot.name,
                    opcode: slot.opcode,
                    shape,
                });
            }
        }

        Ok(Self {
            kind,
            slots: slots.to_vec(),
        })
    }

    #[must_use]
    pub const fn kind(&self) -> &'static str {
        self.kind
    }

    #[must_use]
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }
}

///
/// SchemaError
///
/// Configuration defects in a kind's traversal declaration. Raised at
/// registration only, never while a key is being built.
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
pub enum SchemaError {
    #[error("node kind name must not be empty")]
    EmptyKind,

    #[error("schema for '{kind}' lists attribute '{attribute}' more than once")]
    DuplicateSlot {
        kind: &'static str,
        attribute: &'static str,
    },

    #[error("schema for '{kind}' references undeclared attribute '{attribute}'")]
    UnknownAttribute {
        kind: &'static str,
        attribute: &'static str,
    },

    #[error(
        "attribute '{kind}.{attribute}' is not hashable and cannot be traversed as {opcode}; route it through a bound parameter"
    )]
    Unhashable {
        kind: &'static str,
        attribute: &'static str,
        opcode: Opcode,
    },

    #[error("opcode {opcode} is incompatible with {shape} attribute '{kind}.{attribute}'")]
    IncompatibleOpcode {
        kind: &'static str,
        attribute: &'static str,
        opcode: Opcode,
        shape: Shape,
    },

    #[error("node kind '{kind}' is already registered with a different schema")]
    Conflict { kind: &'static str },
}

impl SchemaError {
    /// Kind the error was raised for, when known.
    #[must_use]
    pub const fn kind(&self) -> Option<&'static str> {
        match self {
            Self::EmptyKind => None,
            Self::DuplicateSlot { kind, .. }
            | Self::UnknownAttribute { kind, .. }
            | Self::Unhashable { kind, .. }
            | Self::IncompatibleOpcode { kind, .. }
            | Self::Conflict { kind } => Some(*kind),
        }
    }
}
